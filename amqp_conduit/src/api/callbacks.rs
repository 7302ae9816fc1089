//! Callback interfaces of asynchronous messages from the broker.
//!
//! The defaults log what happened and do nothing else.
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::frame::{Cancel, Close, CloseChannel, Return};

use super::channel::Channel;

/////////////////////////////////////////////////////////////////////////////
#[async_trait]
pub trait ConnectionCallback {
    /// The connection was closed by the broker or by a transport failure.
    async fn close(&mut self, connection_name: &str, close: Close);

    async fn blocked(&mut self, connection_name: &str, reason: String);

    async fn unblocked(&mut self, connection_name: &str);
}

pub struct DefaultConnectionCallback;

#[async_trait]
impl ConnectionCallback for DefaultConnectionCallback {
    async fn close(&mut self, connection_name: &str, close: Close) {
        error!("handle close request for connection '{}', cause: {}", connection_name, close);
    }

    async fn blocked(&mut self, connection_name: &str, reason: String) {
        info!("connection '{}' blocked, reason: {}", connection_name, reason);
    }

    async fn unblocked(&mut self, connection_name: &str) {
        info!("connection '{}' unblocked", connection_name);
    }
}

/////////////////////////////////////////////////////////////////////////////
#[async_trait]
pub trait ChannelCallback {
    /// The channel was closed by the broker.
    async fn close(&mut self, channel: &Channel, close: CloseChannel);

    /// The broker cancelled a consumer, e.g. because its queue was deleted.
    async fn cancel(&mut self, channel: &Channel, cancel: Cancel);

    /// A mandatory message could not be routed.
    async fn publish_return(&mut self, channel: &Channel, ret: Return);
}

pub struct DefaultChannelCallback;

#[async_trait]
impl ChannelCallback for DefaultChannelCallback {
    async fn close(&mut self, channel: &Channel, close: CloseChannel) {
        error!("handle close request for {}, cause: {}", channel, close);
    }

    async fn cancel(&mut self, channel: &Channel, cancel: Cancel) {
        warn!("handle {} request for {}", cancel, channel);
    }

    async fn publish_return(&mut self, channel: &Channel, ret: Return) {
        warn!("handle publish return on {}, {}, content size: {}", channel, ret, ret.content.len());
    }
}
