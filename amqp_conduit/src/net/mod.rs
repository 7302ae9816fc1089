//! Connection-level plumbing: the transport seam, channel id allocation and the two
//! tasks that own the transport halves of a connection.
mod channel_id_repo;
mod channel_manager;
mod error;
pub mod loopback;
mod reader_handler;
mod transport;
mod writer_handler;

pub(crate) use channel_manager::*;
pub(crate) use error::*;
pub(crate) use reader_handler::*;
pub use transport::*;
pub(crate) use writer_handler::*;

/////////////////////////////////////////////////////////////////////////////
use tokio::sync::{mpsc, oneshot};

use crate::{
    api::callbacks::ConnectionCallback,
    frame::{AmqpChannelId, Frame, MethodHeader, ReplyCode},
};

pub(crate) type OutgoingMessage = (AmqpChannelId, Frame);

/// Response to a synchronous request.
#[derive(Debug)]
pub(crate) enum IncomingMessage {
    Ok(Frame),
    /// The broker closed the channel instead of responding.
    Exception(ReplyCode, String),
    /// The connection was closed by the broker or the transport failed.
    ConnectionException(ReplyCode, String),
}

pub(crate) struct ChannelResource {
    /// `None` for the connection's default channel, which has no dispatcher.
    pub dispatcher_tx: Option<mpsc::UnboundedSender<Frame>>,
}

impl ChannelResource {
    pub fn new(dispatcher_tx: Option<mpsc::UnboundedSender<Frame>>) -> Self {
        Self { dispatcher_tx }
    }
}

pub(crate) struct RegisterChannelResource {
    /// `None` to allocate the lowest free id.
    pub channel_id: Option<AmqpChannelId>,
    pub resource: ChannelResource,
    /// `None` in response when no id is available.
    pub acker: oneshot::Sender<Option<AmqpChannelId>>,
}

pub(crate) struct RegisterResponder {
    pub channel_id: AmqpChannelId,
    pub method_header: &'static MethodHeader,
    pub responder: oneshot::Sender<IncomingMessage>,
    pub acker: oneshot::Sender<()>,
}

pub(crate) struct RegisterConnectionCallback {
    pub callback: Box<dyn ConnectionCallback + Send + 'static>,
}

pub(crate) enum ConnManagementCommand {
    RegisterChannelResource(RegisterChannelResource),
    RegisterResponder(RegisterResponder),
    RegisterConnectionCallback(RegisterConnectionCallback),
}
