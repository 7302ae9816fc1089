//! API implementation of AMQP Channel
//!
//! A channel is created by [`Connection::open_channel`] and is a cheap handle to clone.
//! Each channel has a dispatcher task that routes incoming frames: synchronous responses to
//! the waiting request, deliveries to consumers within the prefetch limits, and publisher
//! confirms to the confirm ledger.
//!
//! The method families live in submodules: [`queue_declare`] and friends, [`exchange_declare`],
//! [`basic_publish`] and [`basic_consume`], [`confirm_select`] and [`basic_qos`].
//!
//! [`Connection::open_channel`]: crate::connection::Connection::open_channel
//! [`queue_declare`]: Channel::queue_declare
//! [`exchange_declare`]: Channel::exchange_declare
//! [`basic_publish`]: Channel::basic_publish
//! [`basic_consume`]: Channel::basic_consume
//! [`confirm_select`]: Channel::confirm_select
//! [`basic_qos`]: Channel::basic_qos
use std::{
    collections::HashSet,
    fmt,
    sync::{atomic::AtomicU64, Arc, Mutex},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    api::{
        callbacks::ChannelCallback,
        consumer::Delivery,
        error::{ChannelError, Error},
        state::{ChannelState, StateCell},
        Result,
    },
    frame::{
        AmqpChannelId, CloseChannel, CloseChannelOk, Frame, MethodHeader, OpenChannel,
        OpenChannelOk,
    },
    net::{IncomingMessage, OutgoingMessage},
    utils::lock,
};

mod basic;
mod confirm;
mod dispatcher;
mod exchange;
mod qos;
mod queue;

pub use basic::*;
pub use confirm::*;
pub(crate) use dispatcher::ChannelDispatcher;
pub use exchange::*;
pub use qos::*;
pub use queue::*;

use qos::DeliveryLedger;

/// Command for the dispatcher task of a channel.
pub(crate) enum DispatcherManagementCommand {
    RegisterResponder {
        method_header: &'static MethodHeader,
        responder: oneshot::Sender<IncomingMessage>,
    },
    RegisterConsumer {
        consumer_tag: String,
        /// Distinguishes successive consumers using the same tag.
        registration: u64,
        no_ack: bool,
        tx: mpsc::UnboundedSender<Delivery>,
    },
    DeregisterConsumer {
        consumer_tag: String,
        /// `None` removes any consumer with the tag.
        registration: Option<u64>,
        /// Send `basic.cancel` with no-wait to the broker.
        notify_broker: bool,
    },
    RegisterChannelCallback(Box<dyn ChannelCallback + Send + 'static>),
    /// Acknowledgement frame to send in channel order.
    Forward(Frame),
    /// Prefetch limits may have changed, retry buffered deliveries.
    Redrain,
}

pub(crate) struct SharedChannelInner {
    channel_id: AmqpChannelId,
    connection_name: String,
    state: StateCell<ChannelState>,
    outgoing_tx: mpsc::Sender<OutgoingMessage>,
    dispatcher_mgmt_tx: mpsc::UnboundedSender<DispatcherManagementCommand>,
    /// One synchronous request in flight at a time.
    rpc_lock: tokio::sync::Mutex<()>,
    /// Wire order of publishes equals their sequence order.
    publish_lock: tokio::sync::Mutex<()>,
    confirms: Mutex<confirm::ConfirmLedger>,
    deliveries: Mutex<DeliveryLedger>,
    /// Tags of active consumers.
    consumer_tags: Mutex<HashSet<String>>,
    consumer_seq: AtomicU64,
}

/// Represent an AMQP Channel.
///
/// To create a AMQP channel, use [`Connection::open_channel` method][`open_channel`].
///
/// Dropping a handle does not close the channel, use [`close`] for graceful shutdown.
///
/// [`open_channel`]: crate::connection::Connection::open_channel
/// [`close`]: Channel::close
#[derive(Clone)]
pub struct Channel {
    shared: Arc<SharedChannelInner>,
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// New channel can only be created by [`Connection::open_channel`].
    ///
    /// [`Connection::open_channel`]: crate::connection::Connection::open_channel
    pub(crate) fn new(
        channel_id: AmqpChannelId,
        connection_name: String,
        outgoing_tx: mpsc::Sender<OutgoingMessage>,
        dispatcher_mgmt_tx: mpsc::UnboundedSender<DispatcherManagementCommand>,
    ) -> Self {
        Self {
            shared: Arc::new(SharedChannelInner {
                channel_id,
                connection_name,
                state: StateCell::new(ChannelState::Opening),
                outgoing_tx,
                dispatcher_mgmt_tx,
                rpc_lock: tokio::sync::Mutex::new(()),
                publish_lock: tokio::sync::Mutex::new(()),
                confirms: Mutex::new(confirm::ConfirmLedger::default()),
                deliveries: Mutex::new(DeliveryLedger::default()),
                consumer_tags: Mutex::new(HashSet::new()),
                consumer_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Handshake `channel.open`, the dispatcher must be running.
    pub(crate) async fn open(&self) -> Result<()> {
        let response = self
            .request(OpenChannel.into_frame(), OpenChannelOk::header())
            .await;
        match response.and_then(into_response) {
            Ok(_) => {
                self.shared.state.transition(ChannelState::Open);
                info!("open {}", self);
                Ok(())
            }
            Err(err) => {
                self.shared.state.transition(ChannelState::Closed);
                Err(err)
            }
        }
    }

    pub fn channel_id(&self) -> AmqpChannelId {
        self.shared.channel_id
    }

    pub fn connection_name(&self) -> &str {
        &self.shared.connection_name
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Wait until the channel is closed, by either peer or by the connection.
    pub async fn listen_closed(&self) {
        self.shared.state.closed().await
    }

    /// Register callbacks for asynchronous messages from the broker.
    pub async fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: ChannelCallback + Send + 'static,
    {
        self.send_command(DispatcherManagementCommand::RegisterChannelCallback(
            Box::new(callback),
        ))
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChannelError::ChannelClosed.into())
        }
    }

    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.shared
            .outgoing_tx
            .send((self.channel_id(), frame))
            .await
            .map_err(|_| ChannelError::ChannelClosed.into())
    }

    pub(crate) fn send_command(&self, command: DispatcherManagementCommand) -> Result<()> {
        self.shared
            .dispatcher_mgmt_tx
            .send(command)
            .map_err(|_| ChannelError::ChannelClosed.into())
    }

    /// Send `frame` and wait for the response identified by `method_header`, whatever the
    /// channel state.
    async fn request(
        &self,
        frame: Frame,
        method_header: &'static MethodHeader,
    ) -> Result<IncomingMessage> {
        let (responder, responder_rx) = oneshot::channel();
        // the dispatcher handles commands before frames, so the responder is in place
        // before the response can be dispatched
        self.send_command(DispatcherManagementCommand::RegisterResponder {
            method_header,
            responder,
        })?;
        self.send_frame(frame).await?;
        responder_rx
            .await
            .map_err(|_| ChannelError::ChannelClosed.into())
    }

    /// Synchronous request on an open channel, with the broker's raw answer.
    pub(crate) async fn synchronous_request_raw(
        &self,
        frame: Frame,
        method_header: &'static MethodHeader,
    ) -> Result<IncomingMessage> {
        let _guard = self.shared.rpc_lock.lock().await;
        self.ensure_open()?;
        self.request(frame, method_header).await
    }

    /// Synchronous request on an open channel.
    ///
    /// A broker rejection is returned as [`Error::DeclareError`].
    pub(crate) async fn synchronous_request(
        &self,
        frame: Frame,
        method_header: &'static MethodHeader,
    ) -> Result<Frame> {
        self.synchronous_request_raw(frame, method_header)
            .await
            .and_then(into_response)
    }

    /// Gracefully close the channel.
    ///
    /// Pending publisher confirmations are nacked with `ChannelClosed` immediately, and no
    /// publish is accepted afterwards. Closing an already closing or closed channel waits until
    /// it is closed.
    pub async fn close(&self) -> Result<()> {
        {
            let guard = self.shared.publish_lock.lock().await;
            if !self.shared.state.transition(ChannelState::Closing) {
                drop(guard);
                self.listen_closed().await;
                return Ok(());
            }
            let nacked = lock(&self.shared.confirms).close();
            if nacked > 0 {
                debug!("{} pending confirmations nacked on close of {}", nacked, self);
            }
        }

        match self
            .request(CloseChannel::default().into_frame(), CloseChannelOk::header())
            .await
        {
            Ok(IncomingMessage::Ok(_)) => {}
            Ok(IncomingMessage::Exception(code, text)) => {
                debug!("close of {} answered by broker close: {}: {}", self, code, text);
            }
            Ok(IncomingMessage::ConnectionException(code, text)) => {
                debug!("connection closed while closing {}: {}: {}", self, code, text);
            }
            Err(err) => warn!("failed to close {} gracefully, cause: {}", self, err),
        }
        self.listen_closed().await;
        info!("{} closed", self);
        Ok(())
    }
}

/// Map a synchronous response onto the error taxonomy.
fn into_response(message: IncomingMessage) -> Result<Frame> {
    match message {
        IncomingMessage::Ok(frame) => Ok(frame),
        IncomingMessage::Exception(reply_code, reply_text) => Err(Error::DeclareError {
            reply_code,
            reply_text,
        }),
        IncomingMessage::ConnectionException(reply_code, reply_text) => Err(
            Error::ConnectionError(format!("{}: {}", reply_code, reply_text)),
        ),
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "channel {} [{}] of connection '{}'",
            self.channel_id(),
            self.state(),
            self.connection_name()
        )
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("channel_id", &self.channel_id())
            .field("connection_name", &self.connection_name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::into_response;
    use crate::{
        api::error::Error,
        frame::{OpenChannelOk, NOT_FOUND},
        net::IncomingMessage,
    };

    #[test]
    fn test_response_mapping() {
        assert!(into_response(IncomingMessage::Ok(OpenChannelOk.into_frame())).is_ok());
        assert_eq!(
            Err(Error::DeclareError {
                reply_code: NOT_FOUND,
                reply_text: "NOT_FOUND - no queue 'q'".to_string()
            }),
            into_response(IncomingMessage::Exception(
                NOT_FOUND,
                "NOT_FOUND - no queue 'q'".to_string()
            ))
            .map(|_| ())
        );
        assert!(matches!(
            into_response(IncomingMessage::ConnectionException(320, "gone".to_string())),
            Err(Error::ConnectionError(_))
        ));
    }
}
