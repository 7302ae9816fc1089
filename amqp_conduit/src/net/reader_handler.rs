use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};

use crate::{
    api::{callbacks::ConnectionCallback, connection::ConnectionStatus, state::ConnectionState},
    frame::{
        AmqpChannelId, Close, CloseChannelOk, CloseOk, Frame, CONNECTION_FORCED,
        CONN_DEFAULT_CHANNEL,
    },
};

use super::{
    channel_manager::ChannelManager, ConnManagementCommand, Error, FrameReader, IncomingMessage,
    OutgoingMessage,
};

/////////////////////////////////////////////////////////////////////////////

/// Demultiplexes frames read from the transport to channel dispatchers.
pub(crate) struct ReaderHandler {
    stream: Box<dyn FrameReader>,

    /// sender half to forward outgoing message to `WriterHandler`
    outgoing_tx: mpsc::Sender<OutgoingMessage>,

    /// receiver half to receive management command from connection/channels
    conn_mgmt_rx: mpsc::Receiver<ConnManagementCommand>,

    status: Arc<ConnectionStatus>,
    callback: Option<Box<dyn ConnectionCallback + Send + 'static>>,

    channel_manager: ChannelManager,

    /// Notify WriterHandler to shutdown.
    /// If reader handler exit first, it will notify writer handler to shutdown.
    /// If writer handler exit first, the peer sees end of stream and so does the reader.
    #[allow(dead_code /* notify shutdown just by dropping the instance */)]
    shutdown_notifier: broadcast::Sender<()>,
}

impl ReaderHandler {
    pub fn new(
        stream: Box<dyn FrameReader>,
        status: Arc<ConnectionStatus>,
        outgoing_tx: mpsc::Sender<OutgoingMessage>,
        conn_mgmt_rx: mpsc::Receiver<ConnManagementCommand>,
        channel_max: u16,
        shutdown_notifier: broadcast::Sender<()>,
    ) -> Self {
        Self {
            stream,
            outgoing_tx,
            conn_mgmt_rx,
            status,
            callback: None,
            channel_manager: ChannelManager::new(channel_max),
            shutdown_notifier,
        }
    }

    /// Forward frame to the dispatcher of the channel, if any.
    fn forward(&self, channel_id: AmqpChannelId, frame: Frame) {
        match self.channel_manager.get_dispatcher(&channel_id) {
            Some(dispatcher) => {
                if let Err(err) = dispatcher.send(frame) {
                    debug!(
                        "dispatcher of channel {} already exited, discard frame: {}",
                        channel_id, err.0
                    );
                }
            }
            None => {
                debug!(
                    "no dispatcher registered for channel {}, discard frame: {}",
                    channel_id, frame
                );
            }
        }
    }

    /// Notify every channel that the connection is gone.
    fn broadcast_close(&self, close: &Close) {
        for (channel_id, resource) in self.channel_manager.dispatched_channels() {
            if let Some(dispatcher) = resource.dispatcher_tx.as_ref() {
                if dispatcher.send(close.clone().into_frame()).is_err() {
                    trace!("dispatcher of channel {} already exited", channel_id);
                }
            }
        }
    }

    async fn handle_close(&mut self, close: Close) -> Result<(), Error> {
        warn!(
            "connection '{}' closed by broker: {}",
            self.status.name(),
            close
        );
        self.broadcast_close(&close);
        if let Some(mut callback) = self.callback.take() {
            callback.close(self.status.name(), close).await;
            self.callback.replace(callback);
        }
        // a client close in flight is answered by this close instead
        self.channel_manager.remove_resource(&CONN_DEFAULT_CHANNEL);

        self.outgoing_tx
            .send((CONN_DEFAULT_CHANNEL, CloseOk.into_frame()))
            .await?;
        self.status.state().transition(ConnectionState::Closed);
        Ok(())
    }

    fn handle_close_ok(&mut self, close_ok: CloseOk) {
        self.status.state().transition(ConnectionState::Closed);

        // no responder when the close was sent on drop
        match self
            .channel_manager
            .remove_responder(&CONN_DEFAULT_CHANNEL, CloseOk::header())
        {
            Some(responder) => {
                if responder
                    .send(IncomingMessage::Ok(close_ok.into_frame()))
                    .is_err()
                {
                    debug!(
                        "requester of close gone on connection '{}'",
                        self.status.name()
                    );
                }
            }
            None => debug!(
                "no responder for close-ok on connection '{}'",
                self.status.name()
            ),
        }
    }

    async fn handle_connection_frame(&mut self, frame: Frame) -> Result<(), Error> {
        match frame {
            // Broker request to close connection
            Frame::Close(_, close) => self.handle_close(close).await,
            // Close connection response from broker
            Frame::CloseOk(_, close_ok) => {
                self.handle_close_ok(close_ok);
                Ok(())
            }
            Frame::Blocked(_, blocked) => {
                info!(
                    "connection '{}' blocked by broker, reason: {}",
                    self.status.name(),
                    blocked.reason
                );
                if let Some(ref mut callback) = self.callback {
                    callback.blocked(self.status.name(), blocked.reason).await;
                }
                Ok(())
            }
            Frame::Unblocked(..) => {
                info!("connection '{}' unblocked by broker", self.status.name());
                if let Some(ref mut callback) = self.callback {
                    callback.unblocked(self.status.name()).await;
                }
                Ok(())
            }
            unexpected => {
                warn!(
                    "unexpected frame {} on default channel of connection '{}', discarded",
                    unexpected,
                    self.status.name()
                );
                Ok(())
            }
        }
    }

    /// If OK, continue to handle frames.
    /// If NOK, stop consuming frames.
    async fn handle_frame(&mut self, channel_id: AmqpChannelId, frame: Frame) -> Result<(), Error> {
        if channel_id == CONN_DEFAULT_CHANNEL {
            return self.handle_connection_frame(frame).await;
        }
        match frame {
            // Broker request to close channel
            Frame::CloseChannel(..) => {
                // first, respond to broker that we have received the request
                self.outgoing_tx
                    .send((channel_id, CloseChannelOk.into_frame()))
                    .await?;
                self.forward(channel_id, frame);
                self.channel_manager.remove_resource(&channel_id);
            }
            // Close channel response from broker
            Frame::CloseChannelOk(..) => {
                self.forward(channel_id, frame);
                self.channel_manager.remove_resource(&channel_id);
            }
            _ => self.forward(channel_id, frame),
        }
        Ok(())
    }

    fn handle_command(&mut self, command: ConnManagementCommand) {
        match command {
            ConnManagementCommand::RegisterChannelResource(cmd) => {
                let id = self
                    .channel_manager
                    .insert_resource(cmd.channel_id, cmd.resource);
                if id.is_none() {
                    debug!(
                        "no channel id available on connection '{}', channel_max = {}",
                        self.status.name(),
                        self.channel_manager.channel_max()
                    );
                }
                if cmd.acker.send(id).is_err() {
                    debug!("requester of channel resource gone before acknowledgement");
                }
            }
            ConnManagementCommand::RegisterResponder(cmd) => {
                self.channel_manager.insert_responder(
                    &cmd.channel_id,
                    cmd.method_header,
                    cmd.responder,
                );
                if cmd.acker.send(()).is_err() {
                    debug!("requester of responder gone before acknowledgement");
                }
            }
            ConnManagementCommand::RegisterConnectionCallback(cmd) => {
                self.callback.replace(cmd.callback);
                debug!("callback registered on connection '{}'", self.status.name());
            }
        }
    }

    pub async fn run_until_shutdown(mut self) {
        trace!("starts up reader handler of connection '{}'", self.status.name());

        let mut failure = None;
        let mut commands_closed = false;
        loop {
            tokio::select! {
                biased;

                command = self.conn_mgmt_rx.recv(), if !commands_closed => {
                    match command {
                        // all connection handles dropped, keep reading until closed
                        None => commands_closed = true,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }

                res = self.stream.read_frame() => {
                    match res {
                        Ok((channel_id, frame)) => {
                            trace!("received frame {} on channel {}", frame, channel_id);
                            if let Err(err) = self.handle_frame(channel_id, frame).await {
                                error!("failed to handle frame on connection '{}', cause: {}", self.status.name(), err);
                                failure = Some(err);
                                break;
                            }
                            if self.status.state().get() == ConnectionState::Closed {
                                info!("connection '{}' is closed", self.status.name());
                                break;
                            }
                        },
                        Err(err) => {
                            let err = Error::from(err);
                            match self.status.state().get() {
                                ConnectionState::Open => {
                                    error!("failed to read frame on connection '{}', cause: {}", self.status.name(), err);
                                    failure = Some(err);
                                }
                                _ => debug!("connection '{}' stream ended: {}", self.status.name(), err),
                            }
                            break;
                        },
                    }
                }
            }
        }

        if let Some(err) = failure {
            self.status.set_network_failure();
            let close = Close::new(CONNECTION_FORCED, &format!("transport failure: {}", err));
            self.broadcast_close(&close);
            if let Some(mut callback) = self.callback.take() {
                callback.close(self.status.name(), close).await;
            }
        }
        self.status.state().transition(ConnectionState::Closed);

        // `self` will drop, so every dispatcher sees its frame channel closed,
        // and the writer is notified through `shutdown_notifier`
        debug!("shutdown reader handler of connection '{}'", self.status.name());
    }
}
