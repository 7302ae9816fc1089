use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace};

use super::{FrameWriter, OutgoingMessage};

pub(crate) struct WriterHandler {
    stream: Box<dyn FrameWriter>,
    /// receiver half to forward outgoing messages from connection/channels to the broker
    outgoing_rx: mpsc::Receiver<OutgoingMessage>,
    /// listener of shutdown signal
    shutdown: broadcast::Receiver<()>,
    connection_name: String,
}

impl WriterHandler {
    pub fn new(
        stream: Box<dyn FrameWriter>,
        outgoing_rx: mpsc::Receiver<OutgoingMessage>,
        shutdown: broadcast::Receiver<()>,
        connection_name: String,
    ) -> Self {
        Self {
            stream,
            outgoing_rx,
            shutdown,
            connection_name,
        }
    }

    pub async fn run_until_shutdown(mut self) {
        trace!("starts up writer handler of connection '{}'", self.connection_name);
        loop {
            tokio::select! {
                // frames queued before shutdown are flushed first
                biased;

                channel_frame = self.outgoing_rx.recv() => {
                    let (channel_id, frame) = match channel_frame {
                        None => break,
                        Some(v) => v,
                    };
                    trace!("sending frame {} on channel {}", frame, channel_id);
                    if let Err(err) = self.stream.write_frame(channel_id, frame).await {
                        error!(
                            "failed to send frame over network on connection '{}', cause: {}",
                            self.connection_name, err
                        );
                        break;
                    }
                }
                _ = self.shutdown.recv() => {
                    debug!("writer handler of connection '{}' received shutdown notification", self.connection_name);
                    break;
                }
            }
        }
        if let Err(err) = self.stream.close().await {
            debug!("failed to close writer of connection '{}', cause: {}", self.connection_name, err);
        }
        debug!("shutdown writer handler of connection '{}'", self.connection_name);
    }
}
