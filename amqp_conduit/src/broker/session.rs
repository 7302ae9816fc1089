use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{state::ConnectionId, Shared};
use crate::{net::loopback::PeerEnd, utils::lock};

/// Serve one client until it closes, its transport is dropped or the broker severs it.
///
/// Returning drops `peer`, which the client observes as end of stream.
pub(super) async fn serve(
    shared: Arc<Shared>,
    connection: ConnectionId,
    mut peer: PeerEnd,
    mut sever_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = sever_rx.recv() => {
                warn!("connection {} severed", connection);
                break;
            }
            incoming = peer.recv() => match incoming {
                Some((channel_id, frame)) => {
                    if !lock(&shared.state).handle_frame(connection, channel_id, frame) {
                        debug!("connection {} closed", connection);
                        break;
                    }
                }
                None => {
                    debug!("connection {} dropped by client", connection);
                    break;
                }
            },
        }
    }
    lock(&shared.state).drop_connection(connection);
}
