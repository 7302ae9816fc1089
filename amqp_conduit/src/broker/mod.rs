//! In-process broker.
//!
//! [`MemoryBroker`] speaks the broker side of the frame protocol over loopback transports,
//! enough to drive a [`Connection`] without a network: exchanges of type direct, fanout and
//! topic, queues with round robin delivery, manual acknowledgements with requeue, publisher
//! confirms and mandatory returns. Prefetch limits are accepted but enforced by the client only.
//!
//! Failure can be injected with [`MemoryBroker::sever_connections`], which drops every
//! transport as a network failure would.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use amqp_conduit::{
//!     broker::MemoryBroker,
//!     connection::{Connection, OpenConnectionArguments},
//! };
//!
//! let broker = MemoryBroker::new();
//! broker.add_user("app", "secret");
//!
//! let args = OpenConnectionArguments::new("localhost", 5672, "app", "secret");
//! let connection = Connection::open(&args, &broker.connector()).await.unwrap();
//! assert_eq!(1, broker.connection_count());
//!
//! let bad_args = OpenConnectionArguments::new("localhost", 5672, "app", "wrong");
//! assert!(Connection::open(&bad_args, &broker.connector()).await.is_err());
//! # connection.close().await.unwrap();
//! # }
//! ```
//!
//! [`Connection`]: crate::connection::Connection
use std::{
    io,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    api::{security::SecurityCredentials, tls::TlsMaterial},
    frame::{Blocked, Close, ReplyCode, Unblocked},
    net::{loopback, Connector, Transport},
    utils::lock,
};

mod routing;
mod session;
mod state;

use state::{BrokerState, DEFAULT_VIRTUAL_HOST};

struct Shared {
    state: Mutex<BrokerState>,
    sever_tx: broadcast::Sender<()>,
}

/// Broker living in the current process.
///
/// Cloning returns a handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker with user `guest`/`guest` and the virtual host `/`.
    pub fn new() -> Self {
        let (sever_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                sever_tx,
            }),
        }
    }

    pub fn add_user(&self, username: &str, password: &str) {
        lock(&self.shared.state).add_user(username, password);
    }

    pub fn add_vhost(&self, name: &str) {
        lock(&self.shared.state).add_vhost(name);
    }

    /// Channel limit announced to new connections, `0` for no limit.
    pub fn set_channel_max(&self, channel_max: u16) {
        lock(&self.shared.state).set_channel_max(channel_max);
    }

    /// Refuse connections without TLS material.
    pub fn require_tls(&self, required: bool) {
        lock(&self.shared.state).set_tls_required(required);
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: self.shared.clone(),
        }
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.shared.state).connection_count()
    }

    /// Drop every open transport without a closing handshake.
    pub fn sever_connections(&self) {
        warn!("sever all connections");
        // no receiver means no connection to sever
        let _ = self.shared.sever_tx.send(());
    }

    /// Close every connection with `connection.close`.
    pub fn close_connections(&self, reply_code: ReplyCode, reply_text: &str) {
        info!("close all connections: {}: {}", reply_code, reply_text);
        lock(&self.shared.state).broadcast(Close::new(reply_code, reply_text).into_frame());
    }

    /// Notify every connection that publishing is blocked.
    pub fn block_connections(&self, reason: &str) {
        let blocked = Blocked {
            reason: reason.to_owned(),
        };
        lock(&self.shared.state).broadcast(blocked.into_frame());
    }

    pub fn unblock_connections(&self) {
        lock(&self.shared.state).broadcast(Unblocked.into_frame());
    }

    /// Ready messages in `queue` of the default virtual host, `None` if there is no such queue.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        lock(&self.shared.state).queue_depth(DEFAULT_VIRTUAL_HOST, queue)
    }

    /// Messages of `queue` delivered and waiting for acknowledgement.
    pub fn queue_unacked(&self, queue: &str) -> Option<usize> {
        lock(&self.shared.state).queue_unacked(DEFAULT_VIRTUAL_HOST, queue)
    }

    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        lock(&self.shared.state).consumer_count(DEFAULT_VIRTUAL_HOST, queue)
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Connector to a [`MemoryBroker`], the address is ignored.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &str,
        virtual_host: &str,
        credentials: &SecurityCredentials,
        tls: Option<&TlsMaterial>,
    ) -> io::Result<Box<dyn Transport>> {
        let (transport, peer, connection) = {
            let mut state = lock(&self.shared.state);
            if state.tls_required() && tls.is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "broker accepts TLS connections only".to_owned(),
                ));
            }
            match credentials.mechanism_name() {
                "EXTERNAL" => {
                    if !tls.map_or(false, TlsMaterial::has_client_auth) {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            "EXTERNAL authentication requires a client certificate".to_owned(),
                        ));
                    }
                }
                _ => {
                    let response = credentials.response();
                    let mut fields = response.splitn(3, '\0').skip(1);
                    let username = fields.next().unwrap_or_default();
                    let password = fields.next().unwrap_or_default();
                    if !state.authenticate(username, password) {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            format!("ACCESS_REFUSED - login refused for user '{}'", username),
                        ));
                    }
                }
            }
            if !state.has_vhost(virtual_host) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("NOT_ALLOWED - vhost '{}' not found", virtual_host),
                ));
            }
            let (transport, peer) = loopback::pair(state.channel_max());
            let connection = state.register_connection(virtual_host, peer.sender());
            (transport, peer, connection)
        };

        info!(
            "accept connection {} to {} for vhost '{}'",
            connection, address, virtual_host
        );
        let sever_rx = self.shared.sever_tx.subscribe();
        tokio::spawn(session::serve(
            self.shared.clone(),
            connection,
            peer,
            sever_rx,
        ));
        Ok(Box::new(transport))
    }
}
