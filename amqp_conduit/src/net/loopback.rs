//! In-process transport.
//!
//! [`pair`] returns the client half, which implements [`Transport`], and the
//! [`PeerEnd`] played by a broker. The memory broker is built on it, and tests use
//! it directly to script broker responses frame by frame.
use std::{io, sync::Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    api::{security::SecurityCredentials, tls::TlsMaterial},
    frame::{AmqpChannelId, Frame},
};

use super::{Connector, FrameReader, FrameWriter, Transport};

type ChannelFrame = (AmqpChannelId, Frame);

/// Create a connected transport pair.
pub fn pair(channel_max: u16) -> (LoopbackTransport, PeerEnd) {
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            channel_max,
            rx: to_client_rx,
            tx: to_peer_tx,
        },
        PeerEnd {
            tx: PeerSender { tx: to_client_tx },
            rx: to_peer_rx,
        },
    )
}

pub struct LoopbackTransport {
    channel_max: u16,
    rx: mpsc::UnboundedReceiver<ChannelFrame>,
    tx: mpsc::UnboundedSender<ChannelFrame>,
}

impl Transport for LoopbackTransport {
    fn channel_max(&self) -> u16 {
        self.channel_max
    }

    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (
            Box::new(LoopbackReader { rx: self.rx }),
            Box::new(LoopbackWriter { tx: Some(self.tx) }),
        )
    }
}

struct LoopbackReader {
    rx: mpsc::UnboundedReceiver<ChannelFrame>,
}

#[async_trait]
impl FrameReader for LoopbackReader {
    async fn read_frame(&mut self) -> io::Result<ChannelFrame> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer shutdown"))
    }
}

struct LoopbackWriter {
    tx: Option<mpsc::UnboundedSender<ChannelFrame>>,
}

#[async_trait]
impl FrameWriter for LoopbackWriter {
    async fn write_frame(&mut self, channel_id: AmqpChannelId, frame: Frame) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "writer closed"))?;
        tx.send((channel_id, frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer shutdown"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// Broker side of a loopback transport.
pub struct PeerEnd {
    tx: PeerSender,
    rx: mpsc::UnboundedReceiver<ChannelFrame>,
}

impl PeerEnd {
    /// Next frame written by the client, `None` once the client closed its writer.
    pub async fn recv(&mut self) -> Option<ChannelFrame> {
        self.rx.recv().await
    }

    pub fn send(&self, channel_id: AmqpChannelId, frame: Frame) -> io::Result<()> {
        self.tx.send(channel_id, frame)
    }

    pub fn sender(&self) -> PeerSender {
        self.tx.clone()
    }
}

/// Cloneable handle to push frames to the client.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<ChannelFrame>,
}

impl PeerSender {
    pub fn send(&self, channel_id: AmqpChannelId, frame: Frame) -> io::Result<()> {
        self.tx
            .send((channel_id, frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client shutdown"))
    }
}

/// Connector that hands out one pre-built loopback transport.
///
/// Useful to drive a [`Connection`] against a scripted peer.
///
/// [`Connection`]: crate::connection::Connection
pub struct LoopbackConnector {
    transport: Mutex<Option<LoopbackTransport>>,
}

impl LoopbackConnector {
    pub fn new(channel_max: u16) -> (Self, PeerEnd) {
        let (transport, peer) = pair(channel_max);
        (
            Self {
                transport: Mutex::new(Some(transport)),
            },
            peer,
        )
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        _address: &str,
        _virtual_host: &str,
        _credentials: &SecurityCredentials,
        _tls: Option<&TlsMaterial>,
    ) -> io::Result<Box<dyn Transport>> {
        let transport = self
            .transport
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "connector poisoned"))?
            .take()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrInUse, "loopback transport already taken")
            })?;
        Ok(Box::new(transport))
    }
}
