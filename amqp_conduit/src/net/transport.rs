//! Transport collaborator of a connection.
//!
//! A [`Connector`] dials a broker and returns a [`Transport`]: an already negotiated,
//! optionally TLS-wrapped, bidirectional stream of frames. The connection splits it
//! into a [`FrameReader`] owned by the reader task and a [`FrameWriter`] owned by the
//! writer task.
use std::io;

use async_trait::async_trait;

use crate::{
    api::{security::SecurityCredentials, tls::TlsMaterial},
    frame::{AmqpChannelId, Frame},
};

#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial `address` (`host:port`) and authenticate against `virtual_host`.
    ///
    /// `tls` is `None` for a plaintext connection.
    async fn connect(
        &self,
        address: &str,
        virtual_host: &str,
        credentials: &SecurityCredentials,
        tls: Option<&TlsMaterial>,
    ) -> io::Result<Box<dyn Transport>>;
}

pub trait Transport: Send {
    /// Maximum number of channels the broker accepts, `0` means no limit.
    fn channel_max(&self) -> u16;

    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

#[async_trait]
pub trait FrameReader: Send {
    /// Read next frame and the channel it belongs to.
    ///
    /// Any error, including end of stream, is a transport failure.
    async fn read_frame(&mut self) -> io::Result<(AmqpChannelId, Frame)>;
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, channel_id: AmqpChannelId, frame: Frame) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}
