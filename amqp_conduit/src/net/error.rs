use std::{fmt, io};

use tokio::sync::mpsc::error::SendError;

/// Failures of the connection tasks, never surfaced to the API directly.
#[derive(Debug)]
pub(crate) enum Error {
    NetworkIoError(String),
    InternalChannelError(String),
    PeerShutdown,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::PeerShutdown,
            _ => Error::NetworkIoError(err.to_string()),
        }
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        Error::InternalChannelError(err.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NetworkIoError(msg) => write!(f, "network io error: {}", msg),
            Error::InternalChannelError(msg) => write!(f, "internal channel error: {}", msg),
            Error::PeerShutdown => f.write_str("peer shutdown"),
        }
    }
}

impl std::error::Error for Error {}
