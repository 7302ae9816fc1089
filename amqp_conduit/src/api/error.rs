//! Error type can be returned by the APIs.

use std::fmt;

use tokio::sync::{mpsc::error::SendError, oneshot::error::RecvError};

use crate::frame::ReplyCode;

/// A list of errors can be returned by the APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Error during opening a connection.
    ConnectionOpenError(String),
    /// Transport-level failure, fatal to the connection and all its channels.
    ConnectionError(String),
    /// Error during closing a connection.
    ConnectionCloseError(String),
    /// Error scoped to one channel.
    ChannelError(ChannelError),
    PublishError(PublishError),
    ConsumeError(ConsumeError),
    /// The broker rejected a declarative or other synchronous channel request.
    /// Only the channel it was sent on is closed.
    DeclareError {
        reply_code: ReplyCode,
        reply_text: String,
    },
    /// Error when using the channel. Usually due to incorrect usage by user.
    ChannelUseError(String),
    /// Invalid connection URI.
    UriError(String),
    /// Error in sending or receiving messages via internal communication channel.
    InternalChannelError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelError {
    ChannelClosed,
    /// All `channel_max` ids of the connection are in use.
    ChannelLimitExceeded(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PublishError {
    /// The broker could not route a mandatory message and returned it.
    Unroutable,
    /// The broker received the message but refused it.
    BrokerRejected,
    /// No broker response within the wait timeout. The message may still be confirmed later.
    ConfirmTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConsumeError {
    QueueNotFound(String),
    ConsumerTagConflict(String),
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        Self::ChannelError(err)
    }
}
impl From<PublishError> for Error {
    fn from(err: PublishError) -> Self {
        Self::PublishError(err)
    }
}
impl From<ConsumeError> for Error {
    fn from(err: ConsumeError) -> Self {
        Self::ConsumeError(err)
    }
}
impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}
impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        Self::InternalChannelError(err.to_string())
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelError::ChannelClosed => f.write_str("channel closed"),
            ChannelError::ChannelLimitExceeded(max) => {
                write!(f, "channel limit exceeded, channel_max = {}", max)
            }
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublishError::Unroutable => f.write_str("message returned as unroutable"),
            PublishError::BrokerRejected => f.write_str("message rejected by broker"),
            PublishError::ConfirmTimeout => f.write_str("timed out waiting for confirmation"),
        }
    }
}

impl fmt::Display for ConsumeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConsumeError::QueueNotFound(queue) => write!(f, "queue '{}' not found", queue),
            ConsumeError::ConsumerTagConflict(tag) => {
                write!(f, "consumer tag '{}' already in use", tag)
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConnectionOpenError(msg) => write!(f, "AMQP connection open error: {}", msg),
            Error::ConnectionError(msg) => write!(f, "AMQP connection error: {}", msg),
            Error::ConnectionCloseError(msg) => write!(f, "AMQP connection close error: {}", msg),
            Error::ChannelError(err) => write!(f, "AMQP channel error: {}", err),
            Error::PublishError(err) => write!(f, "AMQP publish error: {}", err),
            Error::ConsumeError(err) => write!(f, "AMQP consume error: {}", err),
            Error::DeclareError {
                reply_code,
                reply_text,
            } => write!(f, "AMQP declare error: {}: {}", reply_code, reply_text),
            Error::ChannelUseError(msg) => write!(f, "AMQP channel usage error: {}", msg),
            Error::UriError(msg) => write!(f, "AMQP uri error: {}", msg),
            Error::InternalChannelError(msg) => {
                write!(f, "internal communication error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for ChannelError {}
impl std::error::Error for PublishError {}
impl std::error::Error for ConsumeError {}

#[cfg(test)]
mod tests {
    use super::{ChannelError, Error, PublishError};

    #[test]
    fn test_display() {
        assert_eq!(
            "AMQP channel error: channel limit exceeded, channel_max = 3",
            Error::from(ChannelError::ChannelLimitExceeded(3)).to_string()
        );
        assert_eq!(
            "AMQP declare error: 406: PRECONDITION_FAILED",
            Error::DeclareError {
                reply_code: 406,
                reply_text: "PRECONDITION_FAILED".to_owned()
            }
            .to_string()
        );
        assert_eq!(
            Error::PublishError(PublishError::ConfirmTimeout),
            PublishError::ConfirmTimeout.into()
        );
    }
}
