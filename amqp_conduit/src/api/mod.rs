use self::error::Error;
pub(crate) type Result<T> = std::result::Result<T, Error>;

/////////////////////////////////////////////////////////////////////////////
pub mod callbacks;
pub mod channel;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod security;
pub mod state;
pub mod tls;
