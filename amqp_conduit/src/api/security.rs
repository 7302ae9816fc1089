//! This module provides configuration API of Security and Access Control.
//!
//! The configuration is used as part of [`OpenConnectionArguments`] value.
//!
//! [`OpenConnectionArguments`]: crate::connection::OpenConnectionArguments
use std::fmt;

/// Credentials used to open a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityCredentials {
    username: String,
    password: String,
    mechanism: AuthenticationMechanism,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
enum AuthenticationMechanism {
    PLAIN,
    EXTERNAL,
}

impl SecurityCredentials {
    /// Create and return a SASL/PLAIN credential with given `username` and `password`.
    ///
    /// See [RabbitMQ access control](https://www.rabbitmq.com/access-control.html#mechanisms).
    pub fn new_plain(username: &str, password: &str) -> Self {
        Self {
            username: username.to_owned(),
            password: password.to_owned(),
            mechanism: AuthenticationMechanism::PLAIN,
        }
    }

    /// Create and return EXTERNAL without credentials
    ///
    /// This must be used together with a TLS connection presenting a client certificate.
    pub fn new_external() -> Self {
        Self {
            username: "".to_owned(),
            password: "".to_owned(),
            mechanism: AuthenticationMechanism::EXTERNAL,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Name of authentication mechanism of current credential
    pub fn mechanism_name(&self) -> &str {
        match self.mechanism {
            AuthenticationMechanism::PLAIN => "PLAIN",
            AuthenticationMechanism::EXTERNAL => "EXTERNAL",
        }
    }

    /// The security challenge `response` string, to be sent to the broker.
    pub fn response(&self) -> String {
        match self.mechanism {
            AuthenticationMechanism::PLAIN => format!("\0{}\0{}", self.username, self.password),
            AuthenticationMechanism::EXTERNAL => "".to_string(),
        }
    }
}

impl fmt::Debug for SecurityCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecurityCredentials")
            .field("username", &self.username)
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}
