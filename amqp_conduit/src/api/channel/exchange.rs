use std::fmt;

use crate::{
    api::Result,
    frame::{Declare, DeclareOk},
};

use super::Channel;

/// Exchange types supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Direct,
    Fanout,
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ExchangeType {
    type Error = String;

    fn try_from(typ: &str) -> std::result::Result<Self, Self::Error> {
        match typ {
            "direct" => Ok(ExchangeType::Direct),
            "fanout" => Ok(ExchangeType::Fanout),
            "topic" => Ok(ExchangeType::Topic),
            other => Err(format!("unsupported exchange type '{}'", other)),
        }
    }
}

/// Arguments for [`exchange_declare`]
///
/// [`exchange_declare`]: Channel::exchange_declare
#[derive(Debug, Clone)]
pub struct ExchangeDeclareArguments {
    pub exchange: String,
    pub typ: ExchangeType,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
}

impl ExchangeDeclareArguments {
    /// Create declare arguments with defaults
    pub fn new(exchange: &str, typ: ExchangeType) -> Self {
        Self {
            exchange: exchange.to_owned(),
            typ,
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
        }
    }

    impl_chainable_setter! {
        passive, bool
    }
    impl_chainable_setter! {
        durable, bool
    }
    impl_chainable_setter! {
        auto_delete, bool
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Declare an exchange, redeclaring with a different type fails with
    /// [`Error::DeclareError`] and closes the channel.
    ///
    /// [`Error::DeclareError`]: crate::error::Error::DeclareError
    pub async fn exchange_declare(&self, args: ExchangeDeclareArguments) -> Result<()> {
        let declare = Declare {
            exchange: args.exchange,
            typ: args.typ.as_str().to_owned(),
            passive: args.passive,
            durable: args.durable,
            auto_delete: args.auto_delete,
            internal: args.internal,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_no_wait(declare.into_frame()).await
        } else {
            self.synchronous_request(declare.into_frame(), DeclareOk::header())
                .await
                .map(|_| ())
        }
    }
}
