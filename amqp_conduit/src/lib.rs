//! AMQP 0-9-1 client core.
//!
//! Connections multiplex channels over one [transport](net::Transport). Each channel tracks
//! publisher confirms, enforces prefetch limits on deliveries and dispatches them to consumers.
//!
//! This library is based on async tokio runtime. An in-process [broker](broker::MemoryBroker)
//! implements the broker side of the transport for tests and demos.
//!
//! # Example
//! ```rust
//! use amqp_conduit::{
//!     broker::MemoryBroker,
//!     channel::{BasicConsumeArguments, BasicPublishArguments, ConfirmSelectArguments, QueueDeclareArguments},
//!     connection::{Connection, OpenConnectionArguments},
//!     BasicProperties,
//! };
//! use tokio::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let broker = MemoryBroker::new();
//! let args = OpenConnectionArguments::new("localhost", 5672, "guest", "guest");
//! let connection = Connection::open(&args, &broker.connector()).await.unwrap();
//!
//! let channel = connection.open_channel().await.unwrap();
//! let queue = channel
//!     .queue_declare(QueueDeclareArguments::new("hello"))
//!     .await
//!     .unwrap()
//!     .unwrap();
//!
//! channel.confirm_select(ConfirmSelectArguments::default()).await.unwrap();
//! let confirmation = channel
//!     .basic_publish(BasicProperties::default(), "hi", BasicPublishArguments::new("", &queue.name))
//!     .await
//!     .unwrap();
//! assert!(confirmation.wait(Duration::from_secs(1)).await.unwrap().is_acked());
//!
//! let mut consumer = channel
//!     .basic_consume(BasicConsumeArguments::new(&queue.name, "").no_ack(true).finish())
//!     .await
//!     .unwrap();
//! let delivery = consumer.recv().await.unwrap();
//! assert_eq!(&b"hi"[..], &delivery.content()[..]);
//!
//! channel.close().await.unwrap();
//! connection.close().await.unwrap();
//! # }
//! ```

// macro should appear before module declaration
#[macro_use]
mod helpers {
    macro_rules! impl_chainable_setter {
        ($(#[$meta:meta])* $field:ident, $ty:ty) => {
            $(#[$meta])*
            pub fn $field(&mut self, $field: $ty) -> &mut Self {
                self.$field = $field;
                self
            }
        };
    }
}

mod api;
pub mod broker;
pub mod frame;
pub mod net;
mod utils;

#[cfg(test)]
mod test_utils;

// public API
pub use api::*;
pub use frame::{
    AmqpChannelId, BasicProperties, Blocked, Cancel, Close, CloseChannel, Deliver, DeliveryTag,
    Frame, MethodHeader, ReplyCode, Return, DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT,
};

