//! Consumers of deliveries.
//!
//! [`Consumer`] is a lazy feed returned by [`Channel::basic_consume`], while [`AsyncConsumer`]
//! is invoked for each delivery by a task spawned by [`Channel::basic_consume_with`].
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, info, trace};

use crate::frame::{BasicProperties, Deliver, DeliveryTag};

use super::{
    channel::{BasicAckArguments, BasicConsumeArguments, Channel},
    Result,
};

/// An inbound message.
#[derive(Debug, Clone)]
pub struct Delivery {
    consumer_tag: String,
    delivery_tag: DeliveryTag,
    redelivered: bool,
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    content: Bytes,
}

impl From<Deliver> for Delivery {
    fn from(deliver: Deliver) -> Self {
        Self {
            consumer_tag: deliver.consumer_tag,
            delivery_tag: deliver.delivery_tag,
            redelivered: deliver.redelivered,
            exchange: deliver.exchange,
            routing_key: deliver.routing_key,
            properties: deliver.properties,
            content: deliver.content,
        }
    }
}

impl Delivery {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Unique within the channel.
    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "delivery {} to consumer '{}' (exchange = '{}', routing_key = '{}', redelivered = {}, {} bytes)",
            self.delivery_tag,
            self.consumer_tag,
            self.exchange,
            self.routing_key,
            self.redelivered,
            self.content.len()
        )
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Live feed of deliveries to one consumer.
///
/// The feed ends when the consumer is cancelled by either peer or the channel closes.
/// Deliveries already received stay the caller's responsibility to acknowledge.
///
/// Dropping the consumer cancels it on the broker without waiting for the response.
pub struct Consumer {
    channel: Channel,
    args: BasicConsumeArguments,
    registration: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
    cancelled: bool,
}

impl Consumer {
    pub(crate) fn new(
        channel: Channel,
        args: BasicConsumeArguments,
        registration: u64,
        rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            channel,
            args,
            registration,
            rx,
            cancelled: false,
        }
    }

    /// Next delivery, `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn consumer_tag(&self) -> &str {
        &self.args.consumer_tag
    }

    /// Arguments to restart the same feed, e.g. on a channel of a new connection.
    ///
    /// The consumer tag is the one actually in use, generated or not.
    pub fn arguments(&self) -> &BasicConsumeArguments {
        &self.args
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Cancel the consumer and wait for the broker to confirm.
    ///
    /// Buffered deliveries not yet received are rejected with requeue.
    pub async fn cancel(mut self) -> Result<()> {
        self.cancelled = true;
        if !self.channel.is_open() {
            return Ok(());
        }
        self.channel
            .cancel_consumer(&self.args.consumer_tag, self.registration)
            .await
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if !self.cancelled {
            trace!("drop and cancel consumer '{}' on {}", self.args.consumer_tag, self.channel);
            self.channel
                .deregister_consumer(&self.args.consumer_tag, Some(self.registration), true);
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("consumer_tag", &self.args.consumer_tag)
            .field("queue", &self.args.queue)
            .field("channel", &self.channel)
            .finish()
    }
}

/////////////////////////////////////////////////////////////////////////////
/// Callback style consumer.
#[async_trait]
pub trait AsyncConsumer {
    async fn consume(&mut self, channel: &Channel, delivery: Delivery);
}

/// Log each delivery, and ack it unless the consumer is in auto-ack mode.
pub struct DefaultConsumer {
    no_ack: bool,
}

impl DefaultConsumer {
    pub fn new(no_ack: bool) -> Self {
        Self { no_ack }
    }
}

#[async_trait]
impl AsyncConsumer for DefaultConsumer {
    async fn consume(&mut self, channel: &Channel, delivery: Delivery) {
        info!(
            "consume {}, content: {}",
            delivery,
            String::from_utf8_lossy(delivery.content())
        );

        // ack explicitly if no_ack = false
        if !self.no_ack {
            let args = BasicAckArguments::new(delivery.delivery_tag(), false);
            if let Err(err) = channel.basic_ack(args).await {
                error!("failed to ack {} on {}, cause: {}", delivery, channel, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::{
        sync::mpsc,
        time::{self, Duration},
    };

    use super::{AsyncConsumer, DefaultConsumer, Delivery};
    use crate::{
        broker::MemoryBroker,
        channel::{
            BasicCancelArguments, BasicConsumeArguments, BasicPublishArguments, Channel,
            QueueDeclareArguments,
        },
        connection::{Connection, OpenConnectionArguments},
        frame::BasicProperties,
        test_utils::setup_logging,
    };

    struct Forwarder(mpsc::UnboundedSender<Delivery>);

    #[async_trait]
    impl AsyncConsumer for Forwarder {
        async fn consume(&mut self, _channel: &Channel, delivery: Delivery) {
            self.0.send(delivery).ok();
        }
    }

    async fn channel_with_queue(broker: &MemoryBroker, queue: &str) -> (Connection, Channel) {
        let args = OpenConnectionArguments::new("localhost", 5672, "guest", "guest");
        let connection = Connection::open(&args, &broker.connector()).await.unwrap();
        let channel = connection.open_channel().await.unwrap();
        channel
            .queue_declare(QueueDeclareArguments::new(queue))
            .await
            .unwrap();
        for content in ["one", "two"] {
            channel
                .basic_publish_untracked(
                    BasicProperties::default(),
                    content,
                    BasicPublishArguments::new("", queue),
                )
                .await
                .unwrap();
        }
        (connection, channel)
    }

    #[tokio::test]
    async fn test_callback_consumer_until_cancel() {
        setup_logging();
        let broker = MemoryBroker::new();
        let (connection, channel) = channel_with_queue(&broker, "callback.forward").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let args = BasicConsumeArguments::new("callback.forward", "")
            .no_ack(true)
            .finish();
        let consumer_tag = channel
            .basic_consume_with(Forwarder(tx), args)
            .await
            .unwrap();
        assert!(consumer_tag.starts_with("ctag-"));

        for expected in ["one", "two"] {
            let delivery = time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(expected.as_bytes(), &delivery.content()[..]);
            assert_eq!(consumer_tag, delivery.consumer_tag());
        }

        channel
            .basic_cancel(BasicCancelArguments::new(&consumer_tag))
            .await
            .unwrap();
        // the consumer task exits and drops the forwarder
        let ended = time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(ended, Ok(None)));

        connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_consumer_acks() {
        setup_logging();
        let broker = MemoryBroker::new();
        let (connection, channel) = channel_with_queue(&broker, "callback.default").await;

        let args = BasicConsumeArguments::new("callback.default", "default")
            .manual_ack(true)
            .finish();
        channel
            .basic_consume_with(DefaultConsumer::new(args.no_ack), args)
            .await
            .unwrap();

        let mut settled = false;
        for _ in 0..100 {
            if broker.queue_depth("callback.default") == Some(0)
                && broker.queue_unacked("callback.default") == Some(0)
            {
                settled = true;
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled);
        assert_eq!(0, channel.outstanding_deliveries());

        connection.close().await.unwrap();
    }
}
