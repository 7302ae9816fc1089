use std::sync::atomic::Ordering;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::{
    api::{
        consumer::{AsyncConsumer, Consumer},
        error::{ConsumeError, Error},
        Result,
    },
    frame::{
        Ack, BasicProperties, Cancel, CancelOk, Consume, ConsumeOk, DeliveryTag, Nack, Publish,
        Reject, NOT_ALLOWED, NOT_FOUND,
    },
    net::IncomingMessage,
    utils::lock,
};

use super::{Channel, ConfirmationHandle, DispatcherManagementCommand};

/// Arguments for [`basic_consume`].
///
/// # Example
/// ```
/// use amqp_conduit::channel::BasicConsumeArguments;
///
/// let args = BasicConsumeArguments::new("orders", "")
///     .manual_ack(true)
///     .exclusive(true)
///     .finish();
/// assert!(!args.no_ack);
/// ```
///
/// [`basic_consume`]: Channel::basic_consume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicConsumeArguments {
    pub queue: String,
    /// Empty to let the client generate a unique tag.
    pub consumer_tag: String,
    pub no_local: bool,
    /// Auto-ack mode: deliveries are settled when handed to the consumer.
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

impl BasicConsumeArguments {
    pub fn new(queue: &str, consumer_tag: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            consumer_tag: consumer_tag.to_owned(),
            ..Default::default()
        }
    }

    impl_chainable_setter! {
        no_local, bool
    }
    impl_chainable_setter! {
        no_ack, bool
    }
    impl_chainable_setter! {
        exclusive, bool
    }
    impl_chainable_setter! {
        no_wait, bool
    }

    /// Opposite of `no_ack`.
    pub fn manual_ack(&mut self, manual_ack: bool) -> &mut Self {
        self.no_ack = !manual_ack;
        self
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

/// Arguments for [`basic_cancel`].
///
/// [`basic_cancel`]: Channel::basic_cancel
#[derive(Debug, Clone, Default)]
pub struct BasicCancelArguments {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl BasicCancelArguments {
    pub fn new(consumer_tag: &str) -> Self {
        Self {
            consumer_tag: consumer_tag.to_owned(),
            no_wait: false,
        }
    }
}

/// Arguments for [`basic_ack`].
///
/// [`basic_ack`]: Channel::basic_ack
#[derive(Debug, Clone, Default)]
pub struct BasicAckArguments {
    pub delivery_tag: DeliveryTag,
    /// Settle every outstanding delivery up to and including `delivery_tag`.
    pub multiple: bool,
}

impl BasicAckArguments {
    pub fn new(delivery_tag: DeliveryTag, multiple: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
        }
    }
}

/// Arguments for [`basic_reject`].
///
/// [`basic_reject`]: Channel::basic_reject
#[derive(Debug, Clone, Default)]
pub struct BasicRejectArguments {
    pub delivery_tag: DeliveryTag,
    pub requeue: bool,
}

impl BasicRejectArguments {
    pub fn new(delivery_tag: DeliveryTag, requeue: bool) -> Self {
        Self {
            delivery_tag,
            requeue,
        }
    }
}

/// Arguments for [`basic_nack`].
///
/// [`basic_nack`]: Channel::basic_nack
#[derive(Debug, Clone, Default)]
pub struct BasicNackArguments {
    pub delivery_tag: DeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

impl BasicNackArguments {
    pub fn new(delivery_tag: DeliveryTag, multiple: bool, requeue: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
            requeue,
        }
    }
}

/// Arguments for [`basic_publish`].
///
/// [`basic_publish`]: Channel::basic_publish
#[derive(Debug, Clone, Default)]
pub struct BasicPublishArguments {
    pub exchange: String,
    pub routing_key: String,
    /// Return the message if no queue matches.
    pub mandatory: bool,
    pub immediate: bool,
}

impl BasicPublishArguments {
    pub fn new(exchange: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            mandatory: false,
            immediate: false,
        }
    }

    impl_chainable_setter! {
        mandatory, bool
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Start a consumer and return its feed of deliveries.
    ///
    /// # Errors
    ///
    /// * [`ConsumeError::ConsumerTagConflict`] if the tag is in use.
    /// * [`ConsumeError::QueueNotFound`] if the queue does not exist, the broker also closes
    ///   the channel in that case.
    pub async fn basic_consume(&self, mut args: BasicConsumeArguments) -> Result<Consumer> {
        self.ensure_open()?;
        if args.consumer_tag.is_empty() {
            args.consumer_tag = self.generate_consumer_tag();
        }
        if !lock(&self.shared.consumer_tags).insert(args.consumer_tag.clone()) {
            return Err(ConsumeError::ConsumerTagConflict(args.consumer_tag).into());
        }

        let registration = self.shared.consumer_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // registered before `basic.consume` is sent, so no delivery can overtake it
        if let Err(err) = self.send_command(DispatcherManagementCommand::RegisterConsumer {
            consumer_tag: args.consumer_tag.clone(),
            registration,
            no_ack: args.no_ack,
            tx,
        }) {
            lock(&self.shared.consumer_tags).remove(&args.consumer_tag);
            return Err(err);
        }
        let consumer = Consumer::new(self.clone(), args.clone(), registration, rx);

        let consume = Consume {
            queue: args.queue.clone(),
            consumer_tag: args.consumer_tag.clone(),
            no_local: args.no_local,
            no_ack: args.no_ack,
            exclusive: args.exclusive,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_frame(consume.into_frame()).await?;
        } else {
            // on error, dropping `consumer` deregisters it
            match self
                .synchronous_request_raw(consume.into_frame(), ConsumeOk::header())
                .await?
            {
                IncomingMessage::Ok(_) => {}
                IncomingMessage::Exception(NOT_FOUND, _) => {
                    return Err(ConsumeError::QueueNotFound(args.queue).into())
                }
                IncomingMessage::Exception(NOT_ALLOWED, _) => {
                    return Err(ConsumeError::ConsumerTagConflict(args.consumer_tag).into())
                }
                IncomingMessage::Exception(reply_code, reply_text) => {
                    return Err(Error::DeclareError {
                        reply_code,
                        reply_text,
                    })
                }
                IncomingMessage::ConnectionException(reply_code, reply_text) => {
                    return Err(Error::ConnectionError(format!(
                        "{}: {}",
                        reply_code, reply_text
                    )))
                }
            }
        }
        info!(
            "consumer '{}' started on queue '{}' of {}",
            args.consumer_tag, args.queue, self
        );
        Ok(consumer)
    }

    /// Start a consumer whose deliveries are handled by `consumer` in a spawned task.
    ///
    /// Return the consumer tag, to cancel it with [`basic_cancel`].
    ///
    /// [`basic_cancel`]: Channel::basic_cancel
    pub async fn basic_consume_with<F>(
        &self,
        mut consumer: F,
        args: BasicConsumeArguments,
    ) -> Result<String>
    where
        F: AsyncConsumer + Send + 'static,
    {
        let mut feed = self.basic_consume(args).await?;
        let consumer_tag = feed.consumer_tag().to_owned();
        let channel = self.clone();
        tokio::spawn(async move {
            trace!("starts up consumer task of '{}'", feed.consumer_tag());
            while let Some(delivery) = feed.recv().await {
                consumer.consume(&channel, delivery).await;
            }
            debug!("exit consumer task of '{}' on {}", feed.consumer_tag(), channel);
        });
        Ok(consumer_tag)
    }

    /// Cancel a consumer by tag.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelUseError`] if no consumer with the tag is active on this channel.
    pub async fn basic_cancel(&self, args: BasicCancelArguments) -> Result<()> {
        self.ensure_open()?;
        if !lock(&self.shared.consumer_tags).remove(&args.consumer_tag) {
            return Err(Error::ChannelUseError(format!(
                "no consumer '{}' on channel {}",
                args.consumer_tag,
                self.channel_id()
            )));
        }
        self.send_command(DispatcherManagementCommand::DeregisterConsumer {
            consumer_tag: args.consumer_tag.clone(),
            registration: None,
            notify_broker: false,
        })?;

        let cancel = Cancel::new(&args.consumer_tag, args.no_wait);
        if args.no_wait {
            self.send_frame(cancel.into_frame()).await?;
        } else {
            self.synchronous_request(cancel.into_frame(), CancelOk::header())
                .await?;
        }
        info!("consumer '{}' cancelled on {}", args.consumer_tag, self);
        Ok(())
    }

    /// Cancel one registration of a consumer and wait for `basic.cancel-ok`.
    pub(crate) async fn cancel_consumer(&self, consumer_tag: &str, registration: u64) -> Result<()> {
        self.deregister_consumer(consumer_tag, Some(registration), false);
        self.synchronous_request(
            Cancel::new(consumer_tag, false).into_frame(),
            CancelOk::header(),
        )
        .await?;
        info!("consumer '{}' cancelled on {}", consumer_tag, self);
        Ok(())
    }

    pub(crate) fn deregister_consumer(
        &self,
        consumer_tag: &str,
        registration: Option<u64>,
        notify_broker: bool,
    ) {
        let cmd = DispatcherManagementCommand::DeregisterConsumer {
            consumer_tag: consumer_tag.to_owned(),
            registration,
            notify_broker,
        };
        if self.send_command(cmd).is_err() {
            trace!("dispatcher of {} already exited", self);
        }
    }

    fn generate_consumer_tag(&self) -> String {
        format!(
            "ctag-{}.{}",
            self.channel_id(),
            self.shared.consumer_seq.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Acknowledge deliveries.
    ///
    /// Validated against the outstanding deliveries, then sent without waiting.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelUseError`] if the delivery tag is not outstanding, e.g. it was already
    /// settled or delivered in auto-ack mode.
    pub async fn basic_ack(&self, args: BasicAckArguments) -> Result<()> {
        self.settle_deliveries(
            args.delivery_tag,
            args.multiple,
            Ack::new(args.delivery_tag, args.multiple).into_frame(),
        )
    }

    /// Reject one delivery.
    pub async fn basic_reject(&self, args: BasicRejectArguments) -> Result<()> {
        self.settle_deliveries(
            args.delivery_tag,
            false,
            Reject::new(args.delivery_tag, args.requeue).into_frame(),
        )
    }

    /// Reject one or more deliveries.
    pub async fn basic_nack(&self, args: BasicNackArguments) -> Result<()> {
        self.settle_deliveries(
            args.delivery_tag,
            args.multiple,
            Nack::new(args.delivery_tag, args.multiple, args.requeue).into_frame(),
        )
    }

    fn settle_deliveries(
        &self,
        delivery_tag: DeliveryTag,
        multiple: bool,
        frame: crate::frame::Frame,
    ) -> Result<()> {
        self.ensure_open()?;
        let settled = lock(&self.shared.deliveries).settle(delivery_tag, multiple)?;
        trace!("{} settled {} deliveries on {}", frame, settled, self);
        // the dispatcher sends it in order, then retries deliveries held by prefetch limits
        self.send_command(DispatcherManagementCommand::Forward(frame))
    }

    /// Publish a message and track its confirmation.
    ///
    /// The channel must be in confirm mode, see [`confirm_select`].
    ///
    /// # Errors
    ///
    /// * [`Error::ChannelUseError`] if confirm mode is not selected.
    /// * [`ChannelError::ChannelClosed`] if the channel is closing or closed.
    ///
    /// [`confirm_select`]: Channel::confirm_select
    /// [`ChannelError::ChannelClosed`]: crate::error::ChannelError::ChannelClosed
    pub async fn basic_publish(
        &self,
        properties: BasicProperties,
        content: impl Into<Bytes>,
        args: BasicPublishArguments,
    ) -> Result<ConfirmationHandle> {
        let _guard = self.shared.publish_lock.lock().await;
        self.ensure_open()?;
        let handle = self.register_tracked_publish()?;

        if let Err(err) = self.publish_frame(properties, content.into(), args).await {
            self.abandon_publish(handle.delivery_tag());
            return Err(err);
        }
        Ok(handle)
    }

    /// Publish a message without tracking its confirmation.
    ///
    /// On a confirm-mode channel the publish still takes a sequence number.
    pub async fn basic_publish_untracked(
        &self,
        properties: BasicProperties,
        content: impl Into<Bytes>,
        args: BasicPublishArguments,
    ) -> Result<()> {
        let _guard = self.shared.publish_lock.lock().await;
        self.ensure_open()?;
        let registered = self.register_untracked_publish()?;

        if let Err(err) = self.publish_frame(properties, content.into(), args).await {
            if let Some(delivery_tag) = registered {
                self.abandon_publish(delivery_tag);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn publish_frame(
        &self,
        properties: BasicProperties,
        content: Bytes,
        args: BasicPublishArguments,
    ) -> Result<()> {
        let publish = Publish {
            exchange: args.exchange,
            routing_key: args.routing_key,
            mandatory: args.mandatory,
            immediate: args.immediate,
            properties,
            content,
        };
        self.send_frame(publish.into_frame()).await.map_err(|err| {
            error!("failed to publish on {}, cause: {}", self, err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{BasicConsumeArguments, BasicPublishArguments};

    #[test]
    fn test_consume_arguments() {
        let args = BasicConsumeArguments::new("q", "tag")
            .no_ack(true)
            .no_local(true)
            .finish();
        assert!(args.no_ack);
        assert!(args.no_local);
        assert!(!args.exclusive);

        let args = BasicConsumeArguments::new("q", "").manual_ack(true).finish();
        assert!(!args.no_ack);
        assert!(args.consumer_tag.is_empty());
    }

    #[test]
    fn test_publish_arguments() {
        let args = BasicPublishArguments::new("amq.topic", "a.b").mandatory(true).finish();
        assert!(args.mandatory);
        assert!(!args.immediate);
        assert_eq!("a.b", args.routing_key);
    }
}
