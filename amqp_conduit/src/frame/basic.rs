use std::fmt;

use bytes::Bytes;

use super::{BasicProperties, DeliveryTag, ReplyCode};

#[derive(Debug, Clone, Default)]
pub struct Qos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QosOk;

#[derive(Debug, Clone, Default)]
pub struct Consume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConsumeOk {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, Default)]
pub struct Cancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl Cancel {
    pub fn new(consumer_tag: &str, no_wait: bool) -> Self {
        Self {
            consumer_tag: consumer_tag.to_owned(),
            no_wait,
        }
    }
}

impl fmt::Display for Cancel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cancel consumer '{}'", self.consumer_tag)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelOk {
    pub consumer_tag: String,
}

/// `basic.publish` together with its content header and body.
#[derive(Debug, Clone, Default)]
pub struct Publish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: BasicProperties,
    pub content: Bytes,
}

/// `basic.return` together with the returned content.
#[derive(Debug, Clone, Default)]
pub struct Return {
    pub reply_code: ReplyCode,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub content: Bytes,
}

impl fmt::Display for Return {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "message returned due to '{}: {}', (exchange = '{}', routing_key = '{}')",
            self.reply_code, self.reply_text, self.exchange, self.routing_key
        )
    }
}

/// `basic.deliver` together with the delivered content.
#[derive(Debug, Clone, Default)]
pub struct Deliver {
    pub consumer_tag: String,
    pub delivery_tag: DeliveryTag,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub content: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct Ack {
    pub delivery_tag: DeliveryTag,
    pub multiple: bool,
}

impl Ack {
    pub fn new(delivery_tag: DeliveryTag, multiple: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reject {
    pub delivery_tag: DeliveryTag,
    pub requeue: bool,
}

impl Reject {
    pub fn new(delivery_tag: DeliveryTag, requeue: bool) -> Self {
        Self {
            delivery_tag,
            requeue,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Nack {
    pub delivery_tag: DeliveryTag,
    pub multiple: bool,
    pub requeue: bool,
}

impl Nack {
    pub fn new(delivery_tag: DeliveryTag, multiple: bool, requeue: bool) -> Self {
        Self {
            delivery_tag,
            multiple,
            requeue,
        }
    }
}
