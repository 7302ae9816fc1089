use super::{AmqpChannelId, ReplyCode};

/// Channel `0` is reserved for connection level methods.
pub const CONN_DEFAULT_CHANNEL: AmqpChannelId = 0;

/// Channel max used when neither peer limits the number of channels.
pub const DEFAULT_CHANNEL_MAX: u16 = 2047;

// reply codes, see https://www.rabbitmq.com/amqp-0-9-1-reference.html#constants
pub const REPLY_SUCCESS: ReplyCode = 200;
pub const CONTENT_TOO_LARGE: ReplyCode = 311;
pub const NO_ROUTE: ReplyCode = 312;
pub const CONNECTION_FORCED: ReplyCode = 320;
pub const ACCESS_REFUSED: ReplyCode = 403;
pub const NOT_FOUND: ReplyCode = 404;
pub const RESOURCE_LOCKED: ReplyCode = 405;
pub const PRECONDITION_FAILED: ReplyCode = 406;
pub const COMMAND_INVALID: ReplyCode = 503;
pub const CHANNEL_ERROR: ReplyCode = 504;
pub const NOT_ALLOWED: ReplyCode = 530;

/// Message is not persisted by the broker.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Message is persisted by the broker if the queue is durable.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;
