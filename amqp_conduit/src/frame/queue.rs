#[derive(Debug, Clone, Default)]
pub struct DeclareQueue {
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeclareQueueOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BindQueue {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BindQueueOk;

#[derive(Debug, Clone, Default)]
pub struct UnbindQueue {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct UnbindQueueOk;

#[derive(Debug, Clone, Default)]
pub struct PurgeQueue {
    pub queue: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PurgeQueueOk {
    pub message_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteQueue {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteQueueOk {
    pub message_count: u32,
}
