use tracing::debug;

use super::Channel;
use crate::{
    api::{error::Error, Result},
    frame::{
        BindQueue, BindQueueOk, DeclareQueue, DeclareQueueOk, DeleteQueue, DeleteQueueOk, Frame,
        PurgeQueue, PurgeQueueOk, UnbindQueue, UnbindQueueOk,
    },
};

/// Arguments for [`queue_declare`].
///
/// An empty queue name lets the broker generate one.
///
/// # Example
/// ```
/// use amqp_conduit::channel::QueueDeclareArguments;
///
/// let args = QueueDeclareArguments::new("orders").durable(true).finish();
/// assert!(args.durable);
/// assert!(!args.exclusive);
/// ```
///
/// [`queue_declare`]: Channel::queue_declare
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDeclareArguments {
    pub queue: String,
    /// Only check that the queue exists.
    pub passive: bool,
    pub durable: bool,
    /// Used by this connection only, deleted when it closes.
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
}

impl QueueDeclareArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            ..Default::default()
        }
    }

    impl_chainable_setter! {
        passive, bool
    }
    impl_chainable_setter! {
        durable, bool
    }
    impl_chainable_setter! {
        exclusive, bool
    }
    impl_chainable_setter! {
        auto_delete, bool
    }
    impl_chainable_setter! {
        no_wait, bool
    }

    pub fn finish(&mut self) -> Self {
        self.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueBindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
}

impl QueueBindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueUnbindArguments {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl QueueUnbindArguments {
    pub fn new(queue: &str, exchange: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueuePurgeArguments {
    pub queue: String,
    pub no_wait: bool,
}

impl QueuePurgeArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            no_wait: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueDeleteArguments {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl QueueDeleteArguments {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            if_unused: false,
            if_empty: false,
            no_wait: false,
        }
    }
}

/// Queue as reported by the broker on declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Declare a queue.
    ///
    /// Declaring an existing queue with identical parameters succeeds, conflicting parameters
    /// fail with [`Error::DeclareError`] and close the channel.
    ///
    /// Return `None` if `no_wait` is set.
    ///
    /// [`Error::DeclareError`]: crate::error::Error::DeclareError
    pub async fn queue_declare(&self, args: QueueDeclareArguments) -> Result<Option<QueueInfo>> {
        let declare = DeclareQueue {
            queue: args.queue,
            passive: args.passive,
            durable: args.durable,
            exclusive: args.exclusive,
            auto_delete: args.auto_delete,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_no_wait(declare.into_frame()).await?;
            return Ok(None);
        }
        match self
            .synchronous_request(declare.into_frame(), DeclareQueueOk::header())
            .await?
        {
            Frame::DeclareQueueOk(_, declare_ok) => {
                debug!("declared queue '{}' on {}", declare_ok.queue, self);
                Ok(Some(QueueInfo {
                    name: declare_ok.queue,
                    message_count: declare_ok.message_count,
                    consumer_count: declare_ok.consumer_count,
                }))
            }
            frame => Err(unexpected(frame)),
        }
    }

    /// Bind a queue to an exchange with a routing key.
    pub async fn queue_bind(&self, args: QueueBindArguments) -> Result<()> {
        let bind = BindQueue {
            queue: args.queue,
            exchange: args.exchange,
            routing_key: args.routing_key,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_no_wait(bind.into_frame()).await
        } else {
            self.synchronous_request(bind.into_frame(), BindQueueOk::header())
                .await
                .map(|_| ())
        }
    }

    pub async fn queue_unbind(&self, args: QueueUnbindArguments) -> Result<()> {
        let unbind = UnbindQueue {
            queue: args.queue,
            exchange: args.exchange,
            routing_key: args.routing_key,
        };
        self.synchronous_request(unbind.into_frame(), UnbindQueueOk::header())
            .await
            .map(|_| ())
    }

    /// Return number of purged messages, `None` if `no_wait` is set.
    pub async fn queue_purge(&self, args: QueuePurgeArguments) -> Result<Option<u32>> {
        let purge = PurgeQueue {
            queue: args.queue,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_no_wait(purge.into_frame()).await?;
            return Ok(None);
        }
        match self
            .synchronous_request(purge.into_frame(), PurgeQueueOk::header())
            .await?
        {
            Frame::PurgeQueueOk(_, purge_ok) => Ok(Some(purge_ok.message_count)),
            frame => Err(unexpected(frame)),
        }
    }

    /// Return number of messages deleted with the queue, `None` if `no_wait` is set.
    pub async fn queue_delete(&self, args: QueueDeleteArguments) -> Result<Option<u32>> {
        let delete = DeleteQueue {
            queue: args.queue,
            if_unused: args.if_unused,
            if_empty: args.if_empty,
            no_wait: args.no_wait,
        };
        if args.no_wait {
            self.send_no_wait(delete.into_frame()).await?;
            return Ok(None);
        }
        match self
            .synchronous_request(delete.into_frame(), DeleteQueueOk::header())
            .await?
        {
            Frame::DeleteQueueOk(_, delete_ok) => Ok(Some(delete_ok.message_count)),
            frame => Err(unexpected(frame)),
        }
    }

    /// Send a request the broker will not answer.
    pub(super) async fn send_no_wait(&self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        self.send_frame(frame).await
    }
}

/// Responders are keyed by method, so a mismatch is a broker protocol violation.
pub(super) fn unexpected(frame: Frame) -> Error {
    Error::InternalChannelError(format!("unexpected response {}", frame))
}

#[cfg(test)]
mod tests {
    use super::QueueDeclareArguments;

    #[test]
    fn test_declare_arguments() {
        let args = QueueDeclareArguments::new("")
            .exclusive(true)
            .auto_delete(true)
            .finish();
        assert!(args.queue.is_empty());
        assert!(args.exclusive && args.auto_delete);
        assert!(!args.durable && !args.passive && !args.no_wait);
    }
}
