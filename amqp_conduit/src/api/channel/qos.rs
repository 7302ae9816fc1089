//! Prefetch limits and the pending-acknowledgement ledger.
use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::{
    api::{error::Error, Result},
    frame::{DeliveryTag, Qos, QosOk},
    utils::lock,
};

use super::{Channel, DispatcherManagementCommand};

/// Arguments for [`basic_qos`].
///
/// # Example
/// ```
/// use amqp_conduit::channel::BasicQosArguments;
///
/// let args = BasicQosArguments::new(0, 10, false);
/// assert_eq!(10, args.prefetch_count);
/// ```
///
/// [`basic_qos`]: Channel::basic_qos
#[derive(Debug, Clone, Default)]
pub struct BasicQosArguments {
    /// Byte limit, `0` means unlimited.
    pub prefetch_size: u32,
    /// Delivery limit, `0` means unlimited.
    pub prefetch_count: u16,
    /// `false`: applies to each consumer, `true`: shared by all consumers of the channel.
    pub global: bool,
}

impl BasicQosArguments {
    pub fn new(prefetch_size: u32, prefetch_count: u16, global: bool) -> Self {
        Self {
            prefetch_size,
            prefetch_count,
            global,
        }
    }
}

/// Limit of unacknowledged deliveries in one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchLimit {
    pub count: u16,
    pub size: u32,
}

impl PrefetchLimit {
    pub fn is_unlimited(&self) -> bool {
        self.count == 0 && self.size == 0
    }

    fn admits(&self, usage: &Usage, size: usize) -> bool {
        // an oversize delivery must not starve an idle scope
        if usage.count == 0 {
            return true;
        }
        let count_ok = self.count == 0 || usage.count < self.count as usize;
        let size_ok = self.size == 0 || usage.bytes + size as u64 <= self.size as u64;
        count_ok && size_ok
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    count: usize,
    bytes: u64,
}

impl Usage {
    fn add(&mut self, size: usize) {
        self.count += 1;
        self.bytes += size as u64;
    }

    fn sub(&mut self, size: usize) {
        self.count = self.count.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(size as u64);
    }
}

/// Prefetch gates of a channel.
///
/// A delivery is admitted only if both its consumer's scope and the channel scope admit it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowController {
    consumer_limit: PrefetchLimit,
    channel_limit: PrefetchLimit,
}

impl FlowController {
    pub fn set_qos(&mut self, prefetch_count: u16, prefetch_size: u32, global: bool) {
        let limit = PrefetchLimit {
            count: prefetch_count,
            size: prefetch_size,
        };
        if global {
            self.channel_limit = limit;
        } else {
            self.consumer_limit = limit;
        }
    }

    /// Limit applied to each consumer.
    pub fn consumer_limit(&self) -> PrefetchLimit {
        self.consumer_limit
    }

    /// Limit shared by all consumers of the channel.
    pub fn channel_limit(&self) -> PrefetchLimit {
        self.channel_limit
    }
}

struct OutstandingDelivery {
    consumer_tag: String,
    size: usize,
}

/// Deliveries handed to manual-ack consumers and not yet settled.
#[derive(Default)]
pub(crate) struct DeliveryLedger {
    controller: FlowController,
    outstanding: BTreeMap<DeliveryTag, OutstandingDelivery>,
    channel_usage: Usage,
    consumer_usage: HashMap<String, Usage>,
}

impl DeliveryLedger {
    pub fn controller(&self) -> FlowController {
        self.controller
    }

    pub fn set_qos(&mut self, prefetch_count: u16, prefetch_size: u32, global: bool) {
        self.controller
            .set_qos(prefetch_count, prefetch_size, global);
    }

    /// Whether a delivery of `size` bytes to `consumer_tag` may be handed out now.
    pub fn admits(&self, consumer_tag: &str, size: usize) -> bool {
        let consumer_usage = self
            .consumer_usage
            .get(consumer_tag)
            .copied()
            .unwrap_or_default();
        self.controller.consumer_limit.admits(&consumer_usage, size)
            && self.controller.channel_limit.admits(&self.channel_usage, size)
    }

    pub fn record(&mut self, delivery_tag: DeliveryTag, consumer_tag: &str, size: usize) {
        self.channel_usage.add(size);
        self.consumer_usage
            .entry(consumer_tag.to_owned())
            .or_default()
            .add(size);
        self.outstanding.insert(
            delivery_tag,
            OutstandingDelivery {
                consumer_tag: consumer_tag.to_owned(),
                size,
            },
        );
    }

    /// Settle by ack, reject or nack. `multiple` settles every tag up to `delivery_tag`,
    /// and `delivery_tag = 0` with `multiple` settles everything outstanding.
    ///
    /// Return number of settled deliveries.
    pub fn settle(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> Result<usize> {
        if multiple && delivery_tag == 0 {
            return Ok(self.clear());
        }
        if !self.outstanding.contains_key(&delivery_tag) {
            return Err(Error::ChannelUseError(format!(
                "unknown delivery tag {}",
                delivery_tag
            )));
        }
        let settled: Vec<DeliveryTag> = if multiple {
            self.outstanding
                .range(..=delivery_tag)
                .map(|(tag, _)| *tag)
                .collect()
        } else {
            vec![delivery_tag]
        };
        for tag in settled.iter() {
            self.forget(*tag);
        }
        Ok(settled.len())
    }

    /// Drop one delivery from the ledger, e.g. when it could not be handed out.
    pub fn forget(&mut self, delivery_tag: DeliveryTag) {
        if let Some(delivery) = self.outstanding.remove(&delivery_tag) {
            self.channel_usage.sub(delivery.size);
            if let Some(usage) = self.consumer_usage.get_mut(&delivery.consumer_tag) {
                usage.sub(delivery.size);
                if usage.count == 0 {
                    self.consumer_usage.remove(&delivery.consumer_tag);
                }
            }
        }
    }

    /// Return number of dropped deliveries.
    pub fn clear(&mut self) -> usize {
        let len = self.outstanding.len();
        self.outstanding.clear();
        self.consumer_usage.clear();
        self.channel_usage = Usage::default();
        len
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    #[cfg(test)]
    pub fn contains(&self, delivery_tag: DeliveryTag) -> bool {
        self.outstanding.contains_key(&delivery_tag)
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Set prefetch limits.
    ///
    /// Applied client-side once the broker confirms it, and enforced by the dispatcher
    /// before handing deliveries to manual-ack consumers.
    pub async fn basic_qos(&self, args: BasicQosArguments) -> Result<()> {
        let qos = Qos {
            prefetch_size: args.prefetch_size,
            prefetch_count: args.prefetch_count,
            global: args.global,
        };
        self.synchronous_request(qos.into_frame(), QosOk::header())
            .await?;

        lock(&self.shared.deliveries).set_qos(
            args.prefetch_count,
            args.prefetch_size,
            args.global,
        );
        debug!(
            "qos on {}: prefetch_count = {}, prefetch_size = {}, global = {}",
            self, args.prefetch_count, args.prefetch_size, args.global
        );
        // limits may have been raised
        self.send_command(DispatcherManagementCommand::Redrain)
    }

    /// Current prefetch gates.
    pub fn flow_controller(&self) -> FlowController {
        lock(&self.shared.deliveries).controller()
    }

    /// Number of deliveries awaiting acknowledgement.
    pub fn outstanding_deliveries(&self) -> usize {
        lock(&self.shared.deliveries).len()
    }
}
