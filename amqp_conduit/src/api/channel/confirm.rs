//! Publisher confirms.
//!
//! Once confirm mode is selected, every publish on the channel is assigned the next
//! sequence number, starting at 1, and the broker acknowledges sequences with
//! `basic.ack` / `basic.nack`, optionally cumulative.
use std::{collections::BTreeMap, fmt};

use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::{self, Duration, Instant},
};
use tracing::{debug, trace};

use crate::{
    api::{
        error::{ChannelError, Error, PublishError},
        Result,
    },
    frame::{DeliveryTag, Select, SelectOk},
    utils::lock,
};

use super::Channel;

/// Arguments for [`confirm_select`].
///
/// [`confirm_select`]: Channel::confirm_select
#[derive(Debug, Clone, Default)]
pub struct ConfirmSelectArguments {
    pub no_wait: bool,
}

impl ConfirmSelectArguments {
    pub fn new(no_wait: bool) -> Self {
        Self { no_wait }
    }
}

/// Why a publish was negatively confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    /// The broker received the message and refused it.
    BrokerRejected,
    /// The message was mandatory and no queue matched, it was returned.
    Unroutable,
    /// The channel closed before the broker responded.
    ChannelClosed,
}

/// Outcome of a tracked publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Acked,
    Nacked(NackReason),
}

impl Confirmation {
    pub fn is_acked(&self) -> bool {
        matches!(self, Confirmation::Acked)
    }

    /// Map negative confirmations onto the error taxonomy.
    pub fn into_result(self) -> Result<()> {
        match self {
            Confirmation::Acked => Ok(()),
            Confirmation::Nacked(NackReason::BrokerRejected) => {
                Err(PublishError::BrokerRejected.into())
            }
            Confirmation::Nacked(NackReason::Unroutable) => Err(PublishError::Unroutable.into()),
            Confirmation::Nacked(NackReason::ChannelClosed) => {
                Err(ChannelError::ChannelClosed.into())
            }
        }
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Confirmation::Acked => f.write_str("acked"),
            Confirmation::Nacked(reason) => write!(f, "nacked ({:?})", reason),
        }
    }
}

/// Resolves to the broker's confirmation of one publish.
///
/// Dropping the handle, or timing out in [`wait`], does not cancel the publish.
/// A confirmation arriving afterwards is counted as late in [`ConfirmStats`].
///
/// [`wait`]: ConfirmationHandle::wait
#[derive(Debug)]
pub struct ConfirmationHandle {
    delivery_tag: DeliveryTag,
    published_at: Instant,
    rx: oneshot::Receiver<Confirmation>,
    outcome: Option<Confirmation>,
}

impl ConfirmationHandle {
    pub(super) fn new(delivery_tag: DeliveryTag, rx: oneshot::Receiver<Confirmation>) -> Self {
        Self {
            delivery_tag,
            published_at: Instant::now(),
            rx,
            outcome: None,
        }
    }

    /// Publish sequence number.
    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }

    pub fn published_at(&self) -> Instant {
        self.published_at
    }

    /// The outcome if already resolved, without waiting.
    pub fn try_outcome(&mut self) -> Option<Confirmation> {
        if self.outcome.is_none() {
            self.outcome = match self.rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Empty) => None,
                // ledger dropped together with its channel
                Err(TryRecvError::Closed) => Some(Confirmation::Nacked(NackReason::ChannelClosed)),
            };
        }
        self.outcome
    }

    /// Wait up to `timeout` for the outcome.
    ///
    /// # Errors
    ///
    /// [`PublishError::ConfirmTimeout`] if the broker has not responded in time.
    pub async fn wait(mut self, timeout: Duration) -> Result<Confirmation> {
        if let Some(outcome) = self.try_outcome() {
            return Ok(outcome);
        }
        match time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Ok(Confirmation::Nacked(NackReason::ChannelClosed)),
            Err(_) => {
                debug!(
                    "confirmation of delivery tag {} timed out after {:?}",
                    self.delivery_tag, timeout
                );
                Err(PublishError::ConfirmTimeout.into())
            }
        }
    }
}

/// Counters of a channel's publisher confirms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmStats {
    /// Sequence numbers assigned.
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Resolutions that arrived after the waiter gave up.
    pub late: u64,
    pub pending: usize,
}

struct PendingConfirmation {
    /// `None` for untracked publishes.
    waiter: Option<oneshot::Sender<Confirmation>>,
}

/// Sequence counter and pending confirmations of one channel.
#[derive(Default)]
pub(crate) struct ConfirmLedger {
    enabled: bool,
    closed: bool,
    last_delivery_tag: DeliveryTag,
    pending: BTreeMap<DeliveryTag, PendingConfirmation>,
    /// `basic.return`s not yet correlated with a confirmation.
    returned: usize,
    stats: ConfirmStats,
}

impl ConfirmLedger {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return false if it was already enabled.
    pub fn enable(&mut self) -> bool {
        !std::mem::replace(&mut self.enabled, true)
    }

    /// Assign the next sequence number to a publish whose outcome is awaited.
    pub fn register_tracked(&mut self) -> Result<(DeliveryTag, oneshot::Receiver<Confirmation>)> {
        let (tx, rx) = oneshot::channel();
        let delivery_tag = self.next_sequence(Some(tx))?;
        Ok((delivery_tag, rx))
    }

    /// Assign the next sequence number to a fire-and-forget publish.
    pub fn register_untracked(&mut self) -> Result<DeliveryTag> {
        self.next_sequence(None)
    }

    fn next_sequence(&mut self, waiter: Option<oneshot::Sender<Confirmation>>) -> Result<DeliveryTag> {
        if self.closed {
            return Err(ChannelError::ChannelClosed.into());
        }
        if !self.enabled {
            return Err(Error::ChannelUseError(
                "publisher confirms not selected on channel".to_string(),
            ));
        }
        self.last_delivery_tag += 1;
        self.pending
            .insert(self.last_delivery_tag, PendingConfirmation { waiter });
        self.stats.published += 1;
        Ok(self.last_delivery_tag)
    }

    /// Attach a `basic.return` to the next confirmation.
    pub fn mark_returned(&mut self) {
        if self.enabled {
            self.returned += 1;
        }
    }

    /// Pending sequences a confirmation of `delivery_tag` resolves as unroutable.
    ///
    /// The broker sends the return of a publish before its confirmation, so the returns
    /// received since the previous confirmation belong to the lowest sequences it covers.
    /// Returns never carry over to a later confirmation.
    fn take_returned(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> Vec<DeliveryTag> {
        let returned = std::mem::take(&mut self.returned);
        if returned == 0 {
            return Vec::new();
        }
        let covered: Vec<DeliveryTag> = if multiple {
            self.pending
                .range(..=delivery_tag)
                .map(|(tag, _)| *tag)
                .take(returned)
                .collect()
        } else if self.pending.contains_key(&delivery_tag) {
            vec![delivery_tag]
        } else {
            Vec::new()
        };
        if covered.len() < returned {
            debug!(
                "{} returns without pending confirmation up to delivery tag {}",
                returned - covered.len(),
                delivery_tag
            );
        }
        covered
    }

    /// Return number of resolved sequences.
    pub fn ack(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> usize {
        let unroutable = self.take_returned(delivery_tag, multiple);
        self.resolve(delivery_tag, multiple, |tag| {
            if unroutable.contains(&tag) {
                Confirmation::Nacked(NackReason::Unroutable)
            } else {
                Confirmation::Acked
            }
        })
    }

    pub fn nack(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> usize {
        let unroutable = self.take_returned(delivery_tag, multiple);
        self.resolve(delivery_tag, multiple, |tag| {
            if unroutable.contains(&tag) {
                Confirmation::Nacked(NackReason::Unroutable)
            } else {
                Confirmation::Nacked(NackReason::BrokerRejected)
            }
        })
    }

    /// Nack a sequence whose publish never reached the wire.
    pub fn abandon(&mut self, delivery_tag: DeliveryTag) {
        self.resolve(delivery_tag, false, |_| {
            Confirmation::Nacked(NackReason::ChannelClosed)
        });
    }

    /// Nack everything pending and refuse further registrations.
    ///
    /// Return number of nacked sequences.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        match self.pending.keys().next_back().copied() {
            Some(last) => self.resolve(last, true, |_| {
                Confirmation::Nacked(NackReason::ChannelClosed)
            }),
            None => 0,
        }
    }

    fn resolve<F>(&mut self, delivery_tag: DeliveryTag, multiple: bool, outcome_of: F) -> usize
    where
        F: Fn(DeliveryTag) -> Confirmation,
    {
        let mut resolved: Vec<(DeliveryTag, PendingConfirmation)> = if multiple {
            let rest = self.pending.split_off(&(delivery_tag.saturating_add(1)));
            std::mem::replace(&mut self.pending, rest)
                .into_iter()
                .collect()
        } else {
            self.pending
                .remove(&delivery_tag)
                .map(|pending| vec![(delivery_tag, pending)])
                .unwrap_or_default()
        };
        if resolved.is_empty() {
            debug!(
                "no pending confirmation for delivery tag {}, multiple = {}",
                delivery_tag, multiple
            );
        }

        for (tag, pending) in resolved.iter_mut().map(|(tag, pending)| (*tag, pending)) {
            let outcome = outcome_of(tag);
            match outcome {
                Confirmation::Acked => self.stats.acked += 1,
                Confirmation::Nacked(_) => self.stats.nacked += 1,
            }
            if let Some(waiter) = pending.waiter.take() {
                if waiter.send(outcome).is_err() {
                    self.stats.late += 1;
                    debug!("late confirmation of delivery tag {}: {}", tag, outcome);
                } else {
                    trace!("delivery tag {} {}", tag, outcome);
                }
            }
        }
        resolved.len()
    }

    pub fn stats(&self) -> ConfirmStats {
        ConfirmStats {
            pending: self.pending.len(),
            ..self.stats
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
impl Channel {
    /// Put the channel in confirm mode.
    ///
    /// Confirm mode can not be left. Selecting it again has no further effect.
    pub async fn confirm_select(&self, args: ConfirmSelectArguments) -> Result<()> {
        self.ensure_open()?;
        if lock(&self.shared.confirms).is_enabled() {
            return Ok(());
        }
        let select = Select::new(args.no_wait);
        if args.no_wait {
            self.send_frame(select.into_frame()).await?;
        } else {
            self.synchronous_request(select.into_frame(), SelectOk::header())
                .await?;
        }
        if lock(&self.shared.confirms).enable() {
            debug!("confirm mode selected on {}", self);
        }
        Ok(())
    }

    /// Counters of publisher confirms on this channel.
    pub fn confirm_stats(&self) -> ConfirmStats {
        lock(&self.shared.confirms).stats()
    }

    /// Register the next publish for confirmation tracking.
    pub(super) fn register_tracked_publish(&self) -> Result<ConfirmationHandle> {
        let (delivery_tag, rx) = lock(&self.shared.confirms).register_tracked()?;
        Ok(ConfirmationHandle::new(delivery_tag, rx))
    }

    /// Take a sequence number if the channel is in confirm mode.
    pub(super) fn register_untracked_publish(&self) -> Result<Option<DeliveryTag>> {
        let mut confirms = lock(&self.shared.confirms);
        if confirms.is_enabled() {
            confirms.register_untracked().map(Some)
        } else {
            // closed channels are refused by the caller
            Ok(None)
        }
    }

    pub(super) fn abandon_publish(&self, delivery_tag: DeliveryTag) {
        lock(&self.shared.confirms).abandon(delivery_tag);
    }
}

#[cfg(test)]
mod tests {
    use tokio::{sync::oneshot, time::Duration};

    use super::{ConfirmLedger, Confirmation, ConfirmationHandle, NackReason};
    use crate::api::error::{ChannelError, Error, PublishError};

    fn tracked(ledger: &mut ConfirmLedger) -> (u64, oneshot::Receiver<Confirmation>) {
        ledger.register_tracked().unwrap()
    }

    #[test]
    fn test_register_requires_confirm_mode() {
        let mut ledger = ConfirmLedger::default();
        assert!(matches!(
            ledger.register_tracked(),
            Err(Error::ChannelUseError(_))
        ));
        assert!(ledger.enable());
        assert!(!ledger.enable());
        assert_eq!(1, ledger.register_untracked().unwrap());
    }

    #[test]
    fn test_sequence_numbers_without_gaps() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let tags: Vec<u64> = (0..5)
            .map(|i| {
                if i % 2 == 0 {
                    tracked(&mut ledger).0
                } else {
                    ledger.register_untracked().unwrap()
                }
            })
            .collect();
        assert_eq!(vec![1, 2, 3, 4, 5], tags);
        assert_eq!(5, ledger.stats().published);
        assert_eq!(5, ledger.stats().pending);
    }

    #[test]
    fn test_multiple_ack_resolves_only_lower_or_equal() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let mut receivers: Vec<_> = (0..5).map(|_| tracked(&mut ledger).1).collect();

        assert_eq!(3, ledger.ack(3, true));
        for rx in receivers.iter_mut().take(3) {
            assert_eq!(Confirmation::Acked, rx.try_recv().unwrap());
        }
        for rx in receivers.iter_mut().skip(3) {
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(2, ledger.stats().pending);

        // single ack resolves exactly the tag
        assert_eq!(1, ledger.ack(5, false));
        assert!(receivers[3].try_recv().is_err());
        assert_eq!(Confirmation::Acked, receivers[4].try_recv().unwrap());
    }

    #[test]
    fn test_nack_and_return() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let (_, mut rejected) = tracked(&mut ledger);
        let (_, mut returned) = tracked(&mut ledger);
        let (_, mut acked) = tracked(&mut ledger);

        ledger.nack(1, false);
        ledger.mark_returned();
        ledger.ack(2, false);
        ledger.ack(3, false);
        assert_eq!(
            Confirmation::Nacked(NackReason::BrokerRejected),
            rejected.try_recv().unwrap()
        );
        assert_eq!(
            Confirmation::Nacked(NackReason::Unroutable),
            returned.try_recv().unwrap()
        );
        assert_eq!(Confirmation::Acked, acked.try_recv().unwrap());

        let stats = ledger.stats();
        assert_eq!((1, 2, 0), (stats.acked, stats.nacked, stats.pending));
    }

    #[test]
    fn test_return_then_nack_is_unroutable() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let (_, mut returned) = tracked(&mut ledger);
        let (_, mut rejected) = tracked(&mut ledger);

        ledger.mark_returned();
        assert_eq!(1, ledger.nack(1, false));
        ledger.nack(2, false);
        assert_eq!(
            Confirmation::Nacked(NackReason::Unroutable),
            returned.try_recv().unwrap()
        );
        assert_eq!(
            Confirmation::Nacked(NackReason::BrokerRejected),
            rejected.try_recv().unwrap()
        );
    }

    #[test]
    fn test_returns_consumed_by_multiple_ack() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let mut receivers: Vec<_> = (0..4).map(|_| tracked(&mut ledger).1).collect();

        ledger.mark_returned();
        ledger.mark_returned();
        assert_eq!(2, ledger.ack(2, true));
        ledger.ack(3, false);
        // a return left over from a confirmation never reaches a later one
        ledger.mark_returned();
        ledger.mark_returned();
        ledger.ack(4, false);

        let outcomes: Vec<Confirmation> = receivers
            .iter_mut()
            .map(|rx| rx.try_recv().unwrap())
            .collect();
        assert_eq!(
            vec![
                Confirmation::Nacked(NackReason::Unroutable),
                Confirmation::Nacked(NackReason::Unroutable),
                Confirmation::Acked,
                Confirmation::Nacked(NackReason::Unroutable),
            ],
            outcomes
        );

        let (_, mut next) = tracked(&mut ledger);
        ledger.ack(5, false);
        assert_eq!(Confirmation::Acked, next.try_recv().unwrap());
    }

    #[test]
    fn test_close_nacks_all_pending_and_refuses_new() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let mut receivers: Vec<_> = (0..3).map(|_| tracked(&mut ledger).1).collect();
        assert_eq!(3, ledger.close());
        for rx in receivers.iter_mut() {
            assert_eq!(
                Confirmation::Nacked(NackReason::ChannelClosed),
                rx.try_recv().unwrap()
            );
        }
        assert_eq!(
            Err(Error::ChannelError(ChannelError::ChannelClosed)),
            ledger.register_untracked()
        );
        assert_eq!(0, ledger.close());
    }

    #[tokio::test]
    async fn test_late_confirmation_after_timeout() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let (tag, rx) = tracked(&mut ledger);
        let handle = ConfirmationHandle::new(tag, rx);

        let res = handle.wait(Duration::from_millis(10)).await;
        assert_eq!(Err(Error::PublishError(PublishError::ConfirmTimeout)), res);

        ledger.ack(tag, false);
        let stats = ledger.stats();
        assert_eq!(1, stats.late);
        assert_eq!(1, stats.acked);
    }

    #[tokio::test]
    async fn test_try_outcome_is_sticky() {
        let mut ledger = ConfirmLedger::default();
        ledger.enable();
        let (tag, rx) = tracked(&mut ledger);
        let mut handle = ConfirmationHandle::new(tag, rx);
        assert_eq!(None, handle.try_outcome());
        ledger.ack(tag, false);
        assert_eq!(Some(Confirmation::Acked), handle.try_outcome());
        assert_eq!(Some(Confirmation::Acked), handle.try_outcome());
        assert_eq!(
            Confirmation::Acked,
            handle.wait(Duration::from_millis(1)).await.unwrap()
        );
        assert!(Confirmation::Acked.into_result().is_ok());
    }
}
