use std::collections::{BTreeMap, HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::{
    api::{callbacks::ChannelCallback, consumer::Delivery, state::ChannelState},
    frame::{Cancel, CancelOk, Deliver, Frame, MethodHeader, Reject},
    net::IncomingMessage,
    utils::lock,
};

use super::{Channel, DispatcherManagementCommand};

/// Resource for handling deliveries of one consumer.
struct ConsumerResource {
    registration: u64,
    no_ack: bool,
    /// Deliveries held back by the prefetch limits.
    fifo: VecDeque<Delivery>,
    /// dispatcher task holds the tx half, and the consumer holds the rx half.
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Most recently retired consumers whose deliveries may still be in flight.
const RETIRED_CONSUMERS_MAX: usize = 64;

/// Tags of cancelled manual-ack consumers.
///
/// Deliveries still in flight to them are requeued. A tag is released once the broker
/// confirms the cancel, and the oldest tag is forgotten when the set is full, which covers
/// cancels sent without waiting for confirmation.
#[derive(Debug, Default)]
struct RetiredConsumers {
    tags: VecDeque<String>,
}

impl RetiredConsumers {
    fn retire(&mut self, consumer_tag: String) {
        if self.contains(&consumer_tag) {
            return;
        }
        if self.tags.len() == RETIRED_CONSUMERS_MAX {
            self.tags.pop_front();
        }
        self.tags.push_back(consumer_tag);
    }

    fn release(&mut self, consumer_tag: &str) {
        self.tags.retain(|tag| tag != consumer_tag);
    }

    fn contains(&self, consumer_tag: &str) -> bool {
        self.tags.iter().any(|tag| tag == consumer_tag)
    }
}

/// Dispatcher for a channel.
///
/// Each channel will spawn a dispatcher.
/// It handles channel level callbacks, incoming frames and registration commands.
/// It also dispatches deliveries to consumers within the prefetch limits.
pub(crate) struct ChannelDispatcher {
    channel: Channel,
    dispatcher_rx: mpsc::UnboundedReceiver<Frame>,
    dispatcher_mgmt_rx: mpsc::UnboundedReceiver<DispatcherManagementCommand>,
    consumers: BTreeMap<String, ConsumerResource>,
    retired: RetiredConsumers,
    responders: HashMap<&'static MethodHeader, oneshot::Sender<IncomingMessage>>,
    callback: Option<Box<dyn ChannelCallback + Send + 'static>>,
}

/////////////////////////////////////////////////////////////////////////////
impl ChannelDispatcher {
    pub(crate) fn new(
        channel: Channel,
        dispatcher_rx: mpsc::UnboundedReceiver<Frame>,
        dispatcher_mgmt_rx: mpsc::UnboundedReceiver<DispatcherManagementCommand>,
    ) -> Self {
        Self {
            channel,
            dispatcher_rx,
            dispatcher_mgmt_rx,
            consumers: BTreeMap::new(),
            retired: RetiredConsumers::default(),
            responders: HashMap::new(),
            callback: None,
        }
    }

    /// Spawn dispatcher task.
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    /// Hand buffered deliveries of one consumer over while the prefetch limits admit them.
    fn drain(channel: &Channel, consumer_tag: &str, consumer: &mut ConsumerResource) {
        let mut deliveries = lock(&channel.shared.deliveries);
        while let Some(delivery) = consumer.fifo.pop_front() {
            let size = delivery.content().len();
            if !deliveries.admits(consumer_tag, size) {
                trace!(
                    "consumer '{}' reached prefetch limit, {} deliveries buffered",
                    consumer_tag,
                    consumer.fifo.len() + 1
                );
                consumer.fifo.push_front(delivery);
                break;
            }
            let delivery_tag = delivery.delivery_tag();
            deliveries.record(delivery_tag, consumer_tag, size);
            if let Err(err) = consumer.tx.send(delivery) {
                // consumer dropped, its deregistration is on the way
                deliveries.forget(delivery_tag);
                consumer.fifo.push_front(err.0);
                break;
            }
        }
    }

    fn redrain(&mut self) {
        for (consumer_tag, consumer) in self.consumers.iter_mut() {
            if !consumer.no_ack && !consumer.fifo.is_empty() {
                Self::drain(&self.channel, consumer_tag, consumer);
            }
        }
    }

    /// Give undelivered messages back to the broker.
    async fn requeue(channel: &Channel, fifo: VecDeque<Delivery>) {
        if fifo.is_empty() || !channel.is_open() {
            return;
        }
        debug!("requeue {} undelivered messages on {}", fifo.len(), channel);
        for delivery in fifo {
            let reject = Reject::new(delivery.delivery_tag(), true);
            if let Err(err) = channel.send_frame(reject.into_frame()).await {
                error!("failed to requeue {} on {}, cause: {}", delivery, channel, err);
                return;
            }
        }
    }

    async fn handle_deliver(&mut self, deliver: Deliver) {
        let delivery = Delivery::from(deliver);
        match self.consumers.get_mut(delivery.consumer_tag()) {
            Some(consumer) if consumer.no_ack => {
                // settled on arrival, never gated nor recorded
                if consumer.tx.send(delivery).is_err() {
                    trace!("auto-ack consumer dropped before its delivery on {}", self.channel);
                }
            }
            Some(consumer) => {
                let consumer_tag = delivery.consumer_tag().to_owned();
                consumer.fifo.push_back(delivery);
                Self::drain(&self.channel, &consumer_tag, consumer);
            }
            None if self.retired.contains(delivery.consumer_tag()) => {
                Self::requeue(&self.channel, VecDeque::from([delivery])).await;
            }
            None => {
                warn!("no consumer for {} on {}, discarded", delivery, self.channel);
            }
        }
    }

    async fn handle_command(&mut self, command: DispatcherManagementCommand) {
        match command {
            DispatcherManagementCommand::RegisterResponder {
                method_header,
                responder,
            } => {
                if self.responders.insert(method_header, responder).is_some() {
                    warn!("responder for {} replaced on {}", method_header, self.channel);
                }
            }
            DispatcherManagementCommand::RegisterConsumer {
                consumer_tag,
                registration,
                no_ack,
                tx,
            } => {
                info!("register consumer '{}' on {}", consumer_tag, self.channel);
                self.retired.release(&consumer_tag);
                self.consumers.insert(
                    consumer_tag,
                    ConsumerResource {
                        registration,
                        no_ack,
                        fifo: VecDeque::new(),
                        tx,
                    },
                );
            }
            DispatcherManagementCommand::DeregisterConsumer {
                consumer_tag,
                registration,
                notify_broker,
            } => {
                self.deregister_consumer(consumer_tag, registration, notify_broker)
                    .await;
            }
            DispatcherManagementCommand::RegisterChannelCallback(callback) => {
                self.callback.replace(callback);
                debug!("callback registered on {}", self.channel);
            }
            DispatcherManagementCommand::Forward(frame) => {
                if self.channel.is_open() {
                    if let Err(err) = self.channel.send_frame(frame).await {
                        error!("failed to send acknowledgement on {}, cause: {}", self.channel, err);
                    }
                } else {
                    trace!("discard {} on {}", frame, self.channel);
                }
                self.redrain();
            }
            DispatcherManagementCommand::Redrain => self.redrain(),
        }
    }

    async fn deregister_consumer(
        &mut self,
        consumer_tag: String,
        registration: Option<u64>,
        notify_broker: bool,
    ) {
        let current = match self.consumers.get(&consumer_tag) {
            Some(consumer) => registration.map_or(true, |r| r == consumer.registration),
            None => false,
        };
        if !current {
            trace!("consumer '{}' already deregistered on {}", consumer_tag, self.channel);
            return;
        }
        let consumer = match self.consumers.remove(&consumer_tag) {
            Some(consumer) => consumer,
            None => return,
        };
        if registration.is_some() {
            lock(&self.channel.shared.consumer_tags).remove(&consumer_tag);
        }
        info!(
            "deregister consumer '{}' on {}, buffered deliveries: {}",
            consumer_tag,
            self.channel,
            consumer.fifo.len()
        );
        if !consumer.no_ack {
            self.retired.retire(consumer_tag.clone());
        }
        Self::requeue(&self.channel, consumer.fifo).await;

        if notify_broker && self.channel.is_open() {
            let cancel = Cancel::new(&consumer_tag, true);
            if let Err(err) = self.channel.send_frame(cancel.into_frame()).await {
                debug!("failed to cancel consumer '{}', cause: {}", consumer_tag, err);
            }
        }
    }

    /// Broker cancelled a consumer, e.g. its queue was deleted.
    async fn handle_cancel(&mut self, cancel: Cancel) {
        // the broker sends nothing more to the consumer after its cancel
        if let Some(consumer) = self.consumers.remove(&cancel.consumer_tag) {
            lock(&self.channel.shared.consumer_tags).remove(&cancel.consumer_tag);
            Self::requeue(&self.channel, consumer.fifo).await;
        }
        let no_wait = cancel.no_wait;
        let consumer_tag = cancel.consumer_tag.clone();
        match self.callback {
            Some(ref mut cb) => cb.cancel(&self.channel, cancel).await,
            None => warn!("{} on {}, no callback registered", cancel, self.channel),
        }
        if !no_wait {
            let cancel_ok = CancelOk { consumer_tag };
            if let Err(err) = self.channel.send_frame(cancel_ok.into_frame()).await {
                error!("failed to respond cancel-ok on {}, cause: {}", self.channel, err);
            }
        }
    }

    fn respond(&mut self, frame: Frame) {
        match self.responders.remove(frame.method_header()) {
            Some(responder) => {
                if let Err(response) = responder.send(IncomingMessage::Ok(frame)) {
                    debug!("requester gone before {:?} on {}", response, self.channel);
                }
            }
            None => warn!("no responder for {} on {}", frame, self.channel),
        }
    }

    /// Fail every waiting request with `message`.
    fn fail_responders<F>(&mut self, message: F)
    where
        F: Fn() -> IncomingMessage,
    {
        for (_, responder) in self.responders.drain() {
            // requester may be gone
            let _ = responder.send(message());
        }
    }

    /// Handle one incoming frame. Return false to exit.
    async fn handle_frame(&mut self, frame: Frame) -> bool {
        if self.channel.state() == ChannelState::Closing
            && !matches!(
                frame,
                Frame::CloseChannelOk(..) | Frame::CloseChannel(..) | Frame::Close(..)
            )
        {
            trace!("discard {} on closing {}", frame, self.channel);
            return true;
        }

        match frame {
            ////////////////////////////////////////////////
            // frames for closing channel
            // channel.close-ok response from server
            Frame::CloseChannelOk(..) => {
                self.respond(frame);
                return false;
            }
            // channel.close request from server, close-ok already sent by the reader
            Frame::CloseChannel(_, close_channel) => {
                lock(&self.channel.shared.confirms).close();
                self.channel.shared.state.transition(ChannelState::Closed);
                let (code, text) = (close_channel.reply_code, close_channel.reply_text.clone());
                self.fail_responders(|| IncomingMessage::Exception(code, text.clone()));

                match self.callback {
                    Some(ref mut cb) => cb.close(&self.channel, close_channel).await,
                    None => error!("{} closed by broker: {}", self.channel, close_channel),
                }
                return false;
            }
            // connection closed by the broker or the transport failed
            Frame::Close(_, close) => {
                lock(&self.channel.shared.confirms).close();
                self.channel.shared.state.transition(ChannelState::Closed);
                let (code, text) = (close.reply_code, close.reply_text);
                self.fail_responders(|| IncomingMessage::ConnectionException(code, text.clone()));
                return false;
            }

            ////////////////////////////////////////////////
            // deliveries and publisher confirms
            Frame::Deliver(_, deliver) => self.handle_deliver(deliver).await,
            Frame::Ack(_, ack) => {
                let resolved = lock(&self.channel.shared.confirms).ack(ack.delivery_tag, ack.multiple);
                trace!("ack {} resolved {} confirmations on {}", ack.delivery_tag, resolved, self.channel);
            }
            Frame::Nack(_, nack) => {
                let resolved =
                    lock(&self.channel.shared.confirms).nack(nack.delivery_tag, nack.multiple);
                debug!("nack {} resolved {} confirmations on {}", nack.delivery_tag, resolved, self.channel);
            }
            Frame::Return(_, ret) => {
                lock(&self.channel.shared.confirms).mark_returned();
                match self.callback {
                    Some(ref mut cb) => cb.publish_return(&self.channel, ret).await,
                    None => warn!("{} on {}, no callback registered", ret, self.channel),
                }
            }
            Frame::Cancel(_, cancel) => self.handle_cancel(cancel).await,

            ////////////////////////////////////////////////
            // synchronous response frames
            Frame::OpenChannelOk(..)
            | Frame::DeclareOk(..)
            | Frame::DeclareQueueOk(..)
            | Frame::BindQueueOk(..)
            | Frame::UnbindQueueOk(..)
            | Frame::PurgeQueueOk(..)
            | Frame::DeleteQueueOk(..)
            | Frame::QosOk(..)
            | Frame::ConsumeOk(..)
            | Frame::SelectOk(..) => self.respond(frame),
            Frame::CancelOk(_, ref cancel_ok) => {
                // no delivery to the consumer follows its cancel-ok
                self.retired.release(&cancel_ok.consumer_tag);
                self.respond(frame);
            }

            _ => warn!("unexpected {} on {}", frame, self.channel),
        }
        true
    }

    async fn run(mut self) {
        trace!("starts up dispatcher task of {}", self.channel);
        // main loop of dispatcher
        loop {
            tokio::select! {
                biased;

                // the dispatcher also holds a `Channel` instance, so this
                // should never return `None`
                command = self.dispatcher_mgmt_rx.recv() => {
                    match command {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                // only one tx half held by connection handler, once the tx half drop
                // it will return `None`, so exit the dispatcher
                message = self.dispatcher_rx.recv() => {
                    match message {
                        Some(frame) => {
                            if !self.handle_frame(frame).await {
                                break;
                            }
                        }
                        None => {
                            debug!("dispatcher mpsc channel closed, {}", self.channel);
                            break;
                        }
                    }
                }
            }
        }

        self.channel.shared.state.transition(ChannelState::Closed);
        lock(&self.channel.shared.confirms).close();
        let dropped = lock(&self.channel.shared.deliveries).clear();
        if dropped > 0 {
            debug!("{} unacknowledged deliveries left to the broker on {}", dropped, self.channel);
        }
        lock(&self.channel.shared.consumer_tags).clear();
        // consumers' tx halves drop here, ending their feeds
        debug!("exit dispatcher of {}", self.channel);
    }
}
