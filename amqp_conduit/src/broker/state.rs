//! Broker model: virtual hosts with their exchanges and queues, and the sessions of the
//! connected clients.
//!
//! All handlers run under the broker lock and never await. Frames for a client are pushed
//! into its loopback transport as they are produced.
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
};

use bytes::Bytes;
use tracing::{debug, info, trace};

use super::routing::Exchange;
use crate::{
    channel::ExchangeType,
    frame::{
        Ack, AmqpChannelId, BasicProperties, BindQueueOk, Cancel, CancelOk, CloseChannel,
        CloseChannelOk, CloseOk, ConsumeOk, DeclareOk, DeclareQueue, DeclareQueueOk, Deliver,
        DeleteQueueOk, DeliveryTag, Frame, OpenChannel, OpenChannelOk, PurgeQueueOk, QosOk, ReplyCode, Return,
        SelectOk, UnbindQueueOk, ACCESS_REFUSED, CHANNEL_ERROR, COMMAND_INVALID,
        CONN_DEFAULT_CHANNEL, DEFAULT_CHANNEL_MAX, NOT_ALLOWED, NOT_FOUND, NO_ROUTE,
        PRECONDITION_FAILED, RESOURCE_LOCKED,
    },
    net::loopback::PeerSender,
};

pub(crate) type ConnectionId = u64;

pub(crate) const DEFAULT_VIRTUAL_HOST: &str = "/";

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    content: Bytes,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueConsumer {
    connection: ConnectionId,
    channel_id: AmqpChannelId,
    consumer_tag: String,
    no_ack: bool,
    exclusive: bool,
}

impl QueueConsumer {
    fn matches(&self, connection: ConnectionId, channel_id: AmqpChannelId, consumer_tag: &str) -> bool {
        self.connection == connection
            && self.channel_id == channel_id
            && self.consumer_tag == consumer_tag
    }
}

#[derive(Debug)]
struct Queue {
    durable: bool,
    auto_delete: bool,
    /// Connection owning an exclusive queue.
    owner: Option<ConnectionId>,
    messages: VecDeque<Message>,
    consumers: Vec<QueueConsumer>,
    next_consumer: usize,
}

impl Queue {
    fn new(declare: &DeclareQueue, connection: ConnectionId) -> Self {
        Self {
            durable: declare.durable,
            auto_delete: declare.auto_delete,
            owner: declare.exclusive.then_some(connection),
            messages: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        }
    }

    fn is_accessible_by(&self, connection: ConnectionId) -> bool {
        self.owner.map_or(true, |owner| owner == connection)
    }

    fn inequivalent_arg(&self, declare: &DeclareQueue) -> Option<&'static str> {
        if self.durable != declare.durable {
            Some("durable")
        } else if self.owner.is_some() != declare.exclusive {
            Some("exclusive")
        } else if self.auto_delete != declare.auto_delete {
            Some("auto_delete")
        } else {
            None
        }
    }
}

struct Unacked {
    queue: String,
    message: Message,
}

#[derive(Default)]
struct ChannelSession {
    confirm: bool,
    publish_seq: u64,
    delivery_tag: DeliveryTag,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    /// Consumer tag to queue name.
    consumers: HashMap<String, String>,
}

impl ChannelSession {
    fn settle(
        &mut self,
        delivery_tag: DeliveryTag,
        multiple: bool,
    ) -> Result<Vec<Unacked>, ChannelException> {
        if multiple && delivery_tag == 0 {
            return Ok(std::mem::take(&mut self.unacked).into_values().collect());
        }
        if !self.unacked.contains_key(&delivery_tag) {
            return Err(precondition_failed(format!(
                "unknown delivery tag {}",
                delivery_tag
            )));
        }
        if multiple {
            let rest = self.unacked.split_off(&delivery_tag.saturating_add(1));
            let settled = std::mem::replace(&mut self.unacked, rest);
            Ok(settled.into_values().collect())
        } else {
            Ok(self.unacked.remove(&delivery_tag).into_iter().collect())
        }
    }
}

struct ConnectionSession {
    virtual_host: String,
    sender: PeerSender,
    channels: HashMap<AmqpChannelId, ChannelSession>,
}

type Sessions = HashMap<ConnectionId, ConnectionSession>;

/////////////////////////////////////////////////////////////////////////////
/// Channel level error, answered with `channel.close`.
#[derive(Debug)]
struct ChannelException {
    reply_code: ReplyCode,
    reply_text: String,
}

impl ChannelException {
    fn new(reply_code: ReplyCode, name: &str, detail: impl fmt::Display) -> Self {
        Self {
            reply_code,
            reply_text: format!("{} - {}", name, detail),
        }
    }
}

fn not_found(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(NOT_FOUND, "NOT_FOUND", detail)
}

fn precondition_failed(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(PRECONDITION_FAILED, "PRECONDITION_FAILED", detail)
}

fn resource_locked(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(RESOURCE_LOCKED, "RESOURCE_LOCKED", detail)
}

fn access_refused(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(ACCESS_REFUSED, "ACCESS_REFUSED", detail)
}

fn not_allowed(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(NOT_ALLOWED, "NOT_ALLOWED", detail)
}

fn command_invalid(detail: impl fmt::Display) -> ChannelException {
    ChannelException::new(COMMAND_INVALID, "COMMAND_INVALID", detail)
}

fn channel_mut(
    sessions: &mut Sessions,
    connection: ConnectionId,
    channel_id: AmqpChannelId,
) -> Result<&mut ChannelSession, ChannelException> {
    sessions
        .get_mut(&connection)
        .and_then(|session| session.channels.get_mut(&channel_id))
        .ok_or_else(|| {
            ChannelException::new(CHANNEL_ERROR, "CHANNEL_ERROR", "expected 'channel.open'")
        })
}

fn send(sender: &PeerSender, channel_id: AmqpChannelId, frame: Frame) {
    trace!("send {} on channel {}", frame, channel_id);
    if let Err(err) = sender.send(channel_id, frame) {
        debug!("drop frame for channel {}, cause: {}", channel_id, err);
    }
}

/////////////////////////////////////////////////////////////////////////////
struct VirtualHost {
    name: String,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

impl VirtualHost {
    fn new(name: &str) -> Self {
        let exchanges = [
            ("", ExchangeType::Direct),
            ("amq.direct", ExchangeType::Direct),
            ("amq.fanout", ExchangeType::Fanout),
            ("amq.topic", ExchangeType::Topic),
        ]
        .into_iter()
        .map(|(name, typ)| (name.to_owned(), Exchange::new(typ, true)))
        .collect();
        Self {
            name: name.to_owned(),
            exchanges,
            queues: HashMap::new(),
        }
    }

    fn queue_mut(
        &mut self,
        name: &str,
        connection: ConnectionId,
    ) -> Result<&mut Queue, ChannelException> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| not_found(format!("no queue '{}' in vhost '{}'", name, self.name)))?;
        if !queue.is_accessible_by(connection) {
            return Err(resource_locked(format!(
                "cannot obtain exclusive access to locked queue '{}' in vhost '{}'",
                name, self.name
            )));
        }
        Ok(queue)
    }

    fn exchange_mut(&mut self, name: &str) -> Result<&mut Exchange, ChannelException> {
        if name.is_empty() {
            return Err(access_refused(
                "operation not permitted on the default exchange",
            ));
        }
        self.exchanges
            .get_mut(name)
            .ok_or_else(|| not_found(format!("no exchange '{}' in vhost '{}'", name, self.name)))
    }

    /// Remove the queue together with its bindings.
    fn remove_queue(&mut self, name: &str) -> Option<Queue> {
        let queue = self.queues.remove(name)?;
        let mut orphans = Vec::new();
        for (exchange_name, exchange) in self.exchanges.iter_mut() {
            if exchange.unbind_queue(name) && exchange.auto_delete && exchange.bindings.is_empty()
            {
                orphans.push(exchange_name.clone());
            }
        }
        for exchange_name in orphans {
            debug!("auto-delete exchange '{}' in vhost '{}'", exchange_name, self.name);
            self.exchanges.remove(&exchange_name);
        }
        debug!("deleted queue '{}' in vhost '{}'", name, self.name);
        Some(queue)
    }

    fn remove_consumer(
        &mut self,
        queue_name: &str,
        connection: ConnectionId,
        channel_id: AmqpChannelId,
        consumer_tag: &str,
    ) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        queue
            .consumers
            .retain(|c| !c.matches(connection, channel_id, consumer_tag));
        if queue.auto_delete && queue.consumers.is_empty() {
            self.remove_queue(queue_name);
        }
    }

    /// Put settled messages back in front of their queues, in their original order.
    fn requeue(&mut self, settled: Vec<Unacked>, sessions: &mut Sessions) {
        let mut touched: Vec<String> = Vec::new();
        for Unacked { queue, mut message } in settled.into_iter().rev() {
            if let Some(target) = self.queues.get_mut(&queue) {
                message.redelivered = true;
                target.messages.push_front(message);
                if !touched.contains(&queue) {
                    touched.push(queue);
                }
            }
        }
        for queue in touched {
            self.dispatch(&queue, sessions);
        }
    }

    /// Deliver ready messages to the queue's consumers in round robin.
    fn dispatch(&mut self, queue_name: &str, sessions: &mut Sessions) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        while !queue.consumers.is_empty() {
            let Some(message) = queue.messages.pop_front() else {
                break;
            };
            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;
            let consumer = &queue.consumers[index];
            let Some(session) = sessions.get_mut(&consumer.connection) else {
                queue.messages.push_front(message);
                break;
            };
            let Some(channel) = session.channels.get_mut(&consumer.channel_id) else {
                queue.messages.push_front(message);
                break;
            };

            channel.delivery_tag += 1;
            let deliver = Deliver {
                consumer_tag: consumer.consumer_tag.clone(),
                delivery_tag: channel.delivery_tag,
                redelivered: message.redelivered,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                properties: message.properties.clone(),
                content: message.content.clone(),
            };
            if !consumer.no_ack {
                channel.unacked.insert(
                    channel.delivery_tag,
                    Unacked {
                        queue: queue_name.to_owned(),
                        message,
                    },
                );
            }
            send(&session.sender, consumer.channel_id, deliver.into_frame());
        }
    }

    /// Requeue what the channel holds and forget its consumers.
    fn release_channel(
        &mut self,
        connection: ConnectionId,
        channel_id: AmqpChannelId,
        channel: ChannelSession,
        sessions: &mut Sessions,
    ) {
        for (consumer_tag, queue_name) in channel.consumers {
            self.remove_consumer(&queue_name, connection, channel_id, &consumer_tag);
        }
        self.requeue(channel.unacked.into_values().collect(), sessions);
    }
}

/////////////////////////////////////////////////////////////////////////////
pub(crate) struct BrokerState {
    users: HashMap<String, String>,
    vhosts: HashMap<String, VirtualHost>,
    sessions: Sessions,
    channel_max: u16,
    tls_required: bool,
    last_connection_id: ConnectionId,
    name_seq: u64,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            users: HashMap::from([("guest".to_owned(), "guest".to_owned())]),
            vhosts: HashMap::from([(
                DEFAULT_VIRTUAL_HOST.to_owned(),
                VirtualHost::new(DEFAULT_VIRTUAL_HOST),
            )]),
            sessions: HashMap::new(),
            channel_max: DEFAULT_CHANNEL_MAX,
            tls_required: false,
            last_connection_id: 0,
            name_seq: 0,
        }
    }
}

impl BrokerState {
    pub fn add_user(&mut self, username: &str, password: &str) {
        self.users.insert(username.to_owned(), password.to_owned());
    }

    pub fn add_vhost(&mut self, name: &str) {
        self.vhosts
            .entry(name.to_owned())
            .or_insert_with(|| VirtualHost::new(name));
    }

    pub fn has_vhost(&self, name: &str) -> bool {
        self.vhosts.contains_key(name)
    }

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.users.get(username).map_or(false, |p| p == password)
    }

    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    pub fn set_channel_max(&mut self, channel_max: u16) {
        self.channel_max = channel_max;
    }

    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    pub fn set_tls_required(&mut self, tls_required: bool) {
        self.tls_required = tls_required;
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn register_connection(&mut self, virtual_host: &str, sender: PeerSender) -> ConnectionId {
        self.last_connection_id += 1;
        self.sessions.insert(
            self.last_connection_id,
            ConnectionSession {
                virtual_host: virtual_host.to_owned(),
                sender,
                channels: HashMap::new(),
            },
        );
        self.last_connection_id
    }

    /// Release everything the connection holds: unacked messages are requeued, its
    /// consumers and exclusive queues are removed.
    pub fn drop_connection(&mut self, connection: ConnectionId) {
        let Some(session) = self.sessions.remove(&connection) else {
            return;
        };
        if let Some(vhost) = self.vhosts.get_mut(&session.virtual_host) {
            for (channel_id, channel) in session.channels {
                vhost.release_channel(connection, channel_id, channel, &mut self.sessions);
            }
            let exclusive: Vec<String> = vhost
                .queues
                .iter()
                .filter(|(_, queue)| queue.owner == Some(connection))
                .map(|(name, _)| name.clone())
                .collect();
            for name in exclusive {
                vhost.remove_queue(&name);
            }
        }
        info!("connection {} dropped", connection);
    }

    /// Send a connection level frame to every client.
    pub fn broadcast(&self, frame: Frame) {
        for session in self.sessions.values() {
            send(&session.sender, CONN_DEFAULT_CHANNEL, frame.clone());
        }
    }

    pub fn queue_depth(&self, virtual_host: &str, queue: &str) -> Option<usize> {
        self.vhosts
            .get(virtual_host)?
            .queues
            .get(queue)
            .map(|q| q.messages.len())
    }

    /// Messages of `queue` delivered but not settled yet.
    pub fn queue_unacked(&self, virtual_host: &str, queue: &str) -> Option<usize> {
        self.vhosts.get(virtual_host)?.queues.get(queue)?;
        let count = self
            .sessions
            .values()
            .filter(|session| session.virtual_host == virtual_host)
            .flat_map(|session| session.channels.values())
            .flat_map(|channel| channel.unacked.values())
            .filter(|unacked| unacked.queue == queue)
            .count();
        Some(count)
    }

    pub fn consumer_count(&self, virtual_host: &str, queue: &str) -> Option<usize> {
        self.vhosts
            .get(virtual_host)?
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
    }

    /// Handle a frame written by the client, return `false` once the connection is over.
    pub fn handle_frame(
        &mut self,
        connection: ConnectionId,
        channel_id: AmqpChannelId,
        frame: Frame,
    ) -> bool {
        trace!("connection {} received {} on channel {}", connection, frame, channel_id);
        if channel_id == CONN_DEFAULT_CHANNEL {
            return self.handle_connection_frame(connection, frame);
        }
        match frame {
            Frame::OpenChannel(..) => self.open_channel(connection, channel_id),
            Frame::CloseChannel(_, close) => {
                debug!(
                    "channel {} of connection {} closed by client: {}",
                    channel_id, connection, close.reply_text
                );
                self.close_channel(connection, channel_id);
                self.send(connection, channel_id, CloseChannelOk.into_frame());
            }
            Frame::CloseChannelOk(..) => {}
            frame => {
                if !self.is_channel_open(connection, channel_id) {
                    debug!(
                        "discard {} on closed channel {} of connection {}",
                        frame, channel_id, connection
                    );
                    return true;
                }
                let header = frame.method_header();
                if let Err(exception) = self.handle_channel_frame(connection, channel_id, frame) {
                    info!(
                        "close channel {} of connection {}: {}",
                        channel_id, connection, exception.reply_text
                    );
                    self.close_channel(connection, channel_id);
                    let close = CloseChannel::new(
                        exception.reply_code,
                        &exception.reply_text,
                        header.class_id(),
                        header.method_id(),
                    );
                    self.send(connection, channel_id, close.into_frame());
                }
            }
        }
        true
    }

    fn handle_connection_frame(&mut self, connection: ConnectionId, frame: Frame) -> bool {
        match frame {
            Frame::Close(_, close) => {
                info!(
                    "connection {} closed by client: {}: {}",
                    connection, close.reply_code, close.reply_text
                );
                self.send(connection, CONN_DEFAULT_CHANNEL, CloseOk.into_frame());
                false
            }
            Frame::CloseOk(..) => false,
            frame => {
                debug!("discard {} on connection {}", frame, connection);
                true
            }
        }
    }

    fn open_channel(&mut self, connection: ConnectionId, channel_id: AmqpChannelId) {
        let refused = if self.channel_max != 0 && channel_id > self.channel_max {
            Some(format!("channel id {} exceeds channel_max", channel_id))
        } else if self.is_channel_open(connection, channel_id) {
            Some(format!("channel {} already open", channel_id))
        } else {
            None
        };
        if let Some(reason) = refused {
            let header = OpenChannel::header();
            let close = CloseChannel::new(
                CHANNEL_ERROR,
                &format!("CHANNEL_ERROR - {}", reason),
                header.class_id(),
                header.method_id(),
            );
            self.send(connection, channel_id, close.into_frame());
            return;
        }
        if let Some(session) = self.sessions.get_mut(&connection) {
            session
                .channels
                .insert(channel_id, ChannelSession::default());
        }
        self.send(connection, channel_id, OpenChannelOk.into_frame());
    }

    fn close_channel(&mut self, connection: ConnectionId, channel_id: AmqpChannelId) {
        let Some(session) = self.sessions.get_mut(&connection) else {
            return;
        };
        let Some(channel) = session.channels.remove(&channel_id) else {
            return;
        };
        let vhost_name = session.virtual_host.clone();
        if let Some(vhost) = self.vhosts.get_mut(&vhost_name) {
            vhost.release_channel(connection, channel_id, channel, &mut self.sessions);
        }
    }

    fn is_channel_open(&self, connection: ConnectionId, channel_id: AmqpChannelId) -> bool {
        self.sessions
            .get(&connection)
            .map_or(false, |session| session.channels.contains_key(&channel_id))
    }

    fn send(&self, connection: ConnectionId, channel_id: AmqpChannelId, frame: Frame) {
        if let Some(session) = self.sessions.get(&connection) {
            send(&session.sender, channel_id, frame);
        }
    }

    fn next_name(&mut self, prefix: &str) -> String {
        self.name_seq += 1;
        format!("{}-{}", prefix, self.name_seq)
    }

    fn handle_channel_frame(
        &mut self,
        connection: ConnectionId,
        channel_id: AmqpChannelId,
        frame: Frame,
    ) -> Result<(), ChannelException> {
        // generated names are taken up front, the rest of the state is borrowed by field
        let generated = match &frame {
            Frame::DeclareQueue(_, declare) if declare.queue.is_empty() => {
                Some(self.next_name("amq.gen"))
            }
            Frame::Consume(_, consume) if consume.consumer_tag.is_empty() => {
                Some(self.next_name("amq.ctag"))
            }
            _ => None,
        };

        let Self {
            vhosts, sessions, ..
        } = self;
        let Some((sender, vhost_name)) = sessions
            .get(&connection)
            .map(|s| (s.sender.clone(), s.virtual_host.clone()))
        else {
            return Ok(());
        };
        let Some(vhost) = vhosts.get_mut(&vhost_name) else {
            return Ok(());
        };
        let reply = |frame: Frame| send(&sender, channel_id, frame);

        match frame {
            Frame::Declare(_, declare) => {
                let typ = ExchangeType::try_from(declare.typ.as_str()).map_err(command_invalid)?;
                match vhost.exchanges.get(&declare.exchange) {
                    Some(exchange) if !declare.passive => {
                        let inequivalent = if exchange.typ != typ {
                            Some("type")
                        } else if exchange.durable != declare.durable {
                            Some("durable")
                        } else if exchange.auto_delete != declare.auto_delete {
                            Some("auto_delete")
                        } else {
                            None
                        };
                        if let Some(arg) = inequivalent {
                            return Err(precondition_failed(format!(
                                "inequivalent arg '{}' for exchange '{}' in vhost '{}'",
                                arg, declare.exchange, vhost_name
                            )));
                        }
                    }
                    Some(_) => {}
                    None => {
                        if declare.passive {
                            return Err(not_found(format!(
                                "no exchange '{}' in vhost '{}'",
                                declare.exchange, vhost_name
                            )));
                        }
                        if declare.exchange.starts_with("amq.") {
                            return Err(access_refused(format!(
                                "exchange name '{}' contains reserved prefix 'amq.*'",
                                declare.exchange
                            )));
                        }
                        let mut exchange = Exchange::new(typ, declare.durable);
                        exchange.auto_delete = declare.auto_delete;
                        exchange.internal = declare.internal;
                        vhost.exchanges.insert(declare.exchange.clone(), exchange);
                        debug!(
                            "declared {} exchange '{}' in vhost '{}'",
                            typ, declare.exchange, vhost_name
                        );
                    }
                }
                if !declare.no_wait {
                    reply(DeclareOk.into_frame());
                }
            }
            Frame::DeclareQueue(_, declare) => {
                let name = generated.unwrap_or_else(|| declare.queue.clone());
                match vhost.queues.get(&name) {
                    Some(queue) => {
                        if !queue.is_accessible_by(connection) {
                            return Err(resource_locked(format!(
                                "cannot obtain exclusive access to locked queue '{}' in vhost '{}'",
                                name, vhost_name
                            )));
                        }
                        let inequivalent = queue
                            .inequivalent_arg(&declare)
                            .filter(|_| !declare.passive);
                        if let Some(arg) = inequivalent {
                            return Err(precondition_failed(format!(
                                "inequivalent arg '{}' for queue '{}' in vhost '{}'",
                                arg, name, vhost_name
                            )));
                        }
                    }
                    None => {
                        if declare.passive {
                            return Err(not_found(format!(
                                "no queue '{}' in vhost '{}'",
                                name, vhost_name
                            )));
                        }
                        if !declare.queue.is_empty() && declare.queue.starts_with("amq.") {
                            return Err(access_refused(format!(
                                "queue name '{}' contains reserved prefix 'amq.*'",
                                name
                            )));
                        }
                        vhost
                            .queues
                            .insert(name.clone(), Queue::new(&declare, connection));
                        debug!("declared queue '{}' in vhost '{}'", name, vhost_name);
                    }
                }
                if !declare.no_wait {
                    if let Some(queue) = vhost.queues.get(&name) {
                        reply(
                            DeclareQueueOk {
                                message_count: queue.messages.len() as u32,
                                consumer_count: queue.consumers.len() as u32,
                                queue: name,
                            }
                            .into_frame(),
                        );
                    }
                }
            }
            Frame::BindQueue(_, bind) => {
                vhost.queue_mut(&bind.queue, connection)?;
                let exchange = vhost.exchange_mut(&bind.exchange)?;
                if exchange.bind(&bind.queue, &bind.routing_key) {
                    debug!(
                        "bound queue '{}' to exchange '{}' with key '{}'",
                        bind.queue, bind.exchange, bind.routing_key
                    );
                }
                if !bind.no_wait {
                    reply(BindQueueOk.into_frame());
                }
            }
            Frame::UnbindQueue(_, unbind) => {
                vhost.queue_mut(&unbind.queue, connection)?;
                let exchange = vhost.exchange_mut(&unbind.exchange)?;
                exchange.unbind(&unbind.queue, &unbind.routing_key);
                if exchange.auto_delete && exchange.bindings.is_empty() {
                    vhost.exchanges.remove(&unbind.exchange);
                }
                reply(UnbindQueueOk.into_frame());
            }
            Frame::PurgeQueue(_, purge) => {
                let queue = vhost.queue_mut(&purge.queue, connection)?;
                let message_count = queue.messages.len() as u32;
                queue.messages.clear();
                if !purge.no_wait {
                    reply(PurgeQueueOk { message_count }.into_frame());
                }
            }
            Frame::DeleteQueue(_, delete) => {
                if let Some(queue) = vhost.queues.get(&delete.queue) {
                    if !queue.is_accessible_by(connection) {
                        return Err(resource_locked(format!(
                            "cannot obtain exclusive access to locked queue '{}' in vhost '{}'",
                            delete.queue, vhost_name
                        )));
                    }
                    if delete.if_unused && !queue.consumers.is_empty() {
                        return Err(precondition_failed(format!(
                            "queue '{}' in vhost '{}' in use",
                            delete.queue, vhost_name
                        )));
                    }
                    if delete.if_empty && !queue.messages.is_empty() {
                        return Err(precondition_failed(format!(
                            "queue '{}' in vhost '{}' is not empty",
                            delete.queue, vhost_name
                        )));
                    }
                }
                let message_count = match vhost.remove_queue(&delete.queue) {
                    Some(queue) => {
                        for consumer in queue.consumers {
                            if let Some(session) = sessions.get_mut(&consumer.connection) {
                                if let Some(channel) = session.channels.get_mut(&consumer.channel_id) {
                                    channel.consumers.remove(&consumer.consumer_tag);
                                }
                                let cancel = Cancel::new(&consumer.consumer_tag, true);
                                send(&session.sender, consumer.channel_id, cancel.into_frame());
                            }
                        }
                        queue.messages.len() as u32
                    }
                    None => 0,
                };
                if !delete.no_wait {
                    reply(DeleteQueueOk { message_count }.into_frame());
                }
            }
            Frame::Qos(_, qos) => {
                trace!(
                    "prefetch_count = {}, global = {} on channel {}",
                    qos.prefetch_count,
                    qos.global,
                    channel_id
                );
                reply(QosOk.into_frame());
            }
            Frame::Consume(_, consume) => {
                let queue = vhost.queue_mut(&consume.queue, connection)?;
                let channel = channel_mut(sessions, connection, channel_id)?;
                let consumer_tag = generated.unwrap_or_else(|| consume.consumer_tag.clone());
                if channel.consumers.contains_key(&consumer_tag) {
                    return Err(not_allowed(format!(
                        "attempt to reuse consumer tag '{}'",
                        consumer_tag
                    )));
                }
                if queue.consumers.iter().any(|c| c.exclusive)
                    || (consume.exclusive && !queue.consumers.is_empty())
                {
                    return Err(access_refused(format!(
                        "queue '{}' in vhost '{}' in exclusive use",
                        consume.queue, vhost_name
                    )));
                }
                channel
                    .consumers
                    .insert(consumer_tag.clone(), consume.queue.clone());
                queue.consumers.push(QueueConsumer {
                    connection,
                    channel_id,
                    consumer_tag: consumer_tag.clone(),
                    no_ack: consume.no_ack,
                    exclusive: consume.exclusive,
                });
                debug!("consumer '{}' attached to queue '{}'", consumer_tag, consume.queue);
                if !consume.no_wait {
                    reply(ConsumeOk { consumer_tag }.into_frame());
                }
                vhost.dispatch(&consume.queue, sessions);
            }
            Frame::Cancel(_, cancel) => {
                let channel = channel_mut(sessions, connection, channel_id)?;
                if let Some(queue_name) = channel.consumers.remove(&cancel.consumer_tag) {
                    vhost.remove_consumer(&queue_name, connection, channel_id, &cancel.consumer_tag);
                }
                if !cancel.no_wait {
                    reply(
                        CancelOk {
                            consumer_tag: cancel.consumer_tag,
                        }
                        .into_frame(),
                    );
                }
            }
            Frame::Publish(_, publish) => {
                let exchange = vhost.exchanges.get(&publish.exchange).ok_or_else(|| {
                    not_found(format!(
                        "no exchange '{}' in vhost '{}'",
                        publish.exchange, vhost_name
                    ))
                })?;
                if exchange.internal {
                    return Err(access_refused(format!(
                        "cannot publish to internal exchange '{}' in vhost '{}'",
                        publish.exchange, vhost_name
                    )));
                }
                let queues = if publish.exchange.is_empty() {
                    if vhost.queues.contains_key(&publish.routing_key) {
                        vec![publish.routing_key.clone()]
                    } else {
                        Vec::new()
                    }
                } else {
                    exchange.route(&publish.routing_key)
                };

                let channel = channel_mut(sessions, connection, channel_id)?;
                let confirm_tag = if channel.confirm {
                    channel.publish_seq += 1;
                    Some(channel.publish_seq)
                } else {
                    None
                };

                if queues.is_empty() {
                    trace!(
                        "unroutable message to exchange '{}' with key '{}'",
                        publish.exchange,
                        publish.routing_key
                    );
                    if publish.mandatory {
                        reply(
                            Return {
                                reply_code: NO_ROUTE,
                                reply_text: "NO_ROUTE".to_owned(),
                                exchange: publish.exchange.clone(),
                                routing_key: publish.routing_key.clone(),
                                properties: publish.properties.clone(),
                                content: publish.content.clone(),
                            }
                            .into_frame(),
                        );
                    }
                }
                for name in &queues {
                    if let Some(queue) = vhost.queues.get_mut(name) {
                        queue.messages.push_back(Message {
                            exchange: publish.exchange.clone(),
                            routing_key: publish.routing_key.clone(),
                            properties: publish.properties.clone(),
                            content: publish.content.clone(),
                            redelivered: false,
                        });
                    }
                }
                if let Some(delivery_tag) = confirm_tag {
                    reply(Ack::new(delivery_tag, false).into_frame());
                }
                for name in &queues {
                    vhost.dispatch(name, sessions);
                }
            }
            Frame::Ack(_, ack) => {
                let channel = channel_mut(sessions, connection, channel_id)?;
                channel.settle(ack.delivery_tag, ack.multiple)?;
            }
            Frame::Reject(_, reject) => {
                let channel = channel_mut(sessions, connection, channel_id)?;
                let settled = channel.settle(reject.delivery_tag, false)?;
                if reject.requeue {
                    vhost.requeue(settled, sessions);
                }
            }
            Frame::Nack(_, nack) => {
                let channel = channel_mut(sessions, connection, channel_id)?;
                let settled = channel.settle(nack.delivery_tag, nack.multiple)?;
                if nack.requeue {
                    vhost.requeue(settled, sessions);
                }
            }
            Frame::Select(_, select) => {
                channel_mut(sessions, connection, channel_id)?.confirm = true;
                if !select.no_wait {
                    reply(SelectOk.into_frame());
                }
            }
            frame => {
                debug!("discard unexpected {} on channel {}", frame, channel_id);
            }
        }
        Ok(())
    }
}
