//! In-process broker engine
//!
//! Implements the exchange/queue/binding model behind the same
//! [`BrokerConnection`]/[`BrokerChannel`] seam as the AMQP backend:
//! - direct, topic and fanout exchanges, plus the default exchange `""`
//!   which routes to the queue named by the routing key
//! - queue attributes checked on re-declaration; exclusive queues owned by
//!   the declaring connection
//! - per-channel prefetch: the engine never hands a channel more
//!   unacknowledged deliveries than its limit
//! - `nack` with requeue appends the message to the back of its queue marked
//!   redelivered; without requeue it goes to the queue's dead-letter exchange
//! - closing a channel requeues what it held and ends its delivery streams;
//!   deliveries still buffered for its consumers are withdrawn
//!
//! All state sits behind one `Mutex` that is never held across an `.await`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::message::{Delivery, Envelope};
use super::topic::ExchangeKind;
use super::{BrokerChannel, BrokerConnection, DeclaredQueue, Deliveries};
use crate::topology::QueueAttributes;
use crate::utils::error::BrokerError;

type ConnectionId = u64;
type ChannelId = u64;
type DeliverySender = mpsc::UnboundedSender<Result<Delivery, BrokerError>>;

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

impl StoredMessage {
    fn delivery(&self, delivery_tag: u64) -> Delivery {
        Delivery {
            delivery_tag,
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            redelivered: self.redelivered,
            content_type: self.content_type.clone(),
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Exchange {
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Debug)]
struct Consumer {
    tag: String,
    channel: ChannelId,
    sender: DeliverySender,
}

#[derive(Debug)]
struct Queue {
    attributes: QueueAttributes,
    owner: Option<ConnectionId>,
    bindings: Vec<(String, String)>,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    had_consumer: bool,
}

#[derive(Debug)]
struct ChannelState {
    connection: ConnectionId,
    prefetch: u16,
    next_tag: u64,
    unacked: HashMap<u64, (String, StoredMessage)>,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

#[derive(Debug, Default)]
struct State {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    channels: HashMap<ChannelId, ChannelState>,
    connections: HashSet<ConnectionId>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn channel(&self, id: ChannelId) -> Result<&ChannelState, BrokerError> {
        self.channels.get(&id).ok_or(BrokerError::ChannelClosed)
    }

    fn check_owner(queue: &Queue, name: &str, connection: ConnectionId) -> Result<(), BrokerError> {
        match queue.owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(format!(
                "queue '{name}' is exclusive to another connection"
            ))),
            _ => Ok(()),
        }
    }

    fn exchange_declare(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let wanted = Exchange { kind, durable };
        match self.exchanges.get(name) {
            Some(existing) if *existing != wanted => Err(BrokerError::PreconditionFailed(format!(
                "inequivalent arguments for exchange '{name}'"
            ))),
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(name.to_string(), wanted);
                Ok(())
            }
        }
    }

    fn queue_declare(
        &mut self,
        connection: ConnectionId,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<DeclaredQueue, BrokerError> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };

        if let Some(queue) = self.queues.get(&name) {
            Self::check_owner(queue, &name, connection)?;
            if queue.attributes != *attributes {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arguments for queue '{name}'"
                )));
            }
        } else {
            self.queues.insert(
                name.clone(),
                Queue {
                    attributes: attributes.clone(),
                    owner: attributes.exclusive.then_some(connection),
                    bindings: Vec::new(),
                    ready: VecDeque::new(),
                    consumers: Vec::new(),
                    next_consumer: 0,
                    had_consumer: false,
                },
            );
        }

        let queue = &self.queues[&name];
        Ok(DeclaredQueue {
            message_count: u32::try_from(queue.ready.len()).unwrap_or(u32::MAX),
            consumer_count: u32::try_from(queue.consumers.len()).unwrap_or(u32::MAX),
            name,
        })
    }

    fn queue_bind(
        &mut self,
        connection: ConnectionId,
        queue_name: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        if !self.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound(format!("exchange '{exchange}'")));
        }
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue_name}'")))?;
        Self::check_owner(queue, queue_name, connection)?;

        let binding = (exchange.to_string(), binding_key.to_string());
        if !queue.bindings.contains(&binding) {
            queue.bindings.push(binding);
        }
        Ok(())
    }

    fn basic_consume(
        &mut self,
        channel: ChannelId,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<mpsc::UnboundedReceiver<Result<Delivery, BrokerError>>, BrokerError> {
        let connection = self.channel(channel)?.connection;
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue_name}'")))?;
        Self::check_owner(queue, queue_name, connection)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        queue.consumers.push(Consumer {
            tag: consumer_tag.to_string(),
            channel,
            sender,
        });
        queue.had_consumer = true;
        self.dispatch(queue_name);
        Ok(receiver)
    }

    /// Routes a message and returns how many queues took it.
    fn publish(&mut self, envelope: Envelope) -> Result<usize, BrokerError> {
        let message = StoredMessage {
            exchange: envelope.exchange,
            routing_key: envelope.routing_key,
            content_type: Some(envelope.content_type).filter(|t| !t.is_empty()),
            payload: envelope.payload,
            redelivered: false,
        };
        self.route(message)
    }

    fn route(&mut self, message: StoredMessage) -> Result<usize, BrokerError> {
        let targets: Vec<String> = if message.exchange.is_empty() {
            self.queues
                .contains_key(&message.routing_key)
                .then(|| message.routing_key.clone())
                .into_iter()
                .collect()
        } else {
            let exchange = self
                .exchanges
                .get(&message.exchange)
                .ok_or_else(|| BrokerError::NotFound(format!("exchange '{}'", message.exchange)))?;
            self.queues
                .iter()
                .filter(|(_, queue)| {
                    queue.bindings.iter().any(|(bound, key)| {
                        *bound == message.exchange && exchange.kind.routes(key, &message.routing_key)
                    })
                })
                .map(|(name, _)| name.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "message unroutable, dropped"
            );
        }

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
            }
            self.dispatch(name);
        }
        Ok(targets.len())
    }

    fn settle(
        &mut self,
        channel: ChannelId,
        delivery_tag: u64,
    ) -> Result<(String, StoredMessage), BrokerError> {
        self.channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed)?
            .unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))
    }

    fn ack(&mut self, channel: ChannelId, delivery_tag: u64) -> Result<(), BrokerError> {
        let (queue, _) = self.settle(channel, delivery_tag)?;
        self.dispatch(&queue);
        Ok(())
    }

    fn nack(&mut self, channel: ChannelId, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let (queue_name, mut message) = self.settle(channel, delivery_tag)?;
        if requeue {
            message.redelivered = true;
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.ready.push_back(message);
            }
        } else {
            self.dead_letter(&queue_name, message);
        }
        self.dispatch(&queue_name);
        Ok(())
    }

    fn dead_letter(&mut self, queue_name: &str, mut message: StoredMessage) {
        let Some(dlx) = self
            .queues
            .get(queue_name)
            .and_then(|queue| queue.attributes.dead_letter_exchange.clone())
        else {
            debug!(queue = queue_name, "rejected message has no dead-letter exchange, dropped");
            return;
        };

        if !self.exchanges.contains_key(&dlx) {
            warn!(queue = queue_name, dead_letter_exchange = %dlx, "dead-letter exchange missing, message dropped");
            return;
        }

        message.exchange = dlx;
        message.redelivered = false;
        if let Err(e) = self.route(message) {
            warn!(queue = queue_name, error = %e, "dead-lettering failed");
        }
    }

    /// Hands ready messages to consumers whose channel still has prefetch room.
    fn dispatch(&mut self, queue_name: &str) {
        let State {
            queues, channels, ..
        } = self;
        let Some(queue) = queues.get_mut(queue_name) else {
            return;
        };

        while !queue.ready.is_empty() && !queue.consumers.is_empty() {
            let count = queue.consumers.len();
            let Some(index) = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|&i| {
                    channels
                        .get(&queue.consumers[i].channel)
                        .is_some_and(ChannelState::has_capacity)
                })
            else {
                break;
            };

            let Some(message) = queue.ready.pop_front() else {
                break;
            };
            let consumer = &queue.consumers[index];
            let Some(channel) = channels.get_mut(&consumer.channel) else {
                queue.ready.push_front(message);
                break;
            };

            channel.next_tag += 1;
            let tag = channel.next_tag;
            let delivery = message.delivery(tag);

            if consumer.sender.send(Ok(delivery)).is_err() {
                debug!(queue = queue_name, consumer = %consumer.tag, "consumer gone, cancelling");
                queue.ready.push_front(message);
                queue.consumers.remove(index);
                continue;
            }

            channel.unacked.insert(tag, (queue_name.to_string(), message));
            queue.next_consumer = (index + 1) % count;
        }
    }

    fn close_channel(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.remove(&id) else {
            return;
        };

        let mut held: Vec<(u64, (String, StoredMessage))> = channel.unacked.into_iter().collect();
        held.sort_by_key(|(tag, _)| *tag);
        for (_, (queue_name, mut message)) in held.into_iter().rev() {
            message.redelivered = true;
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.ready.push_front(message);
            }
        }

        for queue in self.queues.values_mut() {
            queue.consumers.retain(|consumer| consumer.channel != id);
            queue.next_consumer = 0;
        }

        self.queues.retain(|name, queue| {
            let unused = queue.attributes.auto_delete && queue.had_consumer && queue.consumers.is_empty();
            if unused {
                debug!(queue = %name, "auto-delete queue lost its last consumer, deleted");
            }
            !unused
        });

        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.dispatch(&name);
        }
    }

    fn close_connection(&mut self, id: ConnectionId) {
        if !self.connections.remove(&id) {
            return;
        }
        let channels: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.connection == id)
            .map(|(channel_id, _)| *channel_id)
            .collect();
        for channel in channels {
            self.close_channel(channel);
        }
        self.queues.retain(|_, queue| queue.owner != Some(id));
    }
}

/// Handle to an in-process broker. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn holds(&self, channel: ChannelId, delivery_tag: u64) -> bool {
        self.lock()
            .channels
            .get(&channel)
            .is_some_and(|state| state.unacked.contains_key(&delivery_tag))
    }

    /// Opens a new connection to this broker.
    pub fn connect(&self) -> MemoryConnection {
        let mut state = self.lock();
        let id = state.next_id();
        state.connections.insert(id);
        MemoryConnection {
            broker: self.clone(),
            id,
        }
    }

    /// Declares an exchange outside of any channel, for setting up fixtures.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.lock().exchange_declare(name, kind, true)
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Messages waiting in `queue` that no consumer holds.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Payloads waiting in `queue`, oldest first.
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries from `queue` handed out but not yet acked or nacked.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock()
            .channels
            .values()
            .flat_map(|channel| channel.unacked.values())
            .filter(|(name, _)| name == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.consumers.len())
    }

    /// `(exchange, binding_key)` pairs of `queue`, in bind order.
    pub fn bindings(&self, queue: &str) -> Vec<(String, String)> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.clone())
            .unwrap_or_default()
    }

    pub fn queue_attributes(&self, queue: &str) -> Option<QueueAttributes> {
        self.lock().queues.get(queue).map(|q| q.attributes.clone())
    }
}

/// A connection to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: ConnectionId,
}

impl MemoryConnection {
    pub fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.broker.lock();
        if !state.connections.contains(&self.id) {
            return Err(BrokerError::Connection("connection is closed".into()));
        }
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                prefetch: 0,
                next_tag: 0,
                unacked: HashMap::new(),
            },
        );
        Ok(MemoryChannel {
            broker: self.broker.clone(),
            id,
        })
    }

    /// Closes every channel of this connection and deletes its exclusive queues.
    pub fn close(&self) {
        self.broker.lock().close_connection(self.id);
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        Ok(Arc::new(self.open_channel()?))
    }
}

/// A channel on a [`MemoryConnection`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    id: ChannelId,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.channel(self.id)?;
        state.exchange_declare(name, kind, durable)
    }

    async fn queue_declare(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<DeclaredQueue, BrokerError> {
        let mut state = self.broker.lock();
        let connection = state.channel(self.id)?.connection;
        state.queue_declare(connection, name, attributes)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let connection = state.channel(self.id)?.connection;
        state.queue_bind(connection, queue, exchange, binding_key)
    }

    async fn basic_qos(&self, prefetch: u16) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state
            .channels
            .get_mut(&self.id)
            .ok_or(BrokerError::ChannelClosed)?
            .prefetch = prefetch;
        let names: Vec<String> = state.queues.keys().cloned().collect();
        for name in names {
            state.dispatch(&name);
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Deliveries, BrokerError> {
        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}", Uuid::new_v4())
        } else {
            consumer_tag.to_string()
        };
        let receiver = self.broker.lock().basic_consume(self.id, queue, &tag)?;

        let state = (receiver, self.broker.clone(), self.id);
        Ok(
            futures_util::stream::unfold(state, |(mut receiver, broker, id)| async move {
                loop {
                    let item = receiver.recv().await?;
                    if let Ok(delivery) = &item {
                        // requeued when the channel closed
                        let live = broker.holds(id, delivery.delivery_tag);
                        if !live {
                            debug!(delivery_tag = delivery.delivery_tag, "withdrawn delivery skipped");
                            continue;
                        }
                    }
                    return Some((item, (receiver, broker, id)));
                }
            })
            .boxed(),
        )
    }

    async fn basic_publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        state.channel(self.id)?;
        state.publish(envelope).map(|_| ())
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.broker.lock().ack(self.id, delivery_tag)
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.broker.lock().nack(self.id, delivery_tag, requeue)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id);
        Ok(())
    }
}
