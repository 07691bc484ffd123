// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Connector
//!
//! A process-local broker implementing the same [`Connector`] contract as the
//! AMQP backend, for tests and development:
//! - topic routing with `*` and `#` patterns, one copy per bound queue
//! - delayed delivery through a head-of-line [`ParkingQueue`]
//! - prefetch-limited push consumption with manual acknowledgement
//! - nack with requeue, flagging the message as redelivered
//!
//! Queues and bindings live as long as the [`MemoryBroker`] that owns them,
//! so they survive individual connectors being opened and closed.

use crate::{
    config::Configuration,
    connector::{missing_queue, ConnectParams, Connector, ConnectorFactory, DeliveryStream},
    delayed::ParkingQueue,
    envelope::Envelope,
    errors::BusError,
    message::{Delivery, DeliveryInfo, DeliveryTag, MessageProperties},
    routing::topic_matches,
};
use async_trait::async_trait;
use futures_util::stream;
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, Notify},
    time::Instant,
};
use tracing::{debug, warn};

/// A message sitting in a queue.
#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    exchange: String,
    properties: MessageProperties,
    data: Vec<u8>,
    redelivered: bool,
}

/// A message handed to a consumer and not yet resolved.
struct Unacked {
    owner: u64,
    message: StoredMessage,
}

struct MemoryQueue {
    ready: VecDeque<StoredMessage>,
    unacked: HashMap<u64, Unacked>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn outstanding(&self, owner: u64) -> usize {
        self.unacked.values().filter(|u| u.owner == owner).count()
    }
}

/// Shared state of one broker
#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    /// (queue, pattern) pairs bound to the topic
    bindings: Vec<(String, String)>,
    parking: ParkingQueue,
    next_tag: u64,
    next_connector: u64,
}

impl BrokerState {
    fn next_tag(&mut self) -> u64 {
        self.next_tag += 1;
        self.next_tag
    }

    /// Delivers one copy of the message to every queue with a matching binding.
    fn route(&mut self, message: StoredMessage) {
        let targets: BTreeSet<String> = self
            .bindings
            .iter()
            .filter(|(_, pattern)| topic_matches(pattern, &message.routing_key))
            .map(|(queue, _)| queue.clone())
            .collect();

        if targets.is_empty() {
            debug!(routing_key = message.routing_key, "message not routed to any queue");
        }

        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.ready.push_back(message.clone());
                queue.notify.notify_waiters();
            }
        }
    }

    /// Dead-letters every expired parked message into the topic.
    fn release_parked(&mut self, topic: &str, now: Instant) {
        for parked in self.parking.release_expired(now) {
            self.route(StoredMessage {
                routing_key: parked.routing_key,
                exchange: topic.to_owned(),
                properties: parked.properties,
                data: parked.data,
                redelivered: false,
            });
        }
    }
}

/// Process-local broker; doubles as the factory for its connectors.
#[derive(Clone)]
pub struct MemoryBroker {
    config: Arc<Configuration>,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// Opens a connector without going through the factory trait object.
    pub async fn connect(&self, params: ConnectParams) -> Result<MemoryConnector, BusError> {
        let mut state = self.state.lock().await;

        state.next_connector += 1;
        let id = state.next_connector;

        if let Some(name) = &params.queue_name {
            state
                .queues
                .entry(name.clone())
                .or_insert_with(MemoryQueue::new);
        }

        debug!(
            connection = params.connection_name.as_deref().unwrap_or_default(),
            "memory connector opened"
        );

        Ok(MemoryConnector {
            id,
            config: self.config.clone(),
            state: self.state.clone(),
            queue_name: params.queue_name,
            prefetch: params.prefetch,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl ConnectorFactory for MemoryBroker {
    async fn open(&self, params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
        let connector = self.connect(params).await?;
        Ok(Arc::new(connector))
    }
}

/// One client of a [`MemoryBroker`].
pub struct MemoryConnector {
    id: u64,
    config: Arc<Configuration>,
    state: Arc<Mutex<BrokerState>>,
    queue_name: Option<String>,
    prefetch: Option<u16>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnector {
    fn queue(&self) -> Result<&str, BusError> {
        self.queue_name.as_deref().ok_or_else(missing_queue)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::ConnectionError("connection closed".to_owned()))
        } else {
            Ok(())
        }
    }

    fn stored(&self, payload: &[u8], envelope: &Envelope) -> StoredMessage {
        StoredMessage {
            routing_key: envelope.routing_key().to_owned(),
            exchange: self.config.topic_exchange_name(),
            properties: envelope.properties(),
            data: payload.to_vec(),
            redelivered: false,
        }
    }

    fn park(&self, state: &mut BrokerState, payload: &[u8], envelope: &Envelope, delay: u64) {
        let expires_at = state.parking.park(
            envelope.routing_key(),
            envelope.properties(),
            payload.to_vec(),
            Duration::from_millis(delay),
        );

        let shared = self.state.clone();
        let topic = self.config.topic_exchange_name();
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            shared.lock().await.release_parked(&topic, Instant::now());
        });
    }

    /// Removes an unacknowledged delivery from this connector's queue.
    async fn settle(&self, tag: DeliveryTag) -> Option<StoredMessage> {
        let queue = self.queue_name.as_deref()?;
        let mut state = self.state.lock().await;
        let queue = state.queues.get_mut(queue)?;

        let settled = queue.unacked.remove(&tag.value()).map(|u| u.message);
        queue.notify.notify_waiters();
        settled
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn topic_name(&self) -> String {
        self.config.topic_exchange_name()
    }

    fn queue_name(&self) -> Option<String> {
        self.queue_name.clone()
    }

    async fn ensure_delayed_allowed(&self) -> Result<(), BusError> {
        self.config.ensure_delayed_allowed()
    }

    async fn create_delayed_queue(&self) -> Result<(), BusError> {
        self.config.ensure_delayed_allowed()?;
        debug!(
            exchange = self.config.delayed_exchange_name(),
            queue = self.config.delayed_queue_name(),
            "delayed queue ready"
        );
        Ok(())
    }

    async fn bind(&self, routing_key: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        let queue = self.queue()?;
        let mut state = self.state.lock().await;

        let binding = (queue.to_owned(), routing_key.to_owned());
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }

        Ok(())
    }

    async fn publish(&self, payload: &[u8], envelope: &Envelope) -> Result<(), BusError> {
        self.ensure_open()?;

        match envelope.expiration() {
            Some(delay) => {
                self.config.ensure_delayed_allowed()?;
                let mut state = self.state.lock().await;
                self.park(&mut state, payload, envelope, delay);
            }
            None => {
                let message = self.stored(payload, envelope);
                self.state.lock().await.route(message);
            }
        }

        Ok(())
    }

    async fn pop(&self) -> Result<Option<Delivery>, BusError> {
        self.ensure_open()?;
        let name = self.queue()?;
        let mut state = self.state.lock().await;
        let tag = state.next_tag();

        let message = state
            .queues
            .get_mut(name)
            .ok_or_else(|| BusError::ConsumerError(format!("queue `{}` does not exist", name)))?
            .ready
            .pop_front();

        Ok(message.map(|msg| to_delivery(msg, tag)))
    }

    async fn consume(&self, manual_ack: bool) -> Result<DeliveryStream, BusError> {
        self.ensure_open()?;
        let name = self.queue()?.to_owned();

        let notify = self
            .state
            .lock()
            .await
            .queues
            .get(&name)
            .map(|queue| queue.notify.clone())
            .ok_or_else(|| {
                BusError::ConsumerDeclarationError(format!("queue `{}` does not exist", name))
            })?;

        let consumer = MemoryConsumer {
            owner: self.id,
            queue: name,
            prefetch: self.prefetch.filter(|_| manual_ack).map(usize::from),
            manual_ack,
            state: self.state.clone(),
            notify,
            closed: self.closed.clone(),
        };

        let deliveries = stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((Ok(delivery), consumer))
        });

        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BusError> {
        self.settle(tag)
            .await
            .map(|_| ())
            .ok_or(BusError::AckMessageError)
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<(), BusError> {
        self.settle(tag)
            .await
            .map(|_| ())
            .ok_or(BusError::NackMessageError)
    }

    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BusError> {
        let mut message = self
            .settle(tag)
            .await
            .ok_or(BusError::RequeuingMessageError)?;
        message.redelivered = true;

        let name = self.queue()?;
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(name)
            .ok_or(BusError::RequeuingMessageError)?;
        queue.ready.push_front(message);
        queue.notify.notify_waiters();

        Ok(())
    }

    async fn purge(&self) -> Result<(), BusError> {
        let name = self.queue()?;
        let mut state = self.state.lock().await;

        state
            .queues
            .get_mut(name)
            .ok_or_else(|| BusError::PurgeQueueError(name.to_owned()))?
            .ready
            .clear();

        if self.config.allow_delayed {
            state.parking.purge();
        }

        Ok(())
    }

    async fn delete(&self) -> Result<(), BusError> {
        let name = self.queue()?;
        let mut state = self.state.lock().await;

        let queue = state
            .queues
            .remove(name)
            .ok_or_else(|| BusError::DeleteError(name.to_owned()))?;
        state.bindings.retain(|(bound, _)| bound != name);
        queue.notify.notify_waiters();

        Ok(())
    }

    async fn teardown(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;

        if let Some(name) = self.queue_name.as_deref() {
            if let Some(queue) = state.queues.remove(name) {
                queue.notify.notify_waiters();
            }
        }

        // deleting the topic drops every binding to it
        state.bindings.clear();

        if self.config.allow_delayed {
            state.parking.purge();
        }

        Ok(())
    }

    async fn message_count(&self) -> Result<u32, BusError> {
        let name = self.queue()?;
        let state = self.state.lock().await;

        state
            .queues
            .get(name)
            .map(|queue| queue.ready.len() as u32)
            .ok_or_else(|| BusError::DeclareQueueError(name.to_owned()))
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(name) = self.queue_name.as_deref() else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        let Some(queue) = state.queues.get_mut(name) else {
            return Ok(());
        };

        let mut owned: Vec<u64> = queue
            .unacked
            .iter()
            .filter(|(_, u)| u.owner == self.id)
            .map(|(tag, _)| *tag)
            .collect();
        owned.sort_unstable();

        if !owned.is_empty() {
            warn!(
                queue = name,
                count = owned.len(),
                "requeuing unresolved deliveries on close"
            );
        }

        // oldest first ends up at the head
        for tag in owned.into_iter().rev() {
            if let Some(unacked) = queue.unacked.remove(&tag) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        queue.notify.notify_waiters();

        Ok(())
    }
}

/// Push side of one consumer
struct MemoryConsumer {
    owner: u64,
    queue: String,
    prefetch: Option<usize>,
    manual_ack: bool,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl MemoryConsumer {
    /// Waits for the next deliverable message. `None` ends the stream.
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            {
                let mut state = self.state.lock().await;
                let tag = state.next_tag;
                let queue = state.queues.get_mut(&self.queue)?;

                let has_capacity = self
                    .prefetch
                    .map_or(true, |limit| queue.outstanding(self.owner) < limit);

                if has_capacity {
                    if let Some(message) = queue.ready.pop_front() {
                        let tag = tag + 1;
                        if self.manual_ack {
                            queue.unacked.insert(
                                tag,
                                Unacked {
                                    owner: self.owner,
                                    message: message.clone(),
                                },
                            );
                        }
                        state.next_tag = tag;
                        return Some(to_delivery(message, tag));
                    }
                }
            }

            notified.await;
        }
    }
}

fn to_delivery(message: StoredMessage, tag: u64) -> Delivery {
    Delivery {
        info: DeliveryInfo {
            routing_key: message.routing_key,
            exchange: message.exchange,
            redelivered: message.redelivered,
            delivery_tag: DeliveryTag::new(tag),
        },
        properties: message.properties,
        data: message.data,
    }
}
