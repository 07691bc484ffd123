// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delayed Delivery
//!
//! "Deliver after N milliseconds" built only from durable-queue primitives.
//!
//! A private fanout exchange has exactly one bound parking queue whose
//! dead-letter exchange is the main topic. A delayed publish sets the message
//! TTL to the requested delay and sends it to the fanout exchange. Nothing
//! consumes the parking queue, so the only way out is TTL expiry, at which
//! point the broker dead-letters the message to the topic with its original
//! routing key and it is delivered like any other publish.
//!
//! Expiry happens at the head of the parking queue only, so a message is never
//! released before the ones parked ahead of it.

use crate::{
    config::Configuration,
    exchange::ExchangeDefinition,
    message::MessageProperties,
    queue::{QueueBinding, QueueDefinition},
};
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Names of the broker objects backing delayed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedDelivery {
    exchange: String,
    queue: String,
    dead_letter_target: String,
}

impl DelayedDelivery {
    pub fn from_config(cfg: &Configuration) -> Self {
        DelayedDelivery {
            exchange: cfg.delayed_exchange_name(),
            queue: cfg.delayed_queue_name(),
            dead_letter_target: cfg.topic_exchange_name(),
        }
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn dead_letter_target(&self) -> &str {
        &self.dead_letter_target
    }

    pub fn exchange_definition(&self) -> ExchangeDefinition<'_> {
        ExchangeDefinition::new(&self.exchange).fanout().durable()
    }

    pub fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.queue)
            .durable()
            .dead_letter_exchange(&self.dead_letter_target)
    }

    pub fn binding(&self) -> QueueBinding<'_> {
        QueueBinding::new(&self.queue).exchange(&self.exchange)
    }
}

/// A message waiting in a parking queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkedMessage {
    pub routing_key: String,
    pub properties: MessageProperties,
    pub data: Vec<u8>,
    pub expires_at: Instant,
}

/// In-process parking queue with head-of-line TTL expiry.
#[derive(Debug, Default)]
pub struct ParkingQueue {
    messages: VecDeque<ParkedMessage>,
}

impl ParkingQueue {
    pub fn new() -> Self {
        ParkingQueue::default()
    }

    /// Parks a message until `ttl` elapses.
    pub fn park(
        &mut self,
        routing_key: &str,
        properties: MessageProperties,
        data: Vec<u8>,
        ttl: Duration,
    ) -> Instant {
        let expires_at = Instant::now() + ttl;
        self.messages.push_back(ParkedMessage {
            routing_key: routing_key.to_owned(),
            properties,
            data,
            expires_at,
        });
        expires_at
    }

    /// Removes the expired messages at the head of the queue, in order.
    ///
    /// A live message at the head holds back everything behind it, even
    /// messages whose own TTL already elapsed.
    pub fn release_expired(&mut self, now: Instant) -> Vec<ParkedMessage> {
        let mut released = vec![];

        while self
            .messages
            .front()
            .is_some_and(|msg| msg.expires_at <= now)
        {
            if let Some(mut msg) = self.messages.pop_front() {
                // the ttl is consumed by the parking queue
                msg.properties.expiration = None;
                released.push(msg);
            }
        }

        released
    }

    pub fn purge(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
