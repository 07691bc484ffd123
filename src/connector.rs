// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Connector
//!
//! The capability surface every backend exposes. Transmitters and receivers
//! only talk to a [`Connector`], obtained from the [`ConnectorFactory`] chosen
//! at configuration time.
//!
//! A connector owns exactly one connection (or its in-process equivalent). It
//! is created eagerly by [`ConnectorFactory::open`] and torn down once by
//! [`Connector::close`].

use crate::{
    envelope::Envelope,
    errors::BusError,
    message::{Delivery, DeliveryTag},
};
use async_trait::async_trait;
use futures_util::Stream;
use std::{pin::Pin, sync::Arc};

/// Deliveries pushed by a subscription, in transport order.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Parameters used to open a connector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub queue_name: Option<String>,
    pub prefetch: Option<u16>,
    pub connection_name: Option<String>,
}

impl ConnectParams {
    pub fn new() -> Self {
        ConnectParams::default()
    }

    pub fn queue(mut self, name: &str) -> Self {
        self.queue_name = Some(name.to_owned());
        self
    }

    pub fn prefetch(mut self, prefetch: Option<u16>) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn connection_name(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_owned());
        self
    }
}

/// Uniform capability surface over a concrete transport.
///
/// Queue-scoped operations (`bind`, `pop`, `consume`, `purge`, `delete`,
/// `message_count`) act on the queue the connector was opened with and fail
/// with a configuration error when it was opened without one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name of the topic every message is published into.
    fn topic_name(&self) -> String;

    /// Name of the queue this connector was opened for, if any.
    fn queue_name(&self) -> Option<String>;

    /// Fails with a configuration error unless delayed publish is permitted.
    async fn ensure_delayed_allowed(&self) -> Result<(), BusError>;

    /// Declares the delay exchange and its parking queue.
    async fn create_delayed_queue(&self) -> Result<(), BusError>;

    /// Binds the queue to the topic with one routing-key pattern.
    async fn bind(&self, routing_key: &str) -> Result<(), BusError>;

    /// Publishes a payload. Envelopes with an expiration go through the
    /// delay mechanism instead of the topic.
    async fn publish(&self, payload: &[u8], envelope: &Envelope) -> Result<(), BusError>;

    /// Takes one message off the queue without waiting, auto-acknowledged.
    async fn pop(&self) -> Result<Option<Delivery>, BusError>;

    /// Starts pushing deliveries from the queue. At most `prefetch`
    /// unacknowledged deliveries are outstanding when `manual_ack` is set.
    async fn consume(&self, manual_ack: bool) -> Result<DeliveryStream, BusError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BusError>;

    async fn nack(&self, tag: DeliveryTag) -> Result<(), BusError>;

    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BusError>;

    /// Drops every ready message from the queue (and the parking queue when
    /// delays are allowed).
    async fn purge(&self) -> Result<(), BusError>;

    async fn delete(&self) -> Result<(), BusError>;

    /// Deletes the queue, the topic and, when delays are allowed, the delay
    /// exchange and parking queue.
    async fn teardown(&self) -> Result<(), BusError>;

    async fn message_count(&self) -> Result<u32, BusError>;

    /// Releases the connection. Subsequent calls are no-ops.
    async fn close(&self) -> Result<(), BusError>;
}

/// Strategy object opening connectors for one concrete backend.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn open(&self, params: ConnectParams) -> Result<Arc<dyn Connector>, BusError>;
}

/// Errors returned by queue-scoped operations on a connector opened without a queue.
pub(crate) fn missing_queue() -> BusError {
    BusError::ConfigurationError("connector was opened without a queue".to_owned())
}
