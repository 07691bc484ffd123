// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Topology Management
//!
//! This module declares the exchanges, queues and bindings the AMQP backend
//! relies on. Declarations are idempotent on the broker side, so installing
//! the same topology from several processes is safe.

use crate::{
    errors::BusError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding) -> Self;

    /// Creates all the exchanges and queues, then sets up all the bindings.
    async fn install(&self) -> Result<(), BusError>;
}

/// AMQP implementation of the Topology trait.
pub struct AmqpTopology<'tp> {
    channel: Arc<Channel>,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding<'tp>>,
    pub(crate) exchanges: Vec<&'tp ExchangeDefinition<'tp>>,
}

impl<'tp> AmqpTopology<'tp> {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology<'tp> {
        AmqpTopology {
            channel,
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: &'tp QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology to the broker.
    ///
    /// This method performs the following operations in order:
    /// 1. Creates all exchanges
    /// 2. Creates all queues
    /// 3. Sets up queue-to-exchange bindings
    async fn install(&self) -> Result<(), BusError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }
}

impl AmqpTopology<'_> {
    async fn install_exchange(&self) -> Result<(), BusError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            self.channel
                .exchange_declare(
                    exch.name,
                    lapin::ExchangeKind::from(&exch.kind),
                    ExchangeDeclareOptions {
                        durable: exch.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|err| {
                    error!(
                        error = err.to_string(),
                        name = exch.name,
                        "error to declare the exchange"
                    );
                    BusError::DeclareExchangeError(exch.name.to_owned())
                })?;

            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<(), BusError> {
        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            self.channel
                .queue_declare(
                    &def.name,
                    QueueDeclareOptions {
                        durable: def.durable,
                        ..Default::default()
                    },
                    queue_arguments(def),
                )
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), name = def.name, "error to declare the queue");
                    BusError::DeclareQueueError(def.name.clone())
                })?;

            debug!("queue: {} was created", def.name);
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), BusError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            self.channel
                .queue_bind(
                    binding.queue_name,
                    binding.exchange_name,
                    binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "error to bind queue to exchange");
                    BusError::BindingExchangeToQueueError(
                        binding.exchange_name.to_owned(),
                        binding.queue_name.to_owned(),
                    )
                })?;
        }

        Ok(())
    }
}

/// Builds the declaration arguments for a queue definition.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> FieldTable {
    let mut args = BTreeMap::new();

    if let Some(exchange) = &def.dead_letter_exchange {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    FieldTable::from(args)
}
