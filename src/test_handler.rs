// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Test Handler
//!
//! Lets an application's own tests inspect the messages it sends. A
//! `test-queue` bound to `#.#` catches everything published on the topic;
//! create the handler before publishing so the queue exists.

use crate::{
    config::Configuration,
    connector::{ConnectParams, Connector, ConnectorFactory},
    errors::BusError,
    message::{DeliveryInfo, MessageProperties},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TEST_QUEUE: &str = "test-queue";
const TEST_ROUTING_KEY: &str = "#.#";

/// A message popped off the test queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TestMessage {
    pub delivery_info: DeliveryInfo,
    pub properties: MessageProperties,
    pub payload: Value,
    pub raw_payload: Vec<u8>,
}

pub struct TestHandler {
    config: Arc<Configuration>,
    connector: Arc<dyn Connector>,
}

impl TestHandler {
    /// Opens a connector on the test queue and binds it to every routing key.
    pub async fn new(
        config: Arc<Configuration>,
        factory: &dyn ConnectorFactory,
    ) -> Result<Self, BusError> {
        let connector = factory
            .open(
                ConnectParams::new()
                    .queue(TEST_QUEUE)
                    .connection_name(&format!("c: {}", TEST_QUEUE)),
            )
            .await?;
        if let Err(err) = connector.bind(TEST_ROUTING_KEY).await {
            if let Err(close_err) = connector.close().await {
                warn!(error = close_err.to_string(), "error closing the test connector");
            }
            return Err(err);
        }

        Ok(TestHandler { config, connector })
    }

    /// Takes the oldest message off the test queue, if any.
    pub async fn pop_message(&self) -> Result<Option<TestMessage>, BusError> {
        let Some(delivery) = self.connector.pop().await? else {
            return Ok(None);
        };

        Ok(Some(TestMessage {
            payload: serde_json::from_slice(&delivery.data)?,
            delivery_info: delivery.info,
            properties: delivery.properties,
            raw_payload: delivery.data,
        }))
    }

    /// Drops every waiting message, parked delayed messages included.
    pub async fn purge_test_queue(&self) -> Result<(), BusError> {
        self.connector.purge().await
    }

    /// Deletes the test queue and the topic, then closes the connector.
    pub async fn test_teardown(&self) -> Result<(), BusError> {
        debug!(
            topic = self.config.topic_exchange_name(),
            "tearing down the test topology"
        );
        self.connector.teardown().await?;
        self.connector.close().await
    }
}
