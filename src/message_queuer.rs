// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Queuer
//!
//! Buffers messages and sends them later in one go, typically once the
//! surrounding unit of work (a database transaction, say) has committed.

use crate::{
    errors::BusError,
    transmitter::{SendOptions, Transmitter},
};
use serde_json::Value;

/// A message waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Value,
    pub routing_key: String,
    pub delayed: bool,
    pub delay_by_ms: Option<u64>,
}

impl QueuedMessage {
    fn options(&self) -> SendOptions {
        match (self.delayed, self.delay_by_ms) {
            (true, Some(delay)) => SendOptions::new().delayed(delay),
            (true, None) => SendOptions {
                delayed: true,
                ..SendOptions::default()
            },
            (false, _) => SendOptions::new(),
        }
    }
}

pub struct MessageQueuer {
    transmitter: Transmitter,
    messages: Vec<QueuedMessage>,
}

impl MessageQueuer {
    pub fn new(transmitter: Transmitter) -> Self {
        MessageQueuer {
            transmitter,
            messages: vec![],
        }
    }

    /// Buffers a message. A null payload or a blank routing key is rejected.
    pub fn queue_message(
        &mut self,
        payload: Value,
        routing_key: &str,
        delayed: bool,
        delay_by_ms: Option<u64>,
    ) -> Result<(), BusError> {
        if payload.is_null() {
            return Err(BusError::InvalidMessage("missing payload".to_owned()));
        }
        if routing_key.trim().is_empty() {
            return Err(BusError::InvalidMessage("missing routing_key".to_owned()));
        }

        self.messages.push(QueuedMessage {
            payload,
            routing_key: routing_key.to_owned(),
            delayed,
            delay_by_ms,
        });

        Ok(())
    }

    pub fn messages(&self) -> &[QueuedMessage] {
        &self.messages
    }

    /// Sends every buffered message, stopping at the first failure.
    ///
    /// The buffer is left untouched when a send fails.
    pub async fn send_messages(&mut self) -> Result<(), BusError> {
        for message in &self.messages {
            self.transmitter
                .send_message(&message.payload, &message.routing_key, message.options())
                .await?;
        }

        self.clear_messages();
        Ok(())
    }

    /// Sends every buffered message, ignoring failures, then clears the buffer.
    pub async fn send_messages_safely(&mut self) {
        for message in &self.messages {
            self.transmitter
                .send_message_safely(&message.payload, &message.routing_key, message.options())
                .await;
        }

        self.clear_messages();
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        connector::{ConnectParams, Connector, ConnectorFactory, MockConnector},
        transmitter::DEFAULT_DELAY_BY_MS,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct FreshConnectors {
        build: Box<dyn Fn() -> MockConnector + Send + Sync>,
    }

    #[async_trait]
    impl ConnectorFactory for FreshConnectors {
        async fn open(&self, _params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
            Ok(Arc::new((self.build)()))
        }
    }

    fn queuer(build: impl Fn() -> MockConnector + Send + Sync + 'static) -> MessageQueuer {
        let cfg = Arc::new(Configuration {
            app_id: Some("billing".to_owned()),
            ..Configuration::new("test")
        });
        let factory = Arc::new(FreshConnectors {
            build: Box::new(build),
        });
        MessageQueuer::new(Transmitter::new(cfg, factory))
    }

    fn publishing(result: Result<(), BusError>) -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_publish()
            .returning(move |_, _| result.clone());
        connector.expect_close().returning(|| Ok(()));
        connector
    }

    #[test]
    fn rejects_incomplete_messages() {
        let mut queuer = queuer(MockConnector::new);

        assert!(matches!(
            queuer.queue_message(Value::Null, "a.b", false, None),
            Err(BusError::InvalidMessage(_))
        ));
        assert!(matches!(
            queuer.queue_message(json!({"a": 1}), " ", false, None),
            Err(BusError::InvalidMessage(_))
        ));
        assert!(queuer.messages().is_empty());
    }

    #[test]
    fn delayed_messages_default_their_delay() {
        let message = QueuedMessage {
            payload: json!({}),
            routing_key: "a".to_owned(),
            delayed: true,
            delay_by_ms: None,
        };

        let opts = message.options();
        assert!(opts.delayed);
        assert_eq!(opts.delay_by_ms, DEFAULT_DELAY_BY_MS);
    }

    #[tokio::test]
    async fn sends_then_clears() {
        let mut queuer = queuer(|| publishing(Ok(())));
        queuer.queue_message(json!({"a": 1}), "a.b", false, None).unwrap();
        queuer.queue_message(json!({"a": 2}), "a.c", false, None).unwrap();

        queuer.send_messages().await.unwrap();

        assert!(queuer.messages().is_empty());
    }

    #[tokio::test]
    async fn failures_keep_the_buffer() {
        let mut queuer = queuer(|| publishing(Err(BusError::PublishingError("down".to_owned()))));
        queuer.queue_message(json!({"a": 1}), "a.b", false, None).unwrap();

        assert!(queuer.send_messages().await.is_err());
        assert_eq!(queuer.messages().len(), 1);
    }

    #[tokio::test]
    async fn safe_sends_always_clear() {
        let mut queuer = queuer(|| publishing(Err(BusError::PublishingError("down".to_owned()))));
        queuer.queue_message(json!({"a": 1}), "a.b", false, None).unwrap();

        queuer.send_messages_safely().await;

        assert!(queuer.messages().is_empty());
    }
}
