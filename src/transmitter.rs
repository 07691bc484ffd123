// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Transmitter
//!
//! Public publish API. A [`Transmitter`] opens a fresh connector for every
//! send and always closes it; a [`PersistentTransmitter`] shares one connector
//! across a batch of sends and closes it when the batch ends, whether the
//! batch succeeded or not.
//!
//! What happens when a send fails is chosen per call with [`OnError`]:
//! propagate, swallow, or hand the message to an [`AsyncRetry`]
//! collaborator. When the hand-off itself fails, the original transport error
//! is returned, never the hand-off error.

use crate::{
    config::{Configuration, PayloadLogging},
    connector::{ConnectParams, Connector, ConnectorFactory},
    envelope::{Envelope, MessageId},
    errors::BusError,
    message::Headers,
    otel,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delay applied to delayed sends when none is given
pub const DEFAULT_DELAY_BY_MS: u64 = 5000;

/// What a failed send does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
    /// Return the error to the caller.
    #[default]
    Raise,
    /// Log the error and report `false`.
    Ignore,
    /// Hand the message to the retry collaborator and report `false`.
    RetryAsync,
}

/// Per-send options.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    pub delayed: bool,
    pub delay_by_ms: u64,
    pub kind: Option<String>,
    pub message_id: MessageId,
    pub headers: Option<Headers>,
    pub on_error: OnError,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            delayed: false,
            delay_by_ms: DEFAULT_DELAY_BY_MS,
            kind: None,
            message_id: MessageId::Auto,
            headers: None,
            on_error: OnError::Raise,
        }
    }
}

impl SendOptions {
    pub fn new() -> Self {
        SendOptions::default()
    }

    /// Delivers the message after `delay_by_ms` milliseconds.
    pub fn delayed(mut self, delay_by_ms: u64) -> Self {
        self.delayed = true;
        self.delay_by_ms = delay_by_ms;
        self
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }

    pub fn message_id(mut self, id: impl Into<MessageId>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    fn expiration(&self) -> Option<u64> {
        self.delayed.then_some(self.delay_by_ms)
    }
}

/// Send options carried along with a message handed to the retry collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryMetadata {
    pub kind: Option<String>,
    pub message_id: MessageId,
    pub headers: Option<Headers>,
    /// Requested delay of the original send, if it was delayed
    pub delay_by_ms: Option<u64>,
    /// Seconds to wait between attempts
    pub backoff_secs: Vec<u64>,
}

/// External job queue that re-attempts a publish later.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncRetry: Send + Sync {
    async fn enqueue(
        &self,
        payload: Value,
        routing_key: &str,
        delay_ms: u64,
        metadata: RetryMetadata,
    ) -> Result<(), BusError>;
}

/// Name reported to the broker for publishing connections.
fn connection_name(cfg: &Configuration, app_id: &str) -> String {
    format!("p: {} {}", app_id, cfg.process_name)
        .trim()
        .to_owned()
}

fn to_value<T: Serialize + ?Sized>(payload: &T) -> Result<Value, BusError> {
    serde_json::to_value(payload).map_err(|err| BusError::SerializePayloadError(err.to_string()))
}

/// Publishes one message through an open connector.
async fn publish(
    connector: &dyn Connector,
    cfg: &Configuration,
    app_id: &str,
    payload: &Value,
    routing_key: &str,
    opts: &SendOptions,
) -> Result<(), BusError> {
    if opts.delayed {
        connector.ensure_delayed_allowed().await?;
        connector.create_delayed_queue().await?;
    }

    let envelope = Envelope::new(
        routing_key,
        app_id,
        &opts.message_id,
        opts.kind.clone(),
        otel::with_trace_context(opts.headers.clone()),
        opts.expiration(),
    );
    let body = serde_json::to_vec(payload)
        .map_err(|err| BusError::SerializePayloadError(err.to_string()))?;

    let label = if opts.delayed { "Delayed Message" } else { "Message" };
    let logged = cfg.payload_for_log(PayloadLogging::Info, payload);

    info!(
        message_id = envelope.message_id(),
        routing_key = routing_key,
        "START Transmitting {} on id[{}] {} -> {}",
        label,
        envelope.message_id(),
        routing_key,
        logged
    );

    connector.publish(&body, &envelope).await?;

    info!(
        message_id = envelope.message_id(),
        routing_key = routing_key,
        "END Transmitting {} on id[{}] {} -> {}",
        label,
        envelope.message_id(),
        routing_key,
        logged
    );

    Ok(())
}

/// Publishes messages, opening and closing a connector per send.
#[derive(Clone)]
pub struct Transmitter {
    config: Arc<Configuration>,
    factory: Arc<dyn ConnectorFactory>,
    retry: Option<Arc<dyn AsyncRetry>>,
}

impl Transmitter {
    pub fn new(config: Arc<Configuration>, factory: Arc<dyn ConnectorFactory>) -> Self {
        Transmitter {
            config,
            factory,
            retry: None,
        }
    }

    /// Sets the collaborator used by [`OnError::RetryAsync`] and [`Transmitter::send_message_async`].
    pub fn with_retry(mut self, retry: Arc<dyn AsyncRetry>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sends one message.
    ///
    /// Returns `Ok(true)` when the message was published and `Ok(false)` when
    /// the send failed but `opts.on_error` absorbed the failure. Payloads that
    /// cannot be serialized always fail with `SerializePayloadError`.
    pub async fn send_message<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        routing_key: &str,
        opts: SendOptions,
    ) -> Result<bool, BusError> {
        let payload = to_value(payload)?;

        match self.transmit(&payload, routing_key, &opts).await {
            Ok(()) => Ok(true),
            Err(err) => self.on_failure(err, payload, routing_key, opts).await,
        }
    }

    /// Sends one message, reporting any failure as `false`.
    pub async fn send_message_safely<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        routing_key: &str,
        opts: SendOptions,
    ) -> bool {
        self.send_message(payload, routing_key, opts.on_error(OnError::Ignore))
            .await
            .unwrap_or(false)
    }

    /// Hands the message straight to the retry collaborator.
    pub async fn send_message_async<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        routing_key: &str,
        delay_by_ms: u64,
    ) -> Result<(), BusError> {
        let retry = self.retry()?;
        let metadata = RetryMetadata {
            backoff_secs: self.config.async_retry_backoff_secs.clone(),
            ..Default::default()
        };

        retry
            .enqueue(to_value(payload)?, routing_key, delay_by_ms, metadata)
            .await
    }

    fn retry(&self) -> Result<&Arc<dyn AsyncRetry>, BusError> {
        self.retry.as_ref().ok_or_else(|| {
            BusError::ConfigurationError("no async retry collaborator is configured".to_owned())
        })
    }

    async fn transmit(
        &self,
        payload: &Value,
        routing_key: &str,
        opts: &SendOptions,
    ) -> Result<(), BusError> {
        let app_id = self.config.app_id()?;
        if opts.delayed {
            self.config.ensure_delayed_allowed()?;
        }

        let connector = self
            .factory
            .open(ConnectParams::new().connection_name(&connection_name(&self.config, app_id)))
            .await?;

        let result = publish(
            connector.as_ref(),
            &self.config,
            app_id,
            payload,
            routing_key,
            opts,
        )
        .await;

        if let Err(err) = connector.close().await {
            warn!(error = err.to_string(), "error closing the publishing connector");
        }

        result
    }

    async fn on_failure(
        &self,
        err: BusError,
        payload: Value,
        routing_key: &str,
        opts: SendOptions,
    ) -> Result<bool, BusError> {
        error!(
            error = err.to_string(),
            routing_key = routing_key,
            "ERROR Transmitting Message on {} -> {}",
            routing_key,
            self.config.payload_for_log(PayloadLogging::Error, &payload)
        );

        match opts.on_error {
            OnError::Raise => Err(err),
            OnError::Ignore => Ok(false),
            OnError::RetryAsync => {
                let Ok(retry) = self.retry() else {
                    warn!("no async retry collaborator is configured");
                    return Err(err);
                };

                let metadata = RetryMetadata {
                    delay_by_ms: opts.expiration(),
                    kind: opts.kind,
                    message_id: opts.message_id,
                    headers: opts.headers,
                    backoff_secs: self.config.async_retry_backoff_secs.clone(),
                };

                match retry.enqueue(payload, routing_key, 0, metadata).await {
                    Ok(()) => Ok(false),
                    Err(handoff) => {
                        warn!(
                            error = handoff.to_string(),
                            routing_key = routing_key,
                            "failure to hand the message to the async retry"
                        );
                        Err(err)
                    }
                }
            }
        }
    }
}

/// A transmitter sharing one connector across a batch of sends.
pub struct PersistentTransmitter {
    config: Arc<Configuration>,
    connector: Arc<dyn Connector>,
    app_id: String,
}

impl PersistentTransmitter {
    /// Opens one connector, runs `f` with a transmitter bound to it, then
    /// closes the connector on every path.
    ///
    /// ```ignore
    /// PersistentTransmitter::batch(cfg, factory.as_ref(), |tx| {
    ///     Box::pin(async move {
    ///         tx.send_message(&json!({"user_id": 1}), "users.user.activated", SendOptions::new()).await?;
    ///         tx.send_message(&json!({"user_id": 2}), "users.user.activated", SendOptions::new()).await
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn batch<F, R>(
        config: Arc<Configuration>,
        factory: &dyn ConnectorFactory,
        f: F,
    ) -> Result<R, BusError>
    where
        F: for<'a> FnOnce(&'a PersistentTransmitter) -> BoxFuture<'a, Result<R, BusError>>,
    {
        let app_id = config.app_id()?.to_owned();
        let connector = factory
            .open(ConnectParams::new().connection_name(&connection_name(&config, &app_id)))
            .await?;

        let transmitter = PersistentTransmitter {
            config,
            connector,
            app_id,
        };

        let result = f(&transmitter).await;

        if let Err(err) = transmitter.connector.close().await {
            warn!(error = err.to_string(), "error closing the batch connector");
        }

        result
    }

    /// Sends one message on the shared connector. Failures always propagate.
    pub async fn send_message<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        routing_key: &str,
        opts: SendOptions,
    ) -> Result<bool, BusError> {
        let payload = to_value(payload)?;

        publish(
            self.connector.as_ref(),
            &self.config,
            &self.app_id,
            &payload,
            routing_key,
            &opts,
        )
        .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockConnector;
    use mockall::predicate::eq;
    use serde_json::json;

    struct MockFactory {
        connector: Arc<MockConnector>,
    }

    #[async_trait]
    impl ConnectorFactory for MockFactory {
        async fn open(&self, params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
            assert_eq!(params.connection_name.as_deref(), Some("p: billing worker"));
            Ok(self.connector.clone())
        }
    }

    struct NeverOpened;

    #[async_trait]
    impl ConnectorFactory for NeverOpened {
        async fn open(&self, _params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
            panic!("no connector should be opened");
        }
    }

    fn config() -> Arc<Configuration> {
        Arc::new(Configuration {
            app_id: Some("billing".to_owned()),
            process_name: "worker".to_owned(),
            allow_delayed: true,
            ..Configuration::new("test")
        })
    }

    fn transmitter(connector: MockConnector) -> Transmitter {
        Transmitter::new(
            config(),
            Arc::new(MockFactory {
                connector: Arc::new(connector),
            }),
        )
    }

    fn failing_connector() -> MockConnector {
        let mut connector = MockConnector::new();
        connector
            .expect_publish()
            .returning(|_, _| Err(BusError::PublishingError("broker down".to_owned())));
        connector.expect_close().times(1).returning(|| Ok(()));
        connector
    }

    #[tokio::test]
    async fn publishes_and_closes() {
        let mut connector = MockConnector::new();
        connector
            .expect_publish()
            .withf(|body, env| {
                body.to_vec() == br#"{"sample":"payload"}"#.to_vec()
                    && env.routing_key() == "a.b.c"
                    && !env.is_delayed()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        connector.expect_close().times(1).returning(|| Ok(()));

        let sent = transmitter(connector)
            .send_message(&json!({"sample": "payload"}), "a.b.c", SendOptions::new())
            .await;

        assert_eq!(sent, Ok(true));
    }

    #[tokio::test]
    async fn disabled_delays_fail_before_opening_a_connector() {
        let cfg = Arc::new(Configuration {
            app_id: Some("billing".to_owned()),
            ..Configuration::new("test")
        });
        let tx = Transmitter::new(cfg, Arc::new(NeverOpened));

        let sent = tx
            .send_message(&json!({}), "a.b", SendOptions::new().delayed(100))
            .await;

        assert!(matches!(sent, Err(BusError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn delayed_send_checks_the_connector_first() {
        let mut connector = MockConnector::new();
        connector
            .expect_ensure_delayed_allowed()
            .times(1)
            .returning(|| Err(BusError::ConfigurationError("not allowed".to_owned())));
        connector.expect_create_delayed_queue().never();
        connector.expect_publish().never();
        connector.expect_close().times(1).returning(|| Ok(()));

        let sent = transmitter(connector)
            .send_message(&json!({}), "a.b", SendOptions::new().delayed(100))
            .await;

        assert!(matches!(sent, Err(BusError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn delayed_send_sets_the_expiration() {
        let mut connector = MockConnector::new();
        connector
            .expect_ensure_delayed_allowed()
            .returning(|| Ok(()));
        connector
            .expect_create_delayed_queue()
            .times(1)
            .returning(|| Ok(()));
        connector
            .expect_publish()
            .withf(|_, env| env.expiration() == Some(100))
            .times(1)
            .returning(|_, _| Ok(()));
        connector.expect_close().returning(|| Ok(()));

        let sent = transmitter(connector)
            .send_message(&json!({}), "a.b", SendOptions::new().delayed(100))
            .await;

        assert_eq!(sent, Ok(true));
    }

    #[tokio::test]
    async fn raise_propagates_the_transport_error() {
        let sent = transmitter(failing_connector())
            .send_message(&json!({}), "a.b", SendOptions::new())
            .await;

        assert_eq!(sent, Err(BusError::PublishingError("broker down".to_owned())));
    }

    #[tokio::test]
    async fn ignore_reports_false() {
        let tx = transmitter(failing_connector());

        let sent = tx
            .send_message(&json!({}), "a.b", SendOptions::new().on_error(OnError::Ignore))
            .await;

        assert_eq!(sent, Ok(false));
    }

    #[tokio::test]
    async fn safely_never_fails() {
        let tx = transmitter(failing_connector());

        assert!(!tx.send_message_safely(&json!({}), "a.b", SendOptions::new()).await);
    }

    #[tokio::test]
    async fn retry_async_hands_off_with_no_delay() {
        let mut retry = MockAsyncRetry::new();
        retry
            .expect_enqueue()
            .with(
                eq(json!({"id": 1})),
                eq("a.b"),
                eq(0),
                mockall::predicate::function(|meta: &RetryMetadata| {
                    meta.kind.as_deref() == Some("user") && meta.backoff_secs == vec![5, 60, 600, 600, 600]
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let tx = transmitter(failing_connector()).with_retry(Arc::new(retry));

        let sent = tx
            .send_message(
                &json!({"id": 1}),
                "a.b",
                SendOptions::new().kind("user").on_error(OnError::RetryAsync),
            )
            .await;

        assert_eq!(sent, Ok(false));
    }

    #[tokio::test]
    async fn failed_hand_off_returns_the_original_error() {
        let mut retry = MockAsyncRetry::new();
        retry
            .expect_enqueue()
            .returning(|_, _, _, _| Err(BusError::RetryEnqueueError("queue full".to_owned())));
        let tx = transmitter(failing_connector()).with_retry(Arc::new(retry));

        let sent = tx
            .send_message(&json!({}), "a.b", SendOptions::new().on_error(OnError::RetryAsync))
            .await;

        assert_eq!(sent, Err(BusError::PublishingError("broker down".to_owned())));
    }

    #[tokio::test]
    async fn missing_app_id_fails_before_connecting() {
        let tx = Transmitter::new(
            Arc::new(Configuration::new("test")),
            Arc::new(MockFactory {
                connector: Arc::new(MockConnector::new()),
            }),
        );

        let sent = tx.send_message(&json!({}), "a.b", SendOptions::new()).await;

        assert!(matches!(sent, Err(BusError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn send_async_needs_a_collaborator() {
        let tx = transmitter(MockConnector::new());

        let sent = tx.send_message_async(&json!({}), "a.b", 1_000).await;

        assert!(matches!(sent, Err(BusError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn send_async_forwards_the_delay() {
        let mut retry = MockAsyncRetry::new();
        retry
            .expect_enqueue()
            .with(eq(json!({"id": 1})), eq("a.b"), eq(1_000), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let tx = transmitter(MockConnector::new()).with_retry(Arc::new(retry));

        assert!(tx.send_message_async(&json!({"id": 1}), "a.b", 1_000).await.is_ok());
    }

    #[tokio::test]
    async fn batch_closes_on_the_error_path() {
        let factory = MockFactory {
            connector: Arc::new(failing_connector()),
        };

        let result = PersistentTransmitter::batch(config(), &factory, |tx| {
            Box::pin(async move { tx.send_message(&json!({}), "a.b", SendOptions::new()).await })
        })
        .await;

        assert_eq!(result, Err(BusError::PublishingError("broker down".to_owned())));
    }

    #[tokio::test]
    async fn batch_shares_one_connector() {
        let mut connector = MockConnector::new();
        connector.expect_publish().times(2).returning(|_, _| Ok(()));
        connector.expect_close().times(1).returning(|| Ok(()));
        let factory = MockFactory {
            connector: Arc::new(connector),
        };

        let result = PersistentTransmitter::batch(config(), &factory, |tx| {
            Box::pin(async move {
                tx.send_message(&json!({"n": 1}), "a.b", SendOptions::new()).await?;
                tx.send_message(&json!({"n": 2}), "a.b", SendOptions::new()).await
            })
        })
        .await;

        assert_eq!(result, Ok(true));
    }
}
