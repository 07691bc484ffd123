// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Receiver
//!
//! Subscribes a [`MessageHandler`] to a named queue and runs the consume loop.
//!
//! Each delivery is parsed, handed to the handler and then resolved exactly
//! once: acknowledged when the handler succeeds, otherwise resolved by the
//! error-handling [`Chain`]. The loop stops when the chain halts, when an
//! [`Interrupt`] fires or when the handler returns [`BusError::Interrupted`].
//! An interrupt never goes through the chain and leaves the in-flight
//! delivery unresolved, so the transport hands it out again.
//!
//! In blocking mode [`Receiver::subscribe`] returns only once the loop has
//! stopped, and closes its connector on the way out. In non-blocking mode the
//! loop runs on its own task and the connector stays open for the caller.

use crate::{
    chain::{Chain, ChainOutcome},
    config::{Configuration, PayloadLogging},
    connector::{ConnectParams, Connector, ConnectorFactory, DeliveryStream},
    error_handling::{ErrorContext, ErrorHandler},
    errors::BusError,
    message::{Delivery, DeliveryInfo, MessageProperties},
    otel,
    payload::{Payload, PayloadParser},
    routing::split_routing_keys,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Routing key pattern used when none is given
pub const DEFAULT_ROUTING_KEY: &str = "#.#";

/// Consumer-side message handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Identity used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Processes one delivery. Returning [`BusError::Interrupted`] stops the
    /// consumer without resolving the delivery.
    async fn handle(
        &self,
        info: &DeliveryInfo,
        properties: &MessageProperties,
        payload: &Payload,
    ) -> Result<(), BusError>;

    /// A role run ahead of the default error-handling chain for this handler.
    fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        None
    }

    /// Takes the place of the crash decision for errors the chain did not
    /// settle. `None` leaves it to the configuration, `Some(Ok(()))` keeps the
    /// consumer running and `Some(Err(_))` halts it with that error.
    fn on_unhandled_error(&self, _err: &BusError) -> Option<Result<(), BusError>> {
        None
    }
}

/// Graceful shutdown signal shared between a consumer and its owner.
#[derive(Debug, Clone)]
pub struct Interrupt {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Interrupt {
    fn default() -> Self {
        let (sender, receiver) = watch::channel(false);
        Interrupt {
            sender: Arc::new(sender),
            receiver,
        }
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Interrupt::default()
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`Interrupt::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        // the sender lives as long as any clone of this handle
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

/// Options of one subscription.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Comma-separated routing key patterns, bound independently
    pub routing_key: String,
    /// Falls back to `Configuration::default_prefetch`
    pub prefetch: Option<u16>,
    pub block: bool,
    pub interrupt: Option<Interrupt>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions {
            routing_key: DEFAULT_ROUTING_KEY.to_owned(),
            prefetch: None,
            block: true,
            interrupt: None,
        }
    }
}

impl SubscribeOptions {
    pub fn new() -> Self {
        SubscribeOptions::default()
    }

    pub fn routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = routing_key.to_owned();
        self
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.block = false;
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }
}

/// Handle on a subscribed consumer.
pub struct Subscription {
    queue_name: String,
    connector: Arc<dyn Connector>,
    interrupt: Interrupt,
    task: Option<JoinHandle<Result<(), BusError>>>,
}

impl Subscription {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Asks the consume loop to stop after the current delivery.
    pub fn interrupt(&self) {
        self.interrupt.trigger();
    }

    /// Waits for a background consume loop to stop and returns its outcome.
    pub async fn wait(self) -> Result<(), BusError> {
        match self.task {
            Some(task) => task
                .await
                .map_err(|err| BusError::InternalError(err.to_string()))?,
            None => Ok(()),
        }
    }

    /// Closes the connector of a non-blocking subscription.
    pub async fn close(&self) -> Result<(), BusError> {
        self.connector.close().await
    }
}

/// Why the consume loop stopped.
#[derive(Debug, PartialEq)]
enum Stop {
    Interrupted,
    Drained,
    /// The error-handling chain gave up on the consumer.
    Halted(BusError),
    /// The transport failed underneath the consumer.
    Failed(BusError),
}

impl Stop {
    fn from_error(err: BusError) -> Self {
        if err.is_interrupt() {
            Stop::Interrupted
        } else if err.is_fatal() {
            Stop::Halted(err)
        } else {
            Stop::Failed(err)
        }
    }

    fn log(&self, queue: &str) {
        match self {
            Stop::Drained => debug!(queue = queue, "delivery stream ended"),
            Stop::Interrupted => {
                info!(queue = queue, "Interrupting queue {} subscriber safely", queue)
            }
            Stop::Halted(err) => error!(
                queue = queue,
                error = err.to_string(),
                "Halting queue {} subscriber", queue
            ),
            Stop::Failed(err) => error!(
                queue = queue,
                error = err.to_string(),
                "Queue {} subscriber stopped on a transport error", queue
            ),
        }
    }

    fn into_result(self) -> Result<(), BusError> {
        match self {
            Stop::Interrupted | Stop::Drained => Ok(()),
            Stop::Halted(err) | Stop::Failed(err) => Err(err),
        }
    }
}

/// One queue consumer.
pub struct Receiver {
    config: Arc<Configuration>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    queue_name: String,
    chain: Chain,
    parser: PayloadParser,
    interrupt: Interrupt,
    block: bool,
}

impl Receiver {
    /// Subscribes `handler` to `queue_name`.
    ///
    /// # Parameters
    /// * `config` - Settings shared with the connector and the error-handling chain
    /// * `factory` - Backend used to open the consumer connector
    /// * `handler` - Handler invoked for every delivery
    /// * `queue_name` - Durable queue to consume from
    /// * `opts` - Routing keys, prefetch, blocking mode and interrupt handle
    ///
    /// # Returns
    /// The subscription once the consumer is set up (non-blocking) or once it
    /// was interrupted (blocking). A halted consumer returns the fatal error.
    pub async fn subscribe(
        config: Arc<Configuration>,
        factory: &dyn ConnectorFactory,
        handler: Arc<dyn MessageHandler>,
        queue_name: &str,
        opts: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        let params = ConnectParams::new()
            .queue(queue_name)
            .prefetch(opts.prefetch.or(config.default_prefetch))
            .connection_name(&format!("c: {}", queue_name));
        let connector = factory.open(params).await?;

        let deliveries = match Self::setup(connector.as_ref(), &opts.routing_key).await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                if let Err(close_err) = connector.close().await {
                    warn!(error = close_err.to_string(), "error closing the consumer connector");
                }
                return Err(err);
            }
        };
        info!(queue = queue_name, "Receiving on {}", queue_name);

        let interrupt = opts.interrupt.unwrap_or_default();
        let receiver = Receiver {
            chain: Chain::with_override(config.error_handling_chain(), handler.error_handler()),
            parser: PayloadParser::from_config(&config),
            config,
            connector: connector.clone(),
            handler,
            queue_name: queue_name.to_owned(),
            interrupt: interrupt.clone(),
            block: opts.block,
        };

        let task = if opts.block {
            receiver.run(deliveries).await?;
            None
        } else {
            Some(tokio::spawn(receiver.run(deliveries)))
        };

        Ok(Subscription {
            queue_name: queue_name.to_owned(),
            connector,
            interrupt,
            task,
        })
    }

    async fn setup(connector: &dyn Connector, routing_key: &str) -> Result<DeliveryStream, BusError> {
        for key in split_routing_keys(routing_key) {
            connector.bind(&key).await?;
        }

        connector.consume(true).await
    }

    /// Consumes until interrupted, drained or halted.
    async fn run(self, mut deliveries: DeliveryStream) -> Result<(), BusError> {
        let tracer = global::tracer("courier receiver");

        let stop = loop {
            let next = tokio::select! {
                biased;
                _ = self.interrupt.triggered() => break Stop::Interrupted,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => break Stop::from_error(err),
                None => break Stop::Drained,
            };

            if let Err(err) = self.process(&tracer, &delivery).await {
                break Stop::from_error(err);
            }
        };

        stop.log(&self.queue_name);

        if self.block {
            if let Err(err) = self.connector.close().await {
                warn!(error = err.to_string(), "error closing the consumer connector");
            }
        }

        stop.into_result()
    }

    /// Runs the handler for one delivery and resolves the delivery.
    async fn process(&self, tracer: &BoxedTracer, delivery: &Delivery) -> Result<(), BusError> {
        let mut span = otel::new_span(&delivery.properties, tracer, &self.queue_name);

        let parsed = self.parser.parse(&delivery.data);
        let result = match &parsed {
            Ok(payload) => {
                self.handler
                    .handle(&delivery.info, &delivery.properties, payload)
                    .await
            }
            Err(err) => Err(err.clone()),
        };

        let err = match result {
            Ok(()) => {
                self.connector.ack(delivery.tag()).await.inspect_err(|err| {
                    span.record_error(err);
                })?;
                span.set_status(Status::Ok);

                info!(
                    queue = self.queue_name,
                    routing_key = delivery.routing_key(),
                    "Processed Message on {} -> {}, {}",
                    self.queue_name,
                    self.loggable(&parsed, delivery),
                    delivery.routing_key()
                );
                return Ok(());
            }
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => err,
        };

        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from(err.to_string()),
        });

        let ctx = ErrorContext {
            handler: self.handler.as_ref(),
            connector: self.connector.as_ref(),
            config: &self.config,
            queue_name: &self.queue_name,
            payload: parsed.as_ref().ok(),
            delivery,
            error: &err,
        };

        match self.chain.handle_error(&ctx).await {
            ChainOutcome::Continue => Ok(()),
            ChainOutcome::Halt(fatal) => Err(fatal),
        }
    }

    fn loggable(&self, parsed: &Result<Payload, BusError>, delivery: &Delivery) -> String {
        match parsed {
            Ok(payload) => self.config.payload_for_log(PayloadLogging::Info, payload),
            Err(_) => self
                .config
                .payload_for_log(PayloadLogging::Info, &String::from_utf8_lossy(&delivery.data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connector::MockConnector,
        error_handling::Swallow,
        message::{DeliveryTag, MessageProperties},
    };
    use futures_util::stream;
    use mockall::predicate::eq;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    struct SingleConnector {
        connector: Arc<MockConnector>,
        params: Mutex<Option<ConnectParams>>,
    }

    #[async_trait]
    impl ConnectorFactory for SingleConnector {
        async fn open(&self, params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
            *self.params.lock().unwrap() = Some(params);
            Ok(self.connector.clone())
        }
    }

    fn factory(connector: MockConnector) -> SingleConnector {
        SingleConnector {
            connector: Arc::new(connector),
            params: Mutex::new(None),
        }
    }

    fn delivery(tag: u64, data: &[u8]) -> Delivery {
        Delivery {
            info: DeliveryInfo {
                routing_key: "a.b.c".to_owned(),
                exchange: "courier.topics.test".to_owned(),
                redelivered: false,
                delivery_tag: DeliveryTag::new(tag),
            },
            properties: MessageProperties::default(),
            data: data.to_vec(),
        }
    }

    fn streaming(connector: &mut MockConnector, deliveries: Vec<Delivery>) {
        connector.expect_bind().returning(|_| Ok(()));
        connector.expect_consume().times(1).returning(move |manual_ack| {
            assert!(manual_ack);
            let items: Vec<Result<Delivery, BusError>> =
                deliveries.clone().into_iter().map(Ok).collect();
            Ok(Box::pin(stream::iter(items)))
        });
    }

    struct Counting {
        calls: AtomicUsize,
        result: Result<(), BusError>,
        swallow: bool,
    }

    impl Counting {
        fn new(result: Result<(), BusError>) -> Arc<Self> {
            Arc::new(Counting {
                calls: AtomicUsize::new(0),
                result,
                swallow: false,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Counting {
        fn name(&self) -> &str {
            "Counting"
        }

        async fn handle(
            &self,
            _info: &DeliveryInfo,
            _properties: &MessageProperties,
            _payload: &Payload,
        ) -> Result<(), BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
            self.swallow.then(|| Arc::new(Swallow) as Arc<dyn ErrorHandler>)
        }
    }

    fn config(keep_alive: bool) -> Arc<Configuration> {
        Arc::new(Configuration {
            keep_alive_on_handler_errors: keep_alive,
            default_prefetch: Some(1),
            ..Configuration::new("test")
        })
    }

    #[tokio::test]
    async fn binds_every_pattern_and_acks_successes() {
        let mut connector = MockConnector::new();
        connector
            .expect_bind()
            .with(eq("a.b.*"))
            .times(1)
            .returning(|_| Ok(()));
        connector
            .expect_bind()
            .with(eq("x.#"))
            .times(1)
            .returning(|_| Ok(()));
        connector.expect_consume().times(1).returning(|_| {
            let items: Vec<Result<Delivery, BusError>> =
                vec![Ok(delivery(1, br#"{"a":1}"#)), Ok(delivery(2, br#"{"a":2}"#))];
            Ok(Box::pin(stream::iter(items)))
        });
        connector.expect_ack().times(2).returning(|_| Ok(()));
        connector.expect_close().times(1).returning(|| Ok(()));
        let factory = factory(connector);
        let handler = Counting::new(Ok(()));

        Receiver::subscribe(
            config(false),
            &factory,
            handler.clone(),
            "orders",
            SubscribeOptions::new().routing_key("a.b.*, x.#"),
        )
        .await
        .unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let params = factory.params.lock().unwrap().clone().unwrap();
        assert_eq!(params.queue_name.as_deref(), Some("orders"));
        assert_eq!(params.prefetch, Some(1));
        assert_eq!(params.connection_name.as_deref(), Some("c: orders"));
    }

    #[tokio::test]
    async fn halting_chain_stops_and_closes() {
        let mut connector = MockConnector::new();
        streaming(
            &mut connector,
            vec![delivery(1, br#"{"a":1}"#), delivery(2, br#"{"a":2}"#)],
        );
        connector.expect_nack().times(1).returning(|_| Ok(()));
        connector.expect_close().times(1).returning(|| Ok(()));
        let handler = Counting::new(Err(BusError::handler("boom")));

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler.clone(),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(matches!(result, Err(BusError::ConsumerHalted(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payloads_skip_the_handler() {
        let mut connector = MockConnector::new();
        streaming(&mut connector, vec![delivery(1, b"{nope")]);
        connector
            .expect_nack()
            .with(eq(DeliveryTag::new(1)))
            .times(1)
            .returning(|_| Ok(()));
        connector.expect_nack_requeue().never();
        connector.expect_close().returning(|| Ok(()));
        let handler = Counting::new(Ok(()));

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler.clone(),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_interrupt_bypasses_the_chain() {
        let mut connector = MockConnector::new();
        streaming(
            &mut connector,
            vec![delivery(1, br#"{"a":1}"#), delivery(2, br#"{"a":2}"#)],
        );
        connector.expect_ack().never();
        connector.expect_nack().never();
        connector.expect_nack_requeue().never();
        connector.expect_close().times(1).returning(|| Ok(()));
        let handler = Counting::new(Err(BusError::Interrupted));

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler.clone(),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn triggered_interrupt_stops_before_the_next_delivery() {
        let mut connector = MockConnector::new();
        streaming(&mut connector, vec![delivery(1, br#"{"a":1}"#)]);
        connector.expect_ack().never();
        connector.expect_close().times(1).returning(|| Ok(()));
        let handler = Counting::new(Ok(()));
        let interrupt = Interrupt::new();
        interrupt.trigger();

        Receiver::subscribe(
            config(false),
            &factory(connector),
            handler.clone(),
            "orders",
            SubscribeOptions::new().interrupt(interrupt.clone()),
        )
        .await
        .unwrap();

        assert!(interrupt.is_triggered());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_blocking_leaves_the_connector_open() {
        let mut connector = MockConnector::new();
        connector.expect_bind().returning(|_| Ok(()));
        connector
            .expect_consume()
            .returning(|_| Ok(Box::pin(stream::pending::<Result<Delivery, BusError>>())));
        connector.expect_close().never();
        let handler = Counting::new(Ok(()));

        let subscription = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler,
            "orders",
            SubscribeOptions::new().non_blocking(),
        )
        .await
        .unwrap();

        subscription.interrupt();
        assert_eq!(subscription.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn handler_override_runs_ahead_of_the_chain() {
        let mut connector = MockConnector::new();
        streaming(&mut connector, vec![delivery(1, br#"{"a":1}"#)]);
        connector.expect_ack().times(1).returning(|_| Ok(()));
        connector.expect_nack().never();
        connector.expect_close().returning(|| Ok(()));
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            result: Err(BusError::handler("boom")),
            swallow: true,
        });

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler,
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failed_bind_closes_the_connector() {
        let mut connector = MockConnector::new();
        connector
            .expect_bind()
            .returning(|_| Err(BusError::BindingExchangeToQueueError("t".into(), "q".into())));
        connector.expect_consume().never();
        connector.expect_close().times(1).returning(|| Ok(()));

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            Counting::new(Ok(())),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(matches!(result, Err(BusError::BindingExchangeToQueueError(..))));
    }

    struct SelfManaged {
        calls: AtomicUsize,
        unhandled: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for SelfManaged {
        async fn handle(
            &self,
            _info: &DeliveryInfo,
            _properties: &MessageProperties,
            _payload: &Payload,
        ) -> Result<(), BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BusError::handler("boom"))
        }

        fn on_unhandled_error(&self, _err: &BusError) -> Option<Result<(), BusError>> {
            self.unhandled.fetch_add(1, Ordering::SeqCst);
            Some(Ok(()))
        }
    }

    #[tokio::test]
    async fn unhandled_error_hook_keeps_the_consumer_alive() {
        let mut connector = MockConnector::new();
        streaming(
            &mut connector,
            vec![delivery(1, br#"{"a":1}"#), delivery(2, br#"{"a":2}"#)],
        );
        connector.expect_nack().times(2).returning(|_| Ok(()));
        connector.expect_close().times(1).returning(|| Ok(()));
        let handler = Arc::new(SelfManaged {
            calls: AtomicUsize::new(0),
            unhandled: AtomicUsize::new(0),
        });

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            handler.clone(),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(handler.unhandled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transport_failures_stop_the_consumer() {
        let mut connector = MockConnector::new();
        connector.expect_bind().returning(|_| Ok(()));
        connector.expect_consume().returning(|_| {
            let items: Vec<Result<Delivery, BusError>> =
                vec![Err(BusError::ConsumerError("channel closed".to_owned()))];
            Ok(Box::pin(stream::iter(items)))
        });
        connector.expect_close().times(1).returning(|| Ok(()));

        let result = Receiver::subscribe(
            config(false),
            &factory(connector),
            Counting::new(Ok(())),
            "orders",
            SubscribeOptions::new(),
        )
        .await;

        assert_eq!(result.err(), Some(BusError::ConsumerError("channel closed".to_owned())));
    }

    #[test]
    fn stops_are_classified_by_error() {
        assert_eq!(Stop::from_error(BusError::Interrupted), Stop::Interrupted);
        assert!(matches!(
            Stop::from_error(BusError::ConsumerHalted("boom".to_owned())),
            Stop::Halted(_)
        ));
        assert!(matches!(
            Stop::from_error(BusError::ChainHandlerError("Crash".to_owned(), "boom".to_owned())),
            Stop::Halted(_)
        ));
        assert!(matches!(
            Stop::from_error(BusError::AckMessageError),
            Stop::Failed(_)
        ));

        assert_eq!(Stop::Drained.into_result(), Ok(()));
        assert_eq!(
            Stop::Halted(BusError::ConsumerHalted("boom".to_owned())).into_result(),
            Err(BusError::ConsumerHalted("boom".to_owned()))
        );
    }

    #[test]
    fn default_handler_name_is_the_type_name() {
        struct Named;

        #[async_trait]
        impl MessageHandler for Named {
            async fn handle(
                &self,
                _info: &DeliveryInfo,
                _properties: &MessageProperties,
                _payload: &Payload,
            ) -> Result<(), BusError> {
                Ok(())
            }
        }

        assert!(Named.name().ends_with("Named"));
    }
}
