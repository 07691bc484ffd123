// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # SNS/SQS Connector
//!
//! [`Connector`] implementation for the cloud topic/queue pair. Messages are
//! published to an SNS topic and consumed from an SQS queue subscribed to that
//! topic with raw message delivery. The topic, the queues and their
//! subscriptions are provisioned outside the library.
//!
//! The routing key and the message properties travel as message attributes.
//! SNS has no per-message TTL, so delayed publish is always refused with a
//! configuration error. Routing-key bindings are applied on the consumer
//! side: deliveries whose routing key matches none of the bound patterns are
//! deleted without being handed out.

use crate::{
    config::Configuration,
    connector::{missing_queue, ConnectParams, Connector, ConnectorFactory, DeliveryStream},
    envelope::Envelope,
    errors::BusError,
    message::{Delivery, DeliveryInfo, DeliveryTag, HeaderValue, Headers, MessageProperties},
    routing::topic_matches,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sqs::{
    error::{DisplayErrorContext, SdkError},
    types::{Message, MessageSystemAttributeName, QueueAttributeName},
};
use futures_util::stream;
use std::{
    collections::{HashMap, VecDeque},
    error::Error,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

pub const ROUTING_KEY_ATTRIBUTE: &str = "routing_key";
pub const MESSAGE_ID_ATTRIBUTE: &str = "message_id";
pub const CONTENT_TYPE_ATTRIBUTE: &str = "content_type";
pub const APP_ID_ATTRIBUTE: &str = "app_id";
pub const TYPE_ATTRIBUTE: &str = "type";
pub const TIMESTAMP_ATTRIBUTE: &str = "timestamp";
/// Custom headers are carried as `header.<name>` string attributes.
pub const HEADER_ATTRIBUTE_PREFIX: &str = "header.";

/// Upper bound SQS puts on one receive call
const MAX_RECEIVE_BATCH: u16 = 10;
/// Long-polling wait of the consume loop, in seconds
const RECEIVE_WAIT_SECS: i32 = 20;
/// Wait of a single pop, in seconds
const POP_WAIT_SECS: i32 = 1;

/// Opens [`AwsConnector`]s sharing one pair of SDK clients.
pub struct AwsConnectorFactory {
    config: Arc<Configuration>,
    sns: aws_sdk_sns::Client,
    sqs: aws_sdk_sqs::Client,
}

impl AwsConnectorFactory {
    /// Builds the clients from the default AWS credential chain, in
    /// `aws_region` and against `aws_endpoint_url` when one is set.
    pub async fn from_env(config: Arc<Configuration>) -> Result<Arc<AwsConnectorFactory>, BusError> {
        let region = config.aws_region.clone().ok_or_else(|| {
            BusError::ConfigurationError("aws_region is not configured".to_owned())
        })?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk = loader.load().await;

        Ok(Self::with_clients(
            config,
            aws_sdk_sns::Client::new(&sdk),
            aws_sdk_sqs::Client::new(&sdk),
        ))
    }

    pub fn with_clients(
        config: Arc<Configuration>,
        sns: aws_sdk_sns::Client,
        sqs: aws_sdk_sqs::Client,
    ) -> Arc<AwsConnectorFactory> {
        Arc::new(AwsConnectorFactory { config, sns, sqs })
    }
}

#[async_trait]
impl ConnectorFactory for AwsConnectorFactory {
    async fn open(&self, params: ConnectParams) -> Result<Arc<dyn Connector>, BusError> {
        let connector =
            AwsConnector::open(self.config.clone(), self.sns.clone(), self.sqs.clone(), params)
                .await?;
        Ok(Arc::new(connector))
    }
}

/// ARN of the SNS topic named by the configuration.
pub fn topic_arn(cfg: &Configuration) -> Result<String, BusError> {
    match (cfg.aws_region.as_deref(), cfg.aws_account_id.as_deref()) {
        (Some(region), Some(account)) => Ok(format!(
            "arn:aws:sns:{}:{}:{}",
            region,
            account,
            cfg.topic_exchange_name()
        )),
        _ => Err(BusError::ConfigurationError(
            "aws_region and aws_account_id must be configured".to_owned(),
        )),
    }
}

fn delay_unsupported() -> BusError {
    BusError::ConfigurationError(
        "delayed messages are not supported by the SNS/SQS backend".to_owned(),
    )
}

/// Maps SDK failures, keeping network failures apart as connection errors.
fn transport_error<E, R>(err: SdkError<E, R>, otherwise: impl FnOnce(String) -> BusError) -> BusError
where
    E: Error + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            BusError::ConnectionError(message)
        }
        _ => otherwise(message),
    }
}

/// The message attributes published next to a payload.
fn message_attributes(envelope: &Envelope) -> Vec<(String, String)> {
    let props = envelope.properties();
    let mut attributes = vec![
        (ROUTING_KEY_ATTRIBUTE.to_owned(), envelope.routing_key().to_owned()),
        (MESSAGE_ID_ATTRIBUTE.to_owned(), envelope.message_id().to_owned()),
        (TIMESTAMP_ATTRIBUTE.to_owned(), envelope.timestamp().to_string()),
    ];

    let optional = [
        (CONTENT_TYPE_ATTRIBUTE, props.content_type),
        (APP_ID_ATTRIBUTE, props.app_id),
        (TYPE_ATTRIBUTE, props.kind),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            attributes.push((name.to_owned(), value));
        }
    }

    for (name, value) in props.headers.unwrap_or_default() {
        let value = match value {
            HeaderValue::String(v) => v,
            HeaderValue::Int(v) => v.to_string(),
            HeaderValue::Bool(v) => v.to_string(),
            HeaderValue::Float(v) => v.to_string(),
        };
        attributes.push((format!("{}{}", HEADER_ATTRIBUTE_PREFIX, name), value));
    }

    attributes
}

/// The parts of an SQS message the connector uses.
#[derive(Debug, Clone, Default, PartialEq)]
struct Received {
    body: String,
    receipt_handle: Option<String>,
    message_id: Option<String>,
    attributes: HashMap<String, String>,
    receive_count: u32,
}

impl Received {
    fn from_sqs(message: &Message) -> Self {
        let attributes = message
            .message_attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|(name, value)| {
                        value.string_value().map(|v| (name.clone(), v.to_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Received {
            body: message.body().unwrap_or_default().to_owned(),
            receipt_handle: message.receipt_handle().map(str::to_owned),
            message_id: message.message_id().map(str::to_owned),
            attributes,
            receive_count,
        }
    }

    /// Routing key of the message; queues fed without one report their name.
    fn routing_key<'a>(&'a self, queue_name: &'a str) -> &'a str {
        self.attributes
            .get(ROUTING_KEY_ATTRIBUTE)
            .map(String::as_str)
            .unwrap_or(queue_name)
    }

    fn into_delivery(self, tag: DeliveryTag, queue_name: &str, topic: &str) -> Delivery {
        let routing_key = self.routing_key(queue_name).to_owned();
        let mut attributes = self.attributes;

        let headers: Headers = attributes
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(HEADER_ATTRIBUTE_PREFIX)
                    .map(|name| (name.to_owned(), HeaderValue::String(value.clone())))
            })
            .collect();

        let properties = MessageProperties {
            message_id: attributes.remove(MESSAGE_ID_ATTRIBUTE).or(self.message_id),
            content_type: attributes.remove(CONTENT_TYPE_ATTRIBUTE),
            app_id: attributes.remove(APP_ID_ATTRIBUTE),
            kind: attributes.remove(TYPE_ATTRIBUTE),
            headers: (!headers.is_empty()).then_some(headers),
            persistent: true,
            timestamp: attributes
                .get(TIMESTAMP_ATTRIBUTE)
                .and_then(|v| v.parse().ok()),
            expiration: None,
        };

        Delivery {
            info: DeliveryInfo {
                routing_key,
                exchange: topic.to_owned(),
                redelivered: self.receive_count > 1,
                delivery_tag: tag,
            },
            properties,
            data: self.body.into_bytes(),
        }
    }
}

/// Maps delivery tags to SQS receipt handles.
#[derive(Default)]
struct Receipts {
    next: AtomicU64,
    handles: Mutex<HashMap<u64, String>>,
}

impl Receipts {
    fn next_tag(&self) -> DeliveryTag {
        DeliveryTag::new(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn track(&self, receipt_handle: String) -> DeliveryTag {
        let tag = self.next_tag();
        self.handles.lock().await.insert(tag.value(), receipt_handle);
        tag
    }

    async fn take(&self, tag: DeliveryTag) -> Option<String> {
        self.handles.lock().await.remove(&tag.value())
    }
}

/// One SQS queue, shared between a connector and its consume stream.
#[derive(Clone)]
struct QueueClient {
    sqs: aws_sdk_sqs::Client,
    name: String,
    url: String,
    topic: String,
    bindings: Arc<RwLock<Vec<String>>>,
    receipts: Arc<Receipts>,
}

impl QueueClient {
    async fn receive(&self, max: i32, wait_secs: i32) -> Result<Vec<Received>, BusError> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_secs)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|err| {
                let err = transport_error(err, BusError::ConsumerError);
                error!(error = err.to_string(), queue = self.name, "error receiving messages");
                err
            })?;

        Ok(output.messages().iter().map(Received::from_sqs).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), BusError> {
        self.sqs
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| transport_error(err, BusError::ConsumerError))?;
        Ok(())
    }

    /// True when no pattern is bound or one of them matches.
    async fn admits(&self, received: &Received) -> bool {
        let bindings = self.bindings.read().await;
        let routing_key = received.routing_key(&self.name);

        bindings.is_empty()
            || bindings
                .iter()
                .any(|pattern| topic_matches(pattern, routing_key))
    }

    /// Turns a received message into a delivery, or deletes it when no
    /// binding admits it.
    async fn deliver(&self, received: Received, manual_ack: bool) -> Result<Option<Delivery>, BusError> {
        let Some(receipt_handle) = received.receipt_handle.clone() else {
            return Err(BusError::ConsumerError(
                "received a message without a receipt handle".to_owned(),
            ));
        };

        if !self.admits(&received).await {
            debug!(
                queue = self.name,
                routing_key = received.routing_key(&self.name),
                "dropping a message no binding matches"
            );
            self.delete(&receipt_handle).await?;
            return Ok(None);
        }

        let tag = if manual_ack {
            self.receipts.track(receipt_handle).await
        } else {
            self.delete(&receipt_handle).await?;
            self.receipts.next_tag()
        };

        Ok(Some(received.into_delivery(tag, &self.name, &self.topic)))
    }
}

/// State of one consume stream.
struct Consumption {
    queue: QueueClient,
    buffer: VecDeque<Received>,
    closed: Arc<AtomicBool>,
    manual_ack: bool,
    max: i32,
}

impl Consumption {
    async fn next(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            let Some(received) = self.buffer.pop_front() else {
                match self.queue.receive(self.max, RECEIVE_WAIT_SECS).await {
                    Ok(batch) => self.buffer.extend(batch),
                    Err(err) => return Some(Err(err)),
                }
                continue;
            };

            match self.queue.deliver(received, self.manual_ack).await {
                Ok(Some(delivery)) => return Some(Ok(delivery)),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// A connector over the shared SNS and SQS clients.
pub struct AwsConnector {
    config: Arc<Configuration>,
    sns: aws_sdk_sns::Client,
    topic_arn: String,
    queue: Option<QueueClient>,
    prefetch: i32,
    closed: Arc<AtomicBool>,
}

impl AwsConnector {
    /// Resolves the topic ARN and, when a queue name is given, the queue URL.
    pub async fn open(
        config: Arc<Configuration>,
        sns: aws_sdk_sns::Client,
        sqs: aws_sdk_sqs::Client,
        params: ConnectParams,
    ) -> Result<Self, BusError> {
        let topic_arn = topic_arn(&config)?;

        let queue = match params.queue_name {
            Some(name) => {
                let output = sqs
                    .get_queue_url()
                    .queue_name(&name)
                    .send()
                    .await
                    .map_err(|err| {
                        let err = transport_error(err, |_| BusError::DeclareQueueError(name.clone()));
                        error!(error = err.to_string(), queue = name, "error resolving the queue");
                        err
                    })?;

                let url = output
                    .queue_url()
                    .ok_or_else(|| BusError::DeclareQueueError(name.clone()))?
                    .to_owned();

                Some(QueueClient {
                    sqs,
                    url,
                    topic: config.topic_exchange_name(),
                    name,
                    bindings: Arc::new(RwLock::new(vec![])),
                    receipts: Arc::new(Receipts::default()),
                })
            }
            None => None,
        };

        debug!(
            connection = params.connection_name.as_deref().unwrap_or_default(),
            topic = topic_arn,
            "sns/sqs connector opened"
        );

        Ok(AwsConnector {
            config,
            sns,
            topic_arn,
            queue,
            prefetch: i32::from(params.prefetch.unwrap_or(1).clamp(1, MAX_RECEIVE_BATCH)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn queue(&self) -> Result<&QueueClient, BusError> {
        self.queue.as_ref().ok_or_else(missing_queue)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::ConnectionError("connection closed".to_owned()))
        } else {
            Ok(())
        }
    }

    async fn receipt(&self, tag: DeliveryTag, missing: BusError) -> Result<(&QueueClient, String), BusError> {
        let queue = self.queue()?;
        match queue.receipts.take(tag).await {
            Some(receipt_handle) => Ok((queue, receipt_handle)),
            None => {
                error!(tag = tag.value(), "unknown delivery tag");
                Err(missing)
            }
        }
    }
}

#[async_trait]
impl Connector for AwsConnector {
    fn topic_name(&self) -> String {
        self.config.topic_exchange_name()
    }

    fn queue_name(&self) -> Option<String> {
        self.queue.as_ref().map(|queue| queue.name.clone())
    }

    async fn ensure_delayed_allowed(&self) -> Result<(), BusError> {
        self.config.ensure_delayed_allowed()?;
        Err(delay_unsupported())
    }

    async fn create_delayed_queue(&self) -> Result<(), BusError> {
        self.ensure_delayed_allowed().await
    }

    async fn bind(&self, routing_key: &str) -> Result<(), BusError> {
        let queue = self.queue()?;
        let mut bindings = queue.bindings.write().await;

        if !bindings.iter().any(|pattern| pattern == routing_key) {
            bindings.push(routing_key.to_owned());
        }

        Ok(())
    }

    async fn publish(&self, payload: &[u8], envelope: &Envelope) -> Result<(), BusError> {
        self.ensure_open()?;
        if envelope.is_delayed() {
            self.ensure_delayed_allowed().await?;
        }

        let message = String::from_utf8(payload.to_vec())
            .map_err(|err| BusError::SerializePayloadError(err.to_string()))?;

        let mut request = self
            .sns
            .publish()
            .topic_arn(&self.topic_arn)
            .message(message);

        for (name, value) in message_attributes(envelope) {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|err| BusError::PublishingError(err.to_string()))?;
            request = request.message_attributes(name, attribute);
        }

        debug!(
            topic = self.topic_arn,
            routing_key = envelope.routing_key(),
            "publishing message"
        );

        request.send().await.map_err(|err| {
            let err = transport_error(err, BusError::PublishingError);
            error!(error = err.to_string(), "error publishing message");
            err
        })?;

        Ok(())
    }

    async fn pop(&self) -> Result<Option<Delivery>, BusError> {
        self.ensure_open()?;
        let queue = self.queue()?;

        for received in queue.receive(1, POP_WAIT_SECS).await? {
            if let Some(delivery) = queue.deliver(received, false).await? {
                return Ok(Some(delivery));
            }
        }

        Ok(None)
    }

    async fn consume(&self, manual_ack: bool) -> Result<DeliveryStream, BusError> {
        self.ensure_open()?;

        let consumption = Consumption {
            queue: self.queue()?.clone(),
            buffer: VecDeque::new(),
            closed: self.closed.clone(),
            manual_ack,
            max: self.prefetch,
        };

        let deliveries = stream::unfold(consumption, |mut consumption| async move {
            let item = consumption.next().await?;
            Some((item, consumption))
        });

        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BusError> {
        let (queue, receipt_handle) = self.receipt(tag, BusError::AckMessageError).await?;

        queue.delete(&receipt_handle).await.map_err(|err| {
            error!(error = err.to_string(), "error whiling ack msg");
            BusError::AckMessageError
        })
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<(), BusError> {
        // SQS has no dead end for rejected messages other than deleting them
        let (queue, receipt_handle) = self.receipt(tag, BusError::NackMessageError).await?;

        queue.delete(&receipt_handle).await.map_err(|err| {
            error!(error = err.to_string(), "error whiling nack msg");
            BusError::NackMessageError
        })
    }

    async fn nack_requeue(&self, tag: DeliveryTag) -> Result<(), BusError> {
        let (queue, receipt_handle) = self.receipt(tag, BusError::RequeuingMessageError).await?;

        queue
            .sqs
            .change_message_visibility()
            .queue_url(&queue.url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|err| {
                error!(
                    error = DisplayErrorContext(&err).to_string(),
                    "error whiling requeuing"
                );
                BusError::RequeuingMessageError
            })?;

        Ok(())
    }

    async fn purge(&self) -> Result<(), BusError> {
        let queue = self.queue()?;

        queue
            .sqs
            .purge_queue()
            .queue_url(&queue.url)
            .send()
            .await
            .map_err(|err| {
                let err = transport_error(err, |_| BusError::PurgeQueueError(queue.name.clone()));
                error!(error = err.to_string(), name = queue.name, "error to purge the queue");
                err
            })?;

        Ok(())
    }

    async fn delete(&self) -> Result<(), BusError> {
        let queue = self.queue()?;

        queue
            .sqs
            .delete_queue()
            .queue_url(&queue.url)
            .send()
            .await
            .map_err(|err| {
                let err = transport_error(err, |_| BusError::DeleteError(queue.name.clone()));
                error!(error = err.to_string(), name = queue.name, "error to delete the queue");
                err
            })?;

        Ok(())
    }

    /// Deletes the queue. The topic outlives the connector's queues.
    async fn teardown(&self) -> Result<(), BusError> {
        if self.queue.is_some() {
            self.delete().await?;
        }

        debug!(topic = self.topic_arn, "topic left in place");
        Ok(())
    }

    async fn message_count(&self) -> Result<u32, BusError> {
        let queue = self.queue()?;

        let output = queue
            .sqs
            .get_queue_attributes()
            .queue_url(&queue.url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|err| {
                let err = transport_error(err, |_| BusError::DeclareQueueError(queue.name.clone()));
                error!(error = err.to_string(), name = queue.name, "error to inspect the queue");
                err
            })?;

        Ok(output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|count| count.parse().ok())
            .unwrap_or_default())
    }

    /// The SDK clients hold no dedicated connection; closing only stops
    /// the consume streams of this connector.
    async fn close(&self) -> Result<(), BusError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closing sns/sqs connector...");
        }

        if let Some(queue) = &self.queue {
            let pending = queue.receipts.handles.lock().await.len();
            if pending > 0 {
                warn!(
                    queue = queue.name,
                    pending = pending,
                    "unresolved deliveries return to the queue after their visibility timeout"
                );
            }
        }

        Ok(())
    }
}
