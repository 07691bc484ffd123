// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Messaging Layer
//!
//! This module provides the error type shared by every part of the crate.
//! The `BusError` enum covers transport failures (connection, topology,
//! publish, ack/nack), configuration problems, payload decoding, consumer
//! handler failures and the fatal outcomes of the error-handling chain.

use thiserror::Error;

/// Represents errors that can occur while publishing or consuming messages.
///
/// Transport variants mirror the broker operation that failed. The consumer
/// side variants (`PayloadFormatError`, `HandlerError`, `ChainHandlerError`,
/// `ConsumerHalted`, `Interrupted`) drive the receiver's error-handling chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Internal errors that don't fit into other categories
    #[error("internal error: {0}")]
    InternalError(String),

    /// Error establishing (or tearing down) a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The configuration does not allow the requested operation
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error: {0}")]
    ConsumerDeclarationError(String),

    /// Error receiving a message from the transport
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error encoding an outgoing payload
    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    /// Error decoding an inbound payload. Never retried.
    #[error("failure to parse payload: {0}")]
    PayloadFormatError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error requeuing a message
    #[error("failure to requeue message")]
    RequeuingMessageError,

    /// Error purging a queue
    #[error("failure to purge queue `{0}`")]
    PurgeQueueError(String),

    /// Error deleting a queue or an exchange
    #[error("failure to delete `{0}`")]
    DeleteError(String),

    /// Any other failure raised by a consumer handler
    #[error("handler error: {0}")]
    HandlerError(String),

    /// An error-handling role itself failed. Always fatal.
    #[error("error handler `{0}` failed: {1}")]
    ChainHandlerError(String, String),

    /// The error-handling chain halted consumption for the receiver
    #[error("consumer halted: {0}")]
    ConsumerHalted(String),

    /// Graceful shutdown signal; bypasses the error-handling chain
    #[error("interrupted")]
    Interrupted,

    /// A message was queued without a payload or a routing key
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The retry collaborator could not accept the message
    #[error("failure to enqueue retry: {0}")]
    RetryEnqueueError(String),
}

impl BusError {
    /// Builds a `HandlerError` from anything printable.
    pub fn handler<E: std::fmt::Display>(err: E) -> Self {
        BusError::HandlerError(err.to_string())
    }

    /// True if the error is a structured payload decode failure.
    pub fn is_payload_format(&self) -> bool {
        matches!(self, BusError::PayloadFormatError(_))
    }

    /// True if the error is the graceful shutdown signal.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, BusError::Interrupted)
    }

    /// True if the error must stop the consumer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::ChainHandlerError(..) | BusError::ConsumerHalted(_)
        )
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::PayloadFormatError(err.to_string())
    }
}
