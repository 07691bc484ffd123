// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Envelope
//!
//! Computes the per-message metadata attached to every publish, independent of
//! the transport that carries it.

use crate::message::{Headers, MessageProperties};
use chrono::Utc;
use uuid::Uuid;

/// Content type of every payload produced by the transmitter
pub const JSON_CONTENT_TYPE: &str = "application/json; version=1";

/// Message identifier requested by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageId {
    /// Generate a random unique identifier.
    #[default]
    Auto,
    /// Use this value verbatim, empty strings included.
    Literal(String),
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId::Literal(value.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId::Literal(value)
    }
}

impl MessageId {
    fn resolve(&self) -> String {
        match self {
            MessageId::Auto => Uuid::new_v4().to_string(),
            MessageId::Literal(id) => id.clone(),
        }
    }
}

/// Immutable metadata for one outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    routing_key: String,
    message_id: String,
    app_id: String,
    kind: Option<String>,
    headers: Option<Headers>,
    expiration: Option<u64>,
    timestamp: u64,
}

impl Envelope {
    /// Builds the envelope, stamping it with the current time.
    ///
    /// # Parameters
    /// * `routing_key` - Routing key of the message
    /// * `app_id` - Identifier of the publishing application
    /// * `message_id` - Caller-supplied id or [`MessageId::Auto`]
    /// * `kind` - Optional type tag
    /// * `headers` - Optional custom headers
    /// * `expiration` - Optional delay, in milliseconds
    pub fn new(
        routing_key: &str,
        app_id: &str,
        message_id: &MessageId,
        kind: Option<String>,
        headers: Option<Headers>,
        expiration: Option<u64>,
    ) -> Self {
        Envelope {
            routing_key: routing_key.to_owned(),
            message_id: message_id.resolve(),
            app_id: app_id.to_owned(),
            kind,
            headers,
            expiration,
            timestamp: Utc::now().timestamp().max(0) as u64,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn expiration(&self) -> Option<u64> {
        self.expiration
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_delayed(&self) -> bool {
        self.expiration.is_some()
    }

    /// The wire-visible properties for this envelope. Always persistent.
    pub fn properties(&self) -> MessageProperties {
        MessageProperties {
            message_id: Some(self.message_id.clone()),
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
            app_id: Some(self.app_id.clone()),
            kind: self.kind.clone(),
            headers: self.headers.clone(),
            persistent: true,
            timestamp: Some(self.timestamp),
            expiration: self.expiration,
        }
    }
}
