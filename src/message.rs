// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport-Neutral Message Types
//!
//! Every backend translates its own delivery representation into these types,
//! so receivers, handlers and error-handling roles never see the concrete
//! transport.

use std::collections::BTreeMap;

/// A single header value carried next to a message.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// Opaque handle identifying one inbound message instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub(crate) u64);

impl DeliveryTag {
    pub fn new(tag: u64) -> Self {
        DeliveryTag(tag)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// The wire-visible attributes of a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub app_id: Option<String>,
    pub kind: Option<String>,
    pub headers: Option<Headers>,
    pub persistent: bool,
    /// Unix timestamp, whole seconds.
    pub timestamp: Option<u64>,
    /// Time-to-live in milliseconds.
    pub expiration: Option<u64>,
}

/// Delivery metadata handed to consumer handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryInfo {
    pub routing_key: String,
    pub exchange: String,
    pub redelivered: bool,
    pub delivery_tag: DeliveryTag,
}

/// One inbound message, as pushed by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub info: DeliveryInfo,
    pub properties: MessageProperties,
    pub data: Vec<u8>,
}

impl Delivery {
    pub fn routing_key(&self) -> &str {
        &self.info.routing_key
    }

    pub fn tag(&self) -> DeliveryTag {
        self.info.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.info.redelivered
    }
}
