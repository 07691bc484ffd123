// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module propagates trace context through message headers: the
//! transmitter injects the current context on publish and the receiver
//! extracts it to open one consumer span per delivery.

use crate::message::{HeaderValue, Headers, MessageProperties};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// Writes trace context entries into an outgoing header map.
pub(crate) struct HeaderInjector<'a> {
    headers: &'a mut Headers,
}

impl<'a> HeaderInjector<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.to_lowercase(), HeaderValue::String(value));
    }
}

/// Reads trace context entries from an inbound header map.
pub(crate) struct HeaderExtractor<'a> {
    headers: &'a Headers,
}

impl<'a> HeaderExtractor<'a> {
    pub(crate) fn new(headers: &'a Headers) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.get(key) {
            Some(HeaderValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Returns the caller's headers with the current trace context injected.
///
/// `None` stays `None` when there is nothing to inject, which is the case
/// when no global propagator is installed.
pub fn with_trace_context(headers: Option<Headers>) -> Option<Headers> {
    let had_headers = headers.is_some();
    let mut headers = headers.unwrap_or_default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut HeaderInjector::new(&mut headers))
    });

    if headers.is_empty() && !had_headers {
        None
    } else {
        Some(headers)
    }
}

/// Creates a consumer span for one delivery, parented to the context found
/// in its headers.
pub fn new_span(props: &MessageProperties, tracer: &BoxedTracer, name: &str) -> BoxedSpan {
    let headers = props.headers.clone().unwrap_or_default();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor::new(&headers))
    });

    tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx)
}
