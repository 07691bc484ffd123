// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Error-Handling Roles
//!
//! When a consumer handler fails, the receiver hands the failure to an
//! ordered [`Chain`](crate::chain::Chain) of the roles defined here. Each role
//! may resolve the delivery (ack, nack, nack-with-requeue) and decides whether
//! later roles still run.
//!
//! The default chain is computed by [`build_chain`]:
//! 1. [`IgnorePayloadFormatErrors`]
//! 2. [`NackAndRequeueOnce`] when requeueing is on, [`NackAndIgnore`] otherwise
//! 3. [`Crash`] unless the consumer is kept alive on handler errors. A handler
//!    implementing [`MessageHandler::on_unhandled_error`] decides in its place.

use crate::{
    config::{Configuration, PayloadLogging},
    connector::Connector,
    errors::BusError,
    message::Delivery,
    payload::Payload,
    receiver::MessageHandler,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

/// What the chain does after a role returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainControl {
    /// Evaluate the next role.
    Continue,
    /// Skip every remaining role.
    Abort,
    /// Skip every remaining role and stop consuming.
    Halt(String),
}

/// Everything a role knows about one failed delivery.
pub struct ErrorContext<'a> {
    pub handler: &'a dyn MessageHandler,
    pub connector: &'a dyn Connector,
    pub config: &'a Configuration,
    pub queue_name: &'a str,
    pub payload: Option<&'a Payload>,
    pub delivery: &'a Delivery,
    pub error: &'a BusError,
}

impl ErrorContext<'_> {
    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Payload rendered for a log line at `level`.
    fn loggable_payload(&self, level: PayloadLogging) -> String {
        match self.payload {
            Some(payload) => self.config.payload_for_log(level, payload),
            None => self
                .config
                .payload_for_log(level, &String::from_utf8_lossy(&self.delivery.data)),
        }
    }

    fn log(&self, message: &str) {
        error!(
            queue = self.queue_name,
            routing_key = self.delivery.routing_key(),
            payload = self.loggable_payload(PayloadLogging::Error),
            handler = self.handler_name(),
            error = self.error.to_string(),
            "{} on {}",
            message,
            self.queue_name
        );
    }
}

/// One failure-response policy in the error-handling chain.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError>;
}

/// Drops malformed payloads: nack without requeue and abort the chain.
pub struct IgnorePayloadFormatErrors;

#[async_trait]
impl ErrorHandler for IgnorePayloadFormatErrors {
    fn name(&self) -> &'static str {
        "IgnorePayloadFormatErrors"
    }

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
        if !ctx.error.is_payload_format() {
            return Ok(ChainControl::Continue);
        }

        ctx.log("Ignoring payload format error");
        ctx.connector.nack(ctx.delivery.tag()).await?;
        Ok(ChainControl::Abort)
    }
}

/// Requeues a failed delivery once; a redelivered failure is nacked for good.
pub struct NackAndRequeueOnce;

#[async_trait]
impl ErrorHandler for NackAndRequeueOnce {
    fn name(&self) -> &'static str {
        "NackAndRequeueOnce"
    }

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
        if ctx.delivery.redelivered() {
            ctx.log("Error Processing Message");
            ctx.connector.nack(ctx.delivery.tag()).await?;
        } else {
            ctx.log("Retrying an Error Processing Message");
            ctx.connector.nack_requeue(ctx.delivery.tag()).await?;
        }

        Ok(ChainControl::Continue)
    }
}

/// Nacks without requeue.
pub struct NackAndIgnore;

#[async_trait]
impl ErrorHandler for NackAndIgnore {
    fn name(&self) -> &'static str {
        "NackAndIgnore"
    }

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
        ctx.log("Error Processing Message");
        ctx.connector.nack(ctx.delivery.tag()).await?;
        Ok(ChainControl::Continue)
    }
}

/// Stops the consumer, unless the handler's unhandled-error hook takes the
/// error instead.
pub struct Crash;

#[async_trait]
impl ErrorHandler for Crash {
    fn name(&self) -> &'static str {
        "Crash"
    }

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
        match ctx.handler.on_unhandled_error(ctx.error) {
            Some(Ok(())) => {
                warn!(
                    queue = ctx.queue_name,
                    handler = ctx.handler_name(),
                    error = ctx.error.to_string(),
                    "unhandled error taken by the handler, keeping the consumer alive"
                );
                Ok(ChainControl::Abort)
            }
            Some(Err(err)) => Ok(ChainControl::Halt(format!("exiting due to exception {}", err))),
            None => Ok(ChainControl::Halt(format!(
                "exiting due to exception {}",
                ctx.error
            ))),
        }
    }
}

/// Acknowledges the failed delivery and stops the chain.
///
/// Meant to be prepended by handlers that manage their own retries.
pub struct Swallow;

#[async_trait]
impl ErrorHandler for Swallow {
    fn name(&self) -> &'static str {
        "Swallow"
    }

    async fn handle_error(&self, ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
        warn!(
            queue = ctx.queue_name,
            routing_key = ctx.delivery.routing_key(),
            handler = ctx.handler_name(),
            error = ctx.error.to_string(),
            "swallowing handler error"
        );
        ctx.connector.ack(ctx.delivery.tag()).await?;
        Ok(ChainControl::Abort)
    }
}

/// Computes the default chain for the given settings.
pub fn build_chain(requeue: bool, keep_alive: bool) -> Vec<Arc<dyn ErrorHandler>> {
    let mut chain: Vec<Arc<dyn ErrorHandler>> = vec![Arc::new(IgnorePayloadFormatErrors)];

    if requeue {
        chain.push(Arc::new(NackAndRequeueOnce));
    } else {
        chain.push(Arc::new(NackAndIgnore));
    }

    if !keep_alive {
        chain.push(Arc::new(Crash));
    }

    chain
}
