// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error-Handling Chain
//!
//! Runs the configured [`ErrorHandler`] roles in order until one aborts or
//! the list is exhausted. A role that fails while handling an error stops the
//! chain and halts the consumer.

use crate::{
    error_handling::{ChainControl, ErrorContext, ErrorHandler},
    errors::BusError,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of running the chain for one failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Keep consuming.
    Continue,
    /// Stop consuming with this fatal error.
    Halt(BusError),
}

/// An immutable, ordered list of error-handling roles.
#[derive(Clone, Default)]
pub struct Chain {
    handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl Chain {
    pub fn new(handlers: Vec<Arc<dyn ErrorHandler>>) -> Self {
        Chain { handlers }
    }

    /// The default chain with an optional per-handler role in front.
    pub fn with_override(
        defaults: Vec<Arc<dyn ErrorHandler>>,
        first: Option<Arc<dyn ErrorHandler>>,
    ) -> Self {
        let handlers = first.into_iter().chain(defaults).collect();
        Chain { handlers }
    }

    pub fn handlers(&self) -> &[Arc<dyn ErrorHandler>] {
        &self.handlers
    }

    pub async fn handle_error(&self, ctx: &ErrorContext<'_>) -> ChainOutcome {
        let mut keep_going = true;

        for handler in &self.handlers {
            if !keep_going {
                debug!(
                    "skipping {} as we were asked to abort previously",
                    handler.name()
                );
                continue;
            }

            match handler.handle_error(ctx).await {
                Ok(ChainControl::Continue) => {}
                Ok(ChainControl::Abort) => {
                    info!("{} has halted the error-handling chain", handler.name());
                    keep_going = false;
                }
                Ok(ChainControl::Halt(reason)) => {
                    error!(
                        queue = ctx.queue_name,
                        handler = handler.name(),
                        "{}",
                        reason
                    );
                    return ChainOutcome::Halt(BusError::ConsumerHalted(reason));
                }
                Err(err) => {
                    error!(
                        queue = ctx.queue_name,
                        handler = handler.name(),
                        error = err.to_string(),
                        "error handler failed, halting the consumer"
                    );
                    return ChainOutcome::Halt(BusError::ChainHandlerError(
                        handler.name().to_owned(),
                        err.to_string(),
                    ));
                }
            }
        }

        ChainOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Configuration,
        connector::MockConnector,
        error_handling::{
            build_chain,
            tests::{delivery, Idle},
            Swallow,
        },
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        name: &'static str,
        control: Result<ChainControl, BusError>,
        calls: Arc<AtomicUsize>,
    }

    impl Recording {
        fn new(name: &'static str, control: Result<ChainControl, BusError>) -> Arc<Self> {
            Arc::new(Recording {
                name,
                control,
                calls: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ErrorHandler for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle_error(&self, _ctx: &ErrorContext<'_>) -> Result<ChainControl, BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.control.clone()
        }
    }

    fn chain_of(roles: &[Arc<Recording>]) -> Chain {
        Chain::new(
            roles
                .iter()
                .map(|role| role.clone() as Arc<dyn ErrorHandler>)
                .collect(),
        )
    }

    async fn run(chain: &Chain, connector: &MockConnector, error: &BusError) -> ChainOutcome {
        let cfg = Configuration::default();
        let delivery = delivery(false);
        let ctx = ErrorContext {
            handler: &Idle,
            connector,
            config: &cfg,
            queue_name: "orders",
            payload: None,
            delivery: &delivery,
            error,
        };
        chain.handle_error(&ctx).await
    }

    #[tokio::test]
    async fn abort_skips_later_roles() {
        let first = Recording::new("first", Ok(ChainControl::Continue));
        let second = Recording::new("second", Ok(ChainControl::Abort));
        let third = Recording::new("third", Ok(ChainControl::Continue));
        let chain = chain_of(&[first.clone(), second.clone(), third.clone()]);

        let outcome = run(&chain, &MockConnector::new(), &BusError::handler("boom")).await;

        assert_eq!(outcome, ChainOutcome::Continue);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_continues() {
        let only = Recording::new("only", Ok(ChainControl::Continue));
        let chain = chain_of(&[only.clone()]);

        let outcome = run(&chain, &MockConnector::new(), &BusError::handler("boom")).await;

        assert_eq!(outcome, ChainOutcome::Continue);
        assert_eq!(only.calls(), 1);
    }

    #[tokio::test]
    async fn failing_role_halts_and_stops_evaluation() {
        let broken = Recording::new("broken", Err(BusError::NackMessageError));
        let after = Recording::new("after", Ok(ChainControl::Continue));
        let chain = chain_of(&[broken.clone(), after.clone()]);

        let outcome = run(&chain, &MockConnector::new(), &BusError::handler("boom")).await;

        assert_eq!(
            outcome,
            ChainOutcome::Halt(BusError::ChainHandlerError(
                "broken".to_owned(),
                BusError::NackMessageError.to_string()
            ))
        );
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn halt_role_stops_the_consumer() {
        let halt = Recording::new("halt", Ok(ChainControl::Halt("bye".to_owned())));
        let after = Recording::new("after", Ok(ChainControl::Continue));
        let chain = chain_of(&[halt, after.clone()]);

        let outcome = run(&chain, &MockConnector::new(), &BusError::handler("boom")).await;

        assert_eq!(outcome, ChainOutcome::Halt(BusError::ConsumerHalted("bye".to_owned())));
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn default_chain_nacks_then_crashes() {
        let mut connector = MockConnector::new();
        connector.expect_nack().times(1).returning(|_| Ok(()));
        let chain = Chain::new(build_chain(false, false));

        let outcome = run(&chain, &connector, &BusError::handler("boom")).await;

        assert!(matches!(outcome, ChainOutcome::Halt(BusError::ConsumerHalted(_))));
    }

    #[tokio::test]
    async fn default_chain_drops_malformed_payloads_without_crashing() {
        let mut connector = MockConnector::new();
        connector.expect_nack().times(1).returning(|_| Ok(()));
        connector.expect_nack_requeue().never();
        let chain = Chain::new(build_chain(true, false));

        let outcome = run(
            &chain,
            &connector,
            &BusError::PayloadFormatError("bad".to_owned()),
        )
        .await;

        assert_eq!(outcome, ChainOutcome::Continue);
    }

    #[tokio::test]
    async fn override_runs_first() {
        let mut connector = MockConnector::new();
        connector.expect_ack().times(1).returning(|_| Ok(()));
        connector.expect_nack().never();
        let chain = Chain::with_override(build_chain(false, false), Some(Arc::new(Swallow)));

        assert_eq!(chain.handlers()[0].name(), "Swallow");
        assert_eq!(chain.handlers().len(), 4);

        let outcome = run(&chain, &connector, &BusError::handler("boom")).await;
        assert_eq!(outcome, ChainOutcome::Continue);
    }
}
