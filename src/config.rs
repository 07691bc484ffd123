// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! A single explicit configuration value threaded through every transmitter,
//! receiver and connector. Nothing in the crate reads process-wide state, so
//! tests can build isolated configurations side by side.

use crate::{
    error_handling::{build_chain, ErrorHandler},
    errors::BusError,
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, sync::Arc};

/// Prefix of the environment variables read by [`Configuration::load`].
pub const ENV_PREFIX: &str = "COURIER";

/// Level used to decide whether payloads may appear in log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadLogging {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub environment: String,
    pub rabbit_mq_host: Option<String>,
    pub topic_exchange_name: Option<String>,
    pub delayed_exchange_name: Option<String>,
    pub delayed_queue_name: Option<String>,
    pub app_id: Option<String>,
    pub process_name: String,
    pub allow_delayed: bool,
    pub requeue_on_error: bool,
    pub keep_alive_on_handler_errors: bool,
    pub default_prefetch: Option<u16>,
    pub receive_raw_payload: bool,
    pub payload_logging: PayloadLogging,
    /// Delays (seconds) a retry collaborator should use between attempts.
    pub async_retry_backoff_secs: Vec<u64>,
    pub aws_region: Option<String>,
    pub aws_account_id: Option<String>,
    /// Overrides the SNS/SQS endpoint, e.g. for a local emulator.
    pub aws_endpoint_url: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            environment: "development".to_owned(),
            rabbit_mq_host: None,
            topic_exchange_name: None,
            delayed_exchange_name: None,
            delayed_queue_name: None,
            app_id: None,
            process_name: String::new(),
            allow_delayed: false,
            requeue_on_error: false,
            keep_alive_on_handler_errors: false,
            default_prefetch: None,
            receive_raw_payload: false,
            payload_logging: PayloadLogging::Info,
            async_retry_backoff_secs: vec![5, 60, 600, 600, 600],
            aws_region: None,
            aws_account_id: None,
            aws_endpoint_url: None,
        }
    }
}

impl Configuration {
    /// Creates a configuration for the given environment with every other
    /// setting at its default.
    pub fn new(environment: &str) -> Self {
        Configuration {
            environment: environment.to_owned(),
            ..Default::default()
        }
    }

    /// Loads the configuration from an optional TOML/JSON file, overridden by
    /// `COURIER_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, BusError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("async_retry_backoff_secs"),
            )
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Configuration>())
            .map_err(|err| BusError::ConfigurationError(err.to_string()))
    }

    pub fn app_id(&self) -> Result<&str, BusError> {
        match self.app_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(BusError::ConfigurationError(
                "could not derive the app_id; you must explicitly set it".to_owned(),
            )),
        }
    }

    pub fn topic_exchange_name(&self) -> String {
        self.topic_exchange_name
            .clone()
            .unwrap_or_else(|| format!("courier.topics.{}", self.environment))
    }

    pub fn delayed_exchange_name(&self) -> String {
        self.delayed_exchange_name
            .clone()
            .unwrap_or_else(|| format!("courier.delayed.{}", self.environment))
    }

    pub fn delayed_queue_name(&self) -> String {
        self.delayed_queue_name
            .clone()
            .unwrap_or_else(|| format!("courier_delayed_{}", self.environment))
    }

    /// Fails with a configuration error unless delayed delivery is enabled.
    pub fn ensure_delayed_allowed(&self) -> Result<(), BusError> {
        if self.allow_delayed {
            Ok(())
        } else {
            Err(BusError::ConfigurationError(
                "delayed messages are not allowed; update your configuration to allow them"
                    .to_owned(),
            ))
        }
    }

    /// The default error-handling chain for the current settings.
    pub fn error_handling_chain(&self) -> Vec<Arc<dyn ErrorHandler>> {
        build_chain(self.requeue_on_error, self.keep_alive_on_handler_errors)
    }

    /// True if a log line at `level` must not include the payload.
    pub fn omit_payload_from_log(&self, level: PayloadLogging) -> bool {
        self.receive_raw_payload || self.payload_logging > level
    }

    /// The payload as it may appear in a log line at `level`.
    pub fn payload_for_log(&self, level: PayloadLogging, payload: &dyn fmt::Display) -> String {
        if self.omit_payload_from_log(level) {
            "[omitted]".to_owned()
        } else {
            payload.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn derives_names_from_environment() {
        let cfg = Configuration::new("test");

        assert_eq!(cfg.topic_exchange_name(), "courier.topics.test");
        assert_eq!(cfg.delayed_exchange_name(), "courier.delayed.test");
        assert_eq!(cfg.delayed_queue_name(), "courier_delayed_test");
    }

    #[test]
    fn explicit_names_win() {
        let cfg = Configuration {
            topic_exchange_name: Some("topics".to_owned()),
            ..Configuration::new("test")
        };

        assert_eq!(cfg.topic_exchange_name(), "topics");
    }

    #[test]
    fn blank_app_id_is_a_configuration_error() {
        let mut cfg = Configuration::default();
        assert!(matches!(cfg.app_id(), Err(BusError::ConfigurationError(_))));

        cfg.app_id = Some("   ".to_owned());
        assert!(cfg.app_id().is_err());

        cfg.app_id = Some("billing".to_owned());
        assert_eq!(cfg.app_id(), Ok("billing"));
    }

    #[test]
    fn delayed_delivery_is_off_by_default() {
        let mut cfg = Configuration::default();
        assert!(matches!(
            cfg.ensure_delayed_allowed(),
            Err(BusError::ConfigurationError(_))
        ));

        cfg.allow_delayed = true;
        assert!(cfg.ensure_delayed_allowed().is_ok());
    }

    #[test]
    fn payload_omission_follows_levels() {
        let mut cfg = Configuration {
            payload_logging: PayloadLogging::Error,
            ..Default::default()
        };
        assert!(cfg.omit_payload_from_log(PayloadLogging::Info));
        assert!(!cfg.omit_payload_from_log(PayloadLogging::Error));

        cfg.payload_logging = PayloadLogging::Debug;
        assert!(!cfg.omit_payload_from_log(PayloadLogging::Info));

        cfg.receive_raw_payload = true;
        assert!(cfg.omit_payload_from_log(PayloadLogging::Error));
        assert_eq!(cfg.payload_for_log(PayloadLogging::Error, &"secret"), "[omitted]");
    }

    #[test]
    fn loads_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "environment = \"staging\"\napp_id = \"billing\"\nallow_delayed = true\ndefault_prefetch = 10\npayload_logging = \"warn\""
        )
        .unwrap();

        let cfg = Configuration::load(Some(file.path())).unwrap();

        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.app_id(), Ok("billing"));
        assert!(cfg.allow_delayed);
        assert_eq!(cfg.default_prefetch, Some(10));
        assert_eq!(cfg.payload_logging, PayloadLogging::Warn);
        assert!(!cfg.requeue_on_error);
    }
}
