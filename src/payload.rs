// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Payload Parsing
//!
//! Deliveries carry raw bytes; the receiver turns them into a [`Payload`]
//! with the parser selected by the configuration before invoking a handler.

use crate::{config::Configuration, errors::BusError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// A parsed inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Value),
    Raw(Vec<u8>),
}

impl Payload {
    /// Looks up a top-level field. An exact key match wins, otherwise the
    /// first key equal ignoring ASCII case is returned.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let Payload::Structured(Value::Object(map)) = self else {
            return None;
        };

        map.get(key).or_else(|| {
            map.iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            Payload::Structured(_) => None,
        }
    }

    /// Decodes the payload into a typed value.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        match self {
            Payload::Structured(value) => Ok(T::deserialize(value)?),
            Payload::Raw(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Structured(value) => write!(f, "{value}"),
            Payload::Raw(bytes) => write!(f, "[{} raw bytes]", bytes.len()),
        }
    }
}

/// Strategy used to turn raw delivery bytes into a [`Payload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadParser {
    #[default]
    Json,
    Raw,
}

impl PayloadParser {
    pub fn from_config(cfg: &Configuration) -> Self {
        if cfg.receive_raw_payload {
            PayloadParser::Raw
        } else {
            PayloadParser::Json
        }
    }

    pub fn parse(&self, data: &[u8]) -> Result<Payload, BusError> {
        match self {
            PayloadParser::Json => Ok(Payload::Structured(serde_json::from_slice(data)?)),
            PayloadParser::Raw => Ok(Payload::Raw(data.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn json_parser_decodes_structured_payloads() {
        let payload = PayloadParser::Json
            .parse(br#"{"sample":"payload"}"#)
            .unwrap();

        assert_eq!(payload.as_value(), Some(&json!({"sample": "payload"})));
        assert_eq!(payload.get("sample"), Some(&json!("payload")));
    }

    #[test]
    fn json_parser_reports_payload_format_errors() {
        let err = PayloadParser::Json.parse(b"not json").unwrap_err();
        assert!(err.is_payload_format());
    }

    #[test]
    fn raw_parser_passes_bytes_through() {
        let payload = PayloadParser::Raw.parse(b"not json").unwrap();

        assert_eq!(payload.as_bytes(), Some(&b"not json"[..]));
        assert_eq!(payload.get("anything"), None);
    }

    #[test]
    fn lookups_fall_back_to_case_insensitive_keys() {
        let payload = Payload::Structured(json!({"UserId": 7, "userid": 8}));

        assert_eq!(payload.get("userid"), Some(&json!(8)));
        assert_eq!(payload.get("USERID"), Some(&json!(7)));
        assert_eq!(payload.get("missing"), None);
    }

    #[test]
    fn deserializes_into_typed_values() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Activated {
            user_id: u64,
        }

        let payload = Payload::Structured(json!({"user_id": 42}));
        assert_eq!(
            payload.deserialize::<Activated>().unwrap(),
            Activated { user_id: 42 }
        );
    }

    #[test]
    fn parser_follows_configuration() {
        let mut cfg = Configuration::default();
        assert_eq!(PayloadParser::from_config(&cfg), PayloadParser::Json);

        cfg.receive_raw_payload = true;
        assert_eq!(PayloadParser::from_config(&cfg), PayloadParser::Raw);
    }
}
