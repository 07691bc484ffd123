// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod amqp;
pub mod aws;
pub mod chain;
pub mod channel;
pub mod config;
pub mod connector;
pub mod delayed;
pub mod envelope;
pub mod error_handling;
pub mod errors;
pub mod exchange;
pub mod memory;
pub mod message;
pub mod message_queuer;
pub mod payload;
pub mod queue;
pub mod receiver;
pub mod routing;
pub mod test_handler;
pub mod topology;
pub mod transmitter;
