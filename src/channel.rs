// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and channels for the
//! AMQP backend.

use crate::{config::Configuration, errors::BusError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Creates a new AMQP channel for communication with the broker.
///
/// This function establishes a connection to `cfg.rabbit_mq_host`, then
/// creates a channel on that connection. If the channel cannot be created the
/// connection is closed before the error is returned.
///
/// # Parameters
/// * `cfg` - Configuration containing the broker URI
/// * `connection_name` - Optional name reported to the broker for this connection
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), BusError>` -
///   A tuple containing the connection and channel on success, or an error on failure.
pub async fn new_amqp_channel(
    cfg: &Configuration,
    connection_name: Option<&str>,
) -> Result<(Arc<Connection>, Arc<Channel>), BusError> {
    let Some(uri) = cfg.rabbit_mq_host.as_deref() else {
        return Err(BusError::ConfigurationError(
            "rabbit_mq_host is not configured".to_owned(),
        ));
    };

    debug!("creating amqp connection...");
    let mut options = ConnectionProperties::default();
    if let Some(name) = connection_name {
        options = options.with_connection_name(LongString::from(name.to_owned()));
    }

    let conn = Connection::connect(uri, options).await.map_err(|err| {
        error!(error = err.to_string(), "failure to connect");
        BusError::ConnectionError(err.to_string())
    })?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            if let Err(close_err) = conn.close(0, "channel creation failed").await {
                warn!(error = close_err.to_string(), "error closing the connection");
            }
            Err(BusError::ChannelError)
        }
    }
}
