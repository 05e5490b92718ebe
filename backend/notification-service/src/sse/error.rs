//! Error types for the relay path
//!
//! None of these ever reach a producer: the bridge logs them and degrades to
//! reduced delivery instead.

use thiserror::Error;

/// Broker transport errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Broker refused or could not serve the request
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while moving an event through the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode envelope: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("relay publish timed out after {0:?}")]
    Timeout(std::time::Duration),
}
