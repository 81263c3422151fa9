//! Error types shared by the broker, the transport and the processes.
//!
//! Broker errors are never retried by the correlation code: they abort the loop
//! that hit them. Process supervision decides whether to restart.

use thiserror::Error;

/// Failures of the stream broker contract, local or remote.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection is closed")]
    Closed,

    #[error("no consumer group '{group}' on stream '{stream}'")]
    UnknownGroup { stream: String, group: String },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("broker replied with an error: {0}")]
    Remote(String),
}

/// Process-level failures surfaced by the `broker`, `server` and `worker` commands.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("reply correlator stopped")]
    CorrelatorStopped,
}
