use std::path::PathBuf;
use thiserror::Error;

/// Error type for connector, worker startup, publishing and config loading.
#[derive(Debug, Error)]
pub enum MqError {
    /// Invalid configuration detected before touching the network.
    #[error("configuration error: {0}")]
    Config(String),

    /// A configured consumer has no registered handler.
    #[error("handler for id: {0} not found")]
    HandlerNotFound(String),

    /// Every dial attempt failed; carries the last underlying error.
    #[error("failed to connect to RabbitMQ after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    /// Error originating from the underlying `lapin` library.
    #[error("RabbitMQ communication error: {0}")]
    Lapin(#[from] lapin::Error),

    /// Publishing a message failed.
    #[error("failed to publish message: {0}")]
    Publish(#[source] lapin::Error),

    /// Reading a file from the config root failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during config deserialization.
    #[error("failed to deserialize config: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl From<&str> for MqError {
    fn from(s: &str) -> Self {
        MqError::Config(s.to_string())
    }
}

impl From<String> for MqError {
    fn from(s: String) -> Self {
        MqError::Config(s)
    }
}

/// Error returned by a message handler.
///
/// Handler errors never leave the worker: they are logged and the delivery is
/// negatively acknowledged without requeue.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    /// The handler panicked; holds the panic message.
    #[error("panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::Failed(s.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError::Failed(s)
    }
}
