//! Error types for Humsana

use thiserror::Error;

/// Errors that can occur while analyzing signals, persisting logs, or gating commands
#[derive(Debug, Error)]
pub enum HumsanaError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}
