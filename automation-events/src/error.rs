//! Event bus error types

use automation_trigger::ParseError;
use thiserror::Error;

use crate::config::ConfigError;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed trigger expression
    #[error("Invalid trigger expression: {0}")]
    Parse(#[from] ParseError),

    /// Positional arguments that do not map to an event shape
    #[error("Invalid event arguments: {0}")]
    InvalidArguments(String),

    /// Invalid bus configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Queued dispatch needs a Tokio runtime
    #[error("No Tokio runtime is available to drain the event queue")]
    NoRuntime,

    /// The bus was reset or shut down before the event was dispatched
    #[error("Event bus was shut down")]
    Shutdown,
}

/// Result type for event bus operations.
pub type EventResult<T> = Result<T, EventError>;
