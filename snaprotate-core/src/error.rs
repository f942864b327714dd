/*!
Error types for the snapshot rotation core.
*/

use thiserror::Error;

/// Result type used throughout the rotation core.
pub type Result<T> = std::result::Result<T, RotateError>;

/// Errors that can occur while rotating snapshots.
#[derive(Error, Debug)]
pub enum RotateError {
    /// I/O errors while reading events from disk or stdin
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failures reported by a resource provider (EC2, RDS, ...)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Failures delivering a notification
    #[error("Notification error: {0}")]
    Notification(String),

    /// Invalid rotation settings
    #[error("Validation error: {0}")]
    Validation(String),

    /// Problems building clients or runtimes from the environment
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RotateError {
    /// Create a new provider error
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new notification error
    pub fn notification<S: Into<String>>(msg: S) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
}
