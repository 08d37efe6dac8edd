//! Error types for the notification core.

use crate::types::{RecipientId, Sequence};
use thiserror::Error;

/// Main error type for producer-facing and client-facing operations.
///
/// Session-local failures (write errors, disconnects, idle timeouts) are not
/// represented here; they end the session and are reported through
/// [`crate::session::CloseReason`].
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recipient not found: {0}")]
    RecipientUnknown(RecipientId),

    #[error("Sequence space exhausted for recipient {0}")]
    SequenceExhausted(RecipientId),

    #[error("Invalid cursor: {0:?}")]
    InvalidCursor(String),

    #[error("Notification not found: {sequence:?} for recipient {recipient}")]
    NotificationNotFound {
        recipient: RecipientId,
        sequence: Sequence,
    },

    #[error("Read-state batch is empty")]
    EmptyBatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NotifyError {
    fn from(e: serde_json::Error) -> Self {
        NotifyError::Serialization(e.to_string())
    }
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
