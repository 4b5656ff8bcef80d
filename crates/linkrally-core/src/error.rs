//! Error types for the linkrally engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the whole workspace.
///
/// Variants are typed so callers can distinguish transient backend trouble
/// (worth a retry or a graceful degradation) from deterministic rejections.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RallyError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Non-2xx response from the backend service
    #[error("Backend error: HTTP {status}: {message}")]
    Backend {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// Transport-level failure (connect, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// A move rejected by domain rules; never retried
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RallyError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates an IllegalMove error
    pub fn illegal_move(message: impl Into<String>) -> Self {
        Self::IllegalMove(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying (or falling back to client-side logic) is sensible.
    ///
    /// Transport failures and 5xx/429 responses are retryable; explicit
    /// rejections and other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Backend { retryable, .. } => *retryable,
            Self::Serialization { .. } => true,
            Self::NotFound { .. } | Self::IllegalMove(_) | Self::Internal(_) => false,
        }
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for RallyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RallyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, RallyError>`.
pub type Result<T> = std::result::Result<T, RallyError>;
