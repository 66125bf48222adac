//! Error types for devpulse-sdk crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur talking to the devpulse API
#[derive(Debug, Error)]
pub enum SdkError {
    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server rejected the request as invalid (400)
    #[error("Rejected by server: {message}")]
    Rejected { status: u16, message: String },

    /// Server error or any other non-success status
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Resource already exists (409)
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        device_id: Option<i64>,
    },

    /// Response body did not match the expected schema
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Offline storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,
}

impl SdkError {
    /// Check if this is a network-related error
    pub fn is_network_error(&self) -> bool {
        matches!(self, SdkError::Network(_) | SdkError::Timeout)
    }

    /// Check if this error is retryable
    ///
    /// Only an explicit 400 rejection, a conflict, or a local problem with the
    /// request itself is final; every other failure may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SdkError::Rejected { .. }
                | SdkError::Conflict { .. }
                | SdkError::Serialization(_)
                | SdkError::Storage(_)
                | SdkError::UrlParse(_)
                | SdkError::Config(_)
        )
    }

    /// Create a server error from status and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        SdkError::Server {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Rejected { status, .. } | SdkError::Server { status, .. } => Some(*status),
            SdkError::Conflict { .. } => Some(409),
            SdkError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;

/// Errors from the offline store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("Storage I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record content is not a valid snapshot
    #[error("Corrupt offline record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot could not be serialized
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the record exists but cannot be parsed
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// Result type for offline store operations
pub type StorageResult<T> = Result<T, StorageError>;
