//! Core error types

use thiserror::Error;

/// A snapshot or request value outside its allowed range
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(i64),

    #[error("RAM usage must be between 0 and 100, got {0}")]
    RamUsageOutOfRange(f64),

    #[error("Invalid {field}: {value} (must be a non-negative number)")]
    InvalidPrice { field: &'static str, value: f64 },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid time range: start_time is after end_time")]
    InvalidTimeRange,

    #[error("Unknown command type: {0}")]
    UnknownCommand(String),
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;
