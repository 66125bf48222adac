//! Agent error types

use devpulse_core::ValidationError;
use devpulse_sdk::SdkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("API error: {0}")]
    Sdk(#[from] SdkError),

    #[error("Quote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Quote endpoint returned status {0}")]
    QuoteStatus(u16),

    #[error("Invalid metrics: {0}")]
    Validation(#[from] ValidationError),

    #[error("Host metrics unavailable: {0}")]
    Host(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
