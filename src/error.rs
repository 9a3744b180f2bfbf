//! Error types for the tax client
//!
//! Every failure a custom function can hit is one of these kinds. They all
//! reach the caller the same way: a single `ERROR: <message>` cell.

use thiserror::Error;

/// Result type alias using [`TaxError`]
pub type Result<T> = std::result::Result<T, TaxError>;

/// Prefix carried by every error cell handed back to the caller
pub const ERROR_PREFIX: &str = "ERROR: ";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaxError {
    /// Missing or malformed user argument, detected before any request
    #[error("{0}")]
    Validation(String),

    /// No API key configured in any credential backend
    #[error("Please configure your API key in Settings")]
    Auth,

    /// Connection, timeout or body read failure
    #[error("{0}")]
    Transport(String),

    /// Non-2xx status or `success != true` payload
    #[error("{0}")]
    Upstream(String),

    /// Empty result set for the requested state
    #[error("{0}")]
    NotFound(String),
}

impl TaxError {
    pub fn state_required() -> Self {
        TaxError::Validation("State is required".to_string())
    }

    pub fn invalid_premium() -> Self {
        TaxError::Validation("Premium must be greater than 0".to_string())
    }

    pub fn date_required() -> Self {
        TaxError::Validation("Date is required (YYYY-MM-DD format)".to_string())
    }

    pub fn invalid_date() -> Self {
        TaxError::Validation("Date must be in YYYY-MM-DD format".to_string())
    }

    pub fn invalid_format() -> Self {
        TaxError::Upstream("Invalid response format".to_string())
    }

    pub fn state_not_found(state: &str) -> Self {
        TaxError::NotFound(format!("State '{}' not found", state))
    }

    /// Short machine-friendly name of the kind, used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            TaxError::Validation(_) => "validation",
            TaxError::Auth => "auth",
            TaxError::Transport(_) => "transport",
            TaxError::Upstream(_) => "upstream",
            TaxError::NotFound(_) => "not_found",
        }
    }

    /// Text placed in the error cell
    pub fn to_cell_text(&self) -> String {
        format!("{}{}", ERROR_PREFIX, self)
    }
}

impl From<reqwest::Error> for TaxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TaxError::Transport(format!("Request timed out: {}", err))
        } else {
            TaxError::Transport(err.to_string())
        }
    }
}
