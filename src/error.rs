//! Error types for the automation pipeline.
//!
//! Errors are classified by how the pipeline reacts to them:
//! - Transient: retried with bounded backoff before surfacing
//! - Permanent: logged and skipped, never retried
//! - Storage: durable-store failures, the only cycle-fatal class

use thiserror::Error;

/// Error taxonomy for the automation pipeline.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Provider failure that is worth retrying (timeout, rate limit, 5xx).
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Provider failure that retrying cannot fix (not found, bad request).
    #[error("permanent provider error: {0}")]
    PermanentProvider(String),

    /// The oracle replied, but not with parseable JSON in the agreed shape.
    #[error("oracle returned malformed output: {0}")]
    OracleFormat(String),

    /// A user action that violates the proposal state machine.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A cycle trigger arrived while another cycle was running.
    #[error("a cycle is already running")]
    ConcurrencyRejected,

    /// Durable-store failure (ledger or proposal persistence).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AutomationError {
    /// Returns true if this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::TransientProvider(_))
    }

    /// Returns true if this error must abort the running cycle.
    ///
    /// Only durable-storage failures qualify: a pipeline that cannot
    /// record what it has done can no longer guarantee at-most-once
    /// side effects.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(self, AutomationError::Storage(_))
    }
}

impl From<reqwest::Error> for AutomationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AutomationError::TransientProvider(err.to_string())
        } else {
            AutomationError::PermanentProvider(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for AutomationError {
    fn from(err: rusqlite::Error) -> Self {
        AutomationError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AutomationError {
    fn from(err: std::io::Error) -> Self {
        AutomationError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::Storage(err.to_string())
    }
}

/// Map an HTTP status from a provider into the taxonomy.
pub fn classify_status(status: reqwest::StatusCode, context: &str) -> AutomationError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AutomationError::TransientProvider(format!("{}: HTTP {}", context, status))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        AutomationError::PermanentProvider(format!("{}: not found", context))
    } else {
        AutomationError::PermanentProvider(format!("{}: HTTP {}", context, status))
    }
}
