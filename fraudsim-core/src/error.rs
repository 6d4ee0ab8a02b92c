//! Error types for fraudsim-core

use thiserror::Error;

/// Main error type for the fraudsim-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The durable store could not be reached
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    /// Session not found (intervention targeted an unknown session)
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Alert not found
    #[error("alert not found: {0}")]
    AlertNotFound(String),

    /// Caller failed the operator capability check
    #[error("not authorized: {0}")]
    Unauthorized(String),
}

impl Error {
    /// Whether this error means the store itself failed (as opposed to the
    /// request being invalid). Participant paths fall back to the local cache
    /// on these; anything else is rejected and never retried.
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            Error::StoreUnavailable(_) | Error::Io(_) => true,
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => !matches!(
                e.code,
                rusqlite::ErrorCode::ConstraintViolation
                    | rusqlite::ErrorCode::TypeMismatch
                    | rusqlite::ErrorCode::TooBig
            ),
            _ => false,
        }
    }
}

/// Result type alias for fraudsim-core
pub type Result<T> = std::result::Result<T, Error>;
