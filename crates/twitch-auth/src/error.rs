//! Error types for token operations

/// Errors from token storage, validation and refresh.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token request failed: {0}")]
    TokenRequest(String),

    #[error("token validation failed: {0}")]
    Validation(String),

    #[error("invalid client credentials: {0}")]
    InvalidCredentials(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("no token stored: {0}")]
    NotFound(String),
}

/// Result alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;
