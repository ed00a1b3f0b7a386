//! Error types for subscription management

/// Errors from Helix subscription calls and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Helix returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected Helix response: {0}")]
    Decode(String),

    #[error("credential error: {0}")]
    Auth(#[from] twitch_auth::Error),

    #[error("desired subscriptions: {0}")]
    Desired(String),
}

/// Result alias for subscription operations.
pub type Result<T> = std::result::Result<T, Error>;
