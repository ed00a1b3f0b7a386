//! Service-specific error types

use std::net::SocketAddr;
use thiserror::Error;

/// Listener setup errors.
///
/// Per-delivery failures (bad signature, malformed body) are answered
/// directly as HTTP status codes by the router and never become errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
