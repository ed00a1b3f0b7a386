//! Twitch app access token management
//!
//! Keeps the relay's app access token on disk, checks it against the
//! platform's validate endpoint and replaces it through the
//! client-credentials grant when it stops being valid.
//!
//! Token flow:
//! 1. `TokenStore::read()` loads the current token from the token file
//! 2. `token::validate_token()` asks the platform whether it is still live
//! 3. `token::request_app_token()` obtains a replacement
//! 4. `TokenStore::write()` persists it atomically
//!
//! `TokenManager` wraps those steps behind `get_token`, `is_token_valid`
//! and `refresh_token`.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod token;

pub use constants::Endpoints;
pub use credentials::TokenStore;
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use token::{TokenResponse, TokenValidity, request_app_token, validate_token};
