//! Token validation and client-credentials issuance
//!
//! Two calls against the Twitch OAuth service:
//! 1. `GET /validate` (token introspection, `OAuth` auth scheme)
//! 2. `POST /token` with `grant_type=client_credentials`
//!
//! The introspection call uses the `OAuth` scheme while Helix calls use
//! `Bearer`. Twitch accepts both on `/validate`; `OAuth` is what it documents.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::Endpoints;
use crate::error::{Error, Result};

/// Response from the token endpoint for a client-credentials grant.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

/// Body of a successful `/validate` response. App tokens carry no login.
#[derive(Debug, Deserialize)]
struct ValidateResponse {
    client_id: String,
    #[serde(default)]
    expires_in: u64,
}

/// Outcome of token introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidity {
    Valid { client_id: String, expires_in: u64 },
    Invalid,
}

impl TokenValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValidity::Valid { .. })
    }
}

/// Ask the platform whether `token` is still live.
///
/// A 4xx answer means the platform rejected the token and yields
/// `TokenValidity::Invalid`. Server errors and transport failures are
/// returned as errors so the caller never mistakes "unknown" for either
/// answer.
pub async fn validate_token(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    token: &str,
) -> Result<TokenValidity> {
    let response = client
        .get(endpoints.validate_url())
        .header(reqwest::header::AUTHORIZATION, format!("OAuth {token}"))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token validation request failed: {e}")))?;

    let status = response.status();
    if status.is_client_error() {
        debug!(%status, "platform rejected token");
        return Ok(TokenValidity::Invalid);
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Validation(format!(
            "validate endpoint returned {status}: {body}"
        )));
    }

    let body = response
        .json::<ValidateResponse>()
        .await
        .map_err(|e| Error::Validation(format!("invalid validate response: {e}")))?;

    Ok(TokenValidity::Valid {
        client_id: body.client_id,
        expires_in: body.expires_in,
    })
}

/// Obtain a new app access token with the client-credentials grant.
///
/// The grant is idempotent on the platform side, so callers may simply call
/// this again after a failure.
pub async fn request_app_token(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoints.token_url())
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "client_credentials"),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "client credentials rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenRequest(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenRequest(format!("invalid token response: {e}")))
}
