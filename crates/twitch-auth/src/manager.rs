//! App token lifecycle
//!
//! `TokenManager` is the single owner of the token file. Everything that
//! needs the token (the Helix client, the reconciler) goes through it, so the
//! read / validate / replace contract lives in one place.

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::Endpoints;
use crate::credentials::TokenStore;
use crate::error::Result;
use crate::token::{TokenValidity, request_app_token, validate_token};

/// Reads, validates and replaces the app access token.
pub struct TokenManager {
    store: TokenStore,
    http: reqwest::Client,
    endpoints: Endpoints,
    client_id: String,
    client_secret: Secret<String>,
    /// Serializes refreshes so two callers never interleave token file writes.
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        store: TokenStore,
        http: reqwest::Client,
        endpoints: Endpoints,
        client_id: String,
        client_secret: Secret<String>,
    ) -> Self {
        Self {
            store,
            http,
            endpoints,
            client_id,
            client_secret,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Current token from storage. Fails if the file is missing or unreadable.
    pub async fn get_token(&self) -> Result<Secret<String>> {
        self.store.read().await
    }

    /// Whether the stored token is still accepted by the platform.
    ///
    /// A missing token file is an error, not "invalid": there is no token to
    /// validate and the caller decides whether to bootstrap one.
    pub async fn is_token_valid(&self) -> Result<bool> {
        let token = self.get_token().await?;
        let validity = validate_token(&self.http, &self.endpoints, token.expose()).await?;
        match &validity {
            TokenValidity::Valid { client_id, .. } if client_id != &self.client_id => {
                // Helix rejects a token sent with another application's Client-Id
                warn!(
                    token_client_id = %client_id,
                    configured_client_id = %self.client_id,
                    "stored token was issued to a different client id"
                );
                Ok(false)
            }
            TokenValidity::Valid { expires_in, .. } => {
                debug!(expires_in, "token is valid");
                Ok(true)
            }
            TokenValidity::Invalid => Ok(false),
        }
    }

    /// Request a new app token, persist it and return it.
    pub async fn refresh_token(&self) -> Result<Secret<String>> {
        let _guard = self.refresh_lock.lock().await;

        let response = request_app_token(
            &self.http,
            &self.endpoints,
            &self.client_id,
            self.client_secret.expose(),
        )
        .await?;

        self.store.write(&response.access_token).await?;
        info!(
            expires_in = response.expires_in,
            path = %self.store.path().display(),
            "stored new app access token"
        );
        Ok(Secret::new(response.access_token))
    }

    /// Validate the token and refresh it if the platform rejects it or none
    /// is stored yet. Returns `true` when a refresh happened.
    pub async fn ensure_valid_token(&self) -> Result<bool> {
        match self.is_token_valid().await {
            Ok(true) => Ok(false),
            Ok(false) => {
                warn!("app access token rejected by platform, requesting a new one");
                self.refresh_token().await?;
                Ok(true)
            }
            Err(crate::Error::NotFound(msg)) => {
                info!(reason = %msg, "no stored app access token, requesting one");
                self.refresh_token().await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}
