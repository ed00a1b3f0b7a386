//! Twitch endpoint locations

/// Base URL of the Twitch OAuth service (token issuance and validation)
pub const AUTH_BASE: &str = "https://id.twitch.tv/oauth2";

/// Base URL of the Helix API
pub const API_BASE: &str = "https://api.twitch.tv/helix";

/// Endpoint bases used for outbound calls.
///
/// Defaults point at production Twitch. Both are overridable from config so
/// tests (and the Twitch CLI mock server) can stand in for the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_base: String,
    pub api_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_base: AUTH_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }
}

impl Endpoints {
    /// `GET` here with `Authorization: OAuth <token>` to introspect a token.
    pub fn validate_url(&self) -> String {
        format!("{}/validate", self.auth_base.trim_end_matches('/'))
    }

    /// `POST` here to obtain a new token.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth_base.trim_end_matches('/'))
    }

    /// EventSub subscription collection (list, create, delete).
    pub fn subscriptions_url(&self) -> String {
        format!(
            "{}/eventsub/subscriptions",
            self.api_base.trim_end_matches('/')
        )
    }
}
