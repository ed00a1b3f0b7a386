//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (client secret, webhook secret) come from the environment or from
//! files named in the config, never from the TOML itself.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding the application client secret
pub const CLIENT_SECRET_ENV: &str = "TWITCH_CLIENT_SECRET";
/// Env var holding the webhook signing secret
pub const WEBHOOK_SECRET_ENV: &str = "EVENTSUB_SECRET";

/// Platform limits on the webhook secret length
const WEBHOOK_SECRET_MIN: usize = 10;
const WEBHOOK_SECRET_MAX: usize = 100;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Application identity, target channel and subscription inputs
#[derive(Debug, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub channel_id: String,
    /// Public HTTPS URL the platform delivers to
    pub callback_url: String,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_subscriptions_file")]
    pub subscriptions_file: PathBuf,
    #[serde(skip)]
    pub client_secret: Secret<String>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub webhook_secret: Secret<String>,
    #[serde(default)]
    pub webhook_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub auth_base: Option<String>,
}

/// Public webhook listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// PEM certificate; with `key_file` switches the listener to HTTPS
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Intermediate chain appended after `cert_file`
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Local WebSocket relay listener
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_addr")]
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileConfig {
    /// Timeout for every outbound platform call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Re-run reconciliation on this period; unset means startup only
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cert_file: None,
            key_file: None,
            ca_file: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_relay_addr(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            interval_secs: None,
        }
    }
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.txt")
}

fn default_subscriptions_file() -> PathBuf {
    PathBuf::from("subscriptions.json")
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

fn default_relay_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3002))
}

fn default_max_connections() -> usize {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.cert_file.is_some()
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, for each secret:
    /// 1. env var (`TWITCH_CLIENT_SECRET` / `EVENTSUB_SECRET`)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.twitch.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        if config.twitch.channel_id.trim().is_empty() {
            return Err(common::Error::Config("channel_id must not be empty".into()));
        }

        // The platform only delivers to HTTPS callbacks
        if !config.twitch.callback_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "callback_url must start with https://, got: {}",
                config.twitch.callback_url
            )));
        }

        for (name, base) in [
            ("api_base", &config.twitch.api_base),
            ("auth_base", &config.twitch.auth_base),
        ] {
            if let Some(base) = base
                && !base.starts_with("http://")
                && !base.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {base}"
                )));
            }
        }

        if config.server.cert_file.is_some() != config.server.key_file.is_some() {
            return Err(common::Error::Config(
                "cert_file and key_file must be set together".into(),
            ));
        }
        if config.server.ca_file.is_some() && config.server.cert_file.is_none() {
            return Err(common::Error::Config(
                "ca_file requires cert_file and key_file".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.reconcile.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if config.reconcile.interval_secs == Some(0) {
            return Err(common::Error::Config(
                "interval_secs must be greater than 0 when set".into(),
            ));
        }

        config.twitch.client_secret = resolve_secret(
            CLIENT_SECRET_ENV,
            config.twitch.client_secret_file.as_deref(),
            "client_secret_file",
        )?;
        config.twitch.webhook_secret = resolve_secret(
            WEBHOOK_SECRET_ENV,
            config.twitch.webhook_secret_file.as_deref(),
            "webhook_secret_file",
        )?;

        let secret_len = config.twitch.webhook_secret.expose().chars().count();
        if !(WEBHOOK_SECRET_MIN..=WEBHOOK_SECRET_MAX).contains(&secret_len) {
            return Err(common::Error::Config(format!(
                "webhook secret must be {WEBHOOK_SECRET_MIN}-{WEBHOOK_SECRET_MAX} characters, got {secret_len}"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("eventsub-relay.toml")
    }
}

/// Env var wins over file; an empty value counts as unset.
fn resolve_secret(
    env: &'static str,
    file: Option<&Path>,
    file_option: &'static str,
) -> common::Result<Secret<String>> {
    if let Ok(value) = std::env::var(env) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }

    if let Some(file) = file {
        let value = std::fs::read_to_string(file).map_err(|e| {
            common::Error::Config(format!(
                "failed to read {file_option} {}: {e}",
                file.display()
            ))
        })?;
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
    }

    Err(common::Error::MissingSecret(env))
}
