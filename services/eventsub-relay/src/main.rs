//! Twitch EventSub relay
//!
//! Single-binary service that:
//! 1. Reconciles the channel's EventSub subscriptions against a desired list
//! 2. Receives signed webhook deliveries on a public (HTTPS) listener
//! 3. Answers callback verification challenges
//! 4. Relays notifications to one local WebSocket consumer

mod config;
mod error;
mod metrics;
mod relay;
mod tls;
mod webhook;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventsub::{HelixClient, Reconciler, SubscriptionTarget, spawn_reconcile_task};
use metrics_exporter_prometheus::PrometheusHandle;
use twitch_auth::{Endpoints, TokenManager, TokenStore};

use crate::config::{Config, TwitchConfig};
use crate::relay::{RelayChannel, build_relay_router};
use crate::webhook::WebhookState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    webhook: WebhookState,
    prometheus: PrometheusHandle,
}

/// Build the public router: webhook callback, greeting and metrics.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/eventsub", post(eventsub_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting eventsub-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        relay_addr = %config.relay.listen_addr,
        channel_id = %config.twitch.channel_id,
        callback_url = %config.twitch.callback_url,
        tls = config.server.tls_enabled(),
        "configuration loaded"
    );

    if !config.relay.listen_addr.ip().is_loopback() {
        warn!(
            relay_addr = %config.relay.listen_addr,
            "relay listener is not on loopback; any client that can reach it receives notifications"
        );
    }

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.reconcile.request_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let tokens = Arc::new(TokenManager::new(
        TokenStore::new(config.twitch.token_file.clone()),
        http,
        endpoints(&config.twitch),
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(HelixClient::new(tokens.clone())),
        tokens,
        SubscriptionTarget {
            channel_id: config.twitch.channel_id.clone(),
            callback_url: config.twitch.callback_url.clone(),
            secret: config.twitch.webhook_secret.clone(),
        },
    ));

    let relay = Arc::new(RelayChannel::new());
    let app = build_router(
        AppState {
            webhook: WebhookState {
                secret: config.twitch.webhook_secret.clone(),
                relay: relay.clone(),
            },
            prometheus: prometheus_handle,
        },
        config.server.max_connections,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Listeners come up before reconciliation: creating a subscription makes
    // the platform call back with a verification challenge.
    let webhook_server = if config.server.tls_enabled() {
        let tls = tls::load_rustls(&config.server)
            .await
            .context("failed to load TLS certificate")?;
        serve_https(config.server.listen_addr, tls, app, shutdown_rx.clone()).await?
    } else {
        serve_http(config.server.listen_addr, app, shutdown_rx.clone()).await?
    };
    let relay_server = serve_http(
        config.relay.listen_addr,
        build_relay_router(relay),
        shutdown_rx,
    )
    .await?;

    info!(
        addr = %config.server.listen_addr,
        relay_addr = %config.relay.listen_addr,
        "accepting webhook deliveries"
    );

    // Startup reconciliation runs in the background; failure never stops
    // the listeners.
    let startup = reconciler.clone();
    let desired_path = config.twitch.subscriptions_file.clone();
    tokio::spawn(async move {
        run_subscription_check(&startup, &desired_path).await;
    });

    let periodic = config.reconcile.interval_secs.map(|secs| {
        info!(interval_secs = secs, "periodic subscription check enabled");
        spawn_reconcile_task(
            reconciler,
            config.twitch.subscriptions_file.clone(),
            Duration::from_secs(secs),
        )
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Some(task) = periodic {
        task.abort();
    }

    // The drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, async {
        (webhook_server.await, relay_server.await)
    })
    .await
    {
        Ok((webhook, relay)) => {
            log_server_exit("webhook", webhook);
            log_server_exit("relay", relay);
            info!("all in-flight requests drained");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Platform endpoints with config overrides applied.
fn endpoints(twitch: &TwitchConfig) -> Endpoints {
    let mut endpoints = Endpoints::default();
    if let Some(api_base) = &twitch.api_base {
        endpoints.api_base = api_base.clone();
    }
    if let Some(auth_base) = &twitch.auth_base {
        endpoints.auth_base = auth_base.clone();
    }
    endpoints
}

/// One reconciliation pass with its outcome logged and counted.
async fn run_subscription_check(reconciler: &Reconciler, desired_path: &Path) {
    match reconciler.check(desired_path).await {
        Ok(report) if report.is_clean() => metrics::record_reconcile("clean"),
        Ok(report) => {
            for failure in &report.failures {
                warn!(
                    operation = ?failure.operation,
                    target = %failure.target,
                    error = %failure.error,
                    "subscription change failed"
                );
            }
            metrics::record_reconcile("partial");
        }
        Err(e) => {
            error!(error = %e, "subscription check failed");
            metrics::record_reconcile("failed");
        }
    }
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Bind and serve plain HTTP until shutdown is requested.
async fn serve_http(
    addr: SocketAddr,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| error::Error::Bind { addr, source })?;

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_requested(shutdown))
            .await
    }))
}

/// Serve HTTPS until shutdown is requested. Returns once the socket is bound.
async fn serve_https(
    addr: SocketAddr,
    tls: axum_server::tls_rustls::RustlsConfig,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let handle = axum_server::Handle::new();

    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown_requested(shutdown).await;
        drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
    });

    let server = tokio::spawn(
        axum_server::bind_rustls(addr, tls)
            .handle(handle.clone())
            .serve(app.into_make_service()),
    );

    if handle.listening().await.is_none() {
        // The server exits with the bind error
        let source = match server.await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => std::io::Error::other("listener closed before binding"),
            Err(e) => std::io::Error::other(e),
        };
        return Err(error::Error::Bind { addr, source }.into());
    }
    Ok(server)
}

fn log_server_exit(
    name: &str,
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(server = name, error = %e, "server error during shutdown"),
        Err(e) => error!(server = name, error = %e, "server task panicked"),
    }
}

async fn root_handler() -> &'static str {
    "Hello there"
}

/// EventSub callback. The body is taken raw: the signature covers the exact
/// bytes received.
async fn eventsub_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    webhook::handle_delivery(&state.webhook, &headers, &body).await
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::Secret;
    use serde_json::Value;
    use tower::ServiceExt;

    const SECRET: &str = "s3cretvalue";
    const MESSAGE_ID: &str = "e76c6bd4-55c9-4987-8304-da1588d8988b";
    const TIMESTAMP: &str = "2019-11-16T10:11:12.634234626Z";

    /// PrometheusHandle without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn test_app() -> (Router, Arc<RelayChannel>) {
        let relay = Arc::new(RelayChannel::new());
        let state = AppState {
            webhook: WebhookState {
                secret: Secret::new(SECRET.into()),
                relay: relay.clone(),
            },
            prometheus: test_prometheus_handle(),
        };
        (build_router(state, 1000), relay)
    }

    fn delivery(message_type: &str, body: &str, signature: Option<String>) -> Request<Body> {
        let signature = signature.unwrap_or_else(|| {
            eventsub::compute_signature(SECRET.as_bytes(), MESSAGE_ID, TIMESTAMP, body.as_bytes())
                .unwrap()
        });
        Request::builder()
            .method("POST")
            .uri("/eventsub")
            .header("content-type", "application/json")
            .header("Twitch-Eventsub-Message-Id", MESSAGE_ID)
            .header("Twitch-Eventsub-Message-Timestamp", TIMESTAMP)
            .header("Twitch-Eventsub-Message-Signature", signature)
            .header("Twitch-Eventsub-Message-Type", message_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn root_greets() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Hello there");
    }

    #[tokio::test]
    async fn verification_echoes_challenge() {
        let (app, _) = test_app();
        let body = r#"{"challenge":"abc123","subscription":{"type":"channel.follow"}}"#;

        let response = app
            .oneshot(delivery("webhook_callback_verification", body, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_owned();
        assert!(content_type.starts_with("text/plain"), "got: {content_type}");
        assert_eq!(body_string(response).await, "abc123");
    }

    #[tokio::test]
    async fn bad_signature_is_forbidden_for_every_type() {
        let body = r#"{"challenge":"abc123","subscription":{"type":"channel.follow"}}"#;
        for message_type in ["webhook_callback_verification", "notification", "revocation"] {
            let (app, relay) = test_app();
            let mut consumer = relay.attach().await;
            consumer.rx.recv().await.unwrap();

            let response = app
                .oneshot(delivery(message_type, body, Some("sha256=deadbeef".into())))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{message_type}");
            assert!(body_string(response).await.is_empty());
            assert!(consumer.rx.try_recv().is_err(), "nothing may be relayed");
        }
    }

    #[tokio::test]
    async fn missing_signature_headers_are_forbidden() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/eventsub")
                    .header("Twitch-Eventsub-Message-Type", "notification")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn signed_malformed_json_is_bad_request() {
        let (app, _) = test_app();
        let response = app
            .oneshot(delivery("notification", "{not json", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notification_is_relayed_verbatim() {
        let (app, relay) = test_app();
        let mut consumer = relay.attach().await;
        consumer.rx.recv().await.unwrap();

        let body = r#"{"subscription":{"type":"channel.follow"},"event":{"user_name":"viewer"}}"#;
        let response = app
            .oneshot(delivery("notification", body, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let frame = consumer.rx.recv().await.unwrap();
        let frame: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["type"], "twitchData");
        assert_eq!(frame["data"], serde_json::from_str::<Value>(body).unwrap());
    }

    #[tokio::test]
    async fn revocation_and_unknown_types_are_acknowledged() {
        let body = r#"{"subscription":{"type":"channel.follow","status":"authorization_revoked","condition":{"broadcaster_user_id":"1234"}}}"#;
        for message_type in ["revocation", "something_new"] {
            let (app, relay) = test_app();
            let mut consumer = relay.attach().await;
            consumer.rx.recv().await.unwrap();

            let response = app
                .oneshot(delivery(message_type, body, None))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NO_CONTENT, "{message_type}");
            assert!(consumer.rx.try_recv().is_err(), "{message_type} is not relayed");
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn get_on_callback_is_not_allowed() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/eventsub")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn http_listener_drains_on_shutdown() {
        let (app, _) = test_app();
        let (tx, rx) = watch::channel(false);
        let server = serve_http("127.0.0.1:0".parse().unwrap(), app, rx)
            .await
            .unwrap();

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server should stop after shutdown is requested");
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (app, _) = test_app();
        let (_tx, rx) = watch::channel(false);

        let err = serve_http(addr, app, rx).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()), "got: {err}");
    }

    #[test]
    fn endpoint_overrides_apply() {
        let twitch: TwitchConfig = toml::from_str(
            r#"
client_id = "abc"
channel_id = "1"
callback_url = "https://example.com/eventsub"
api_base = "http://127.0.0.1:8080/mock"
"#,
        )
        .unwrap();

        let endpoints = endpoints(&twitch);
        assert_eq!(endpoints.api_base, "http://127.0.0.1:8080/mock");
        assert_eq!(endpoints.auth_base, twitch_auth::constants::AUTH_BASE);
    }
}
