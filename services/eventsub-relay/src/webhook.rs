//! EventSub webhook handling
//!
//! Signature first, then JSON, then dispatch on the declared message type.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::Secret;
use eventsub::{EnvelopeHeaders, MessageType};
use serde_json::Value;
use tracing::{info, warn};

use crate::metrics;
use crate::relay::RelayChannel;

/// What the webhook handler needs: the signing secret and the relay.
#[derive(Clone)]
pub struct WebhookState {
    pub secret: Secret<String>,
    pub relay: Arc<RelayChannel>,
}

/// Verify, parse and dispatch one delivery. `body` must be the raw bytes.
pub async fn handle_delivery(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Response {
    let started = Instant::now();
    let envelope = EnvelopeHeaders::from_headers(headers);
    let kind = envelope.kind();

    let response = dispatch(state, &envelope, &kind, body).await;

    metrics::record_message(
        kind.label(),
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn dispatch(
    state: &WebhookState,
    envelope: &EnvelopeHeaders,
    kind: &MessageType,
    body: &[u8],
) -> Response {
    if !eventsub::verify(envelope, body, state.secret.expose().as_bytes()) {
        warn!("rejected webhook delivery with invalid signature");
        metrics::record_signature_failure();
        return StatusCode::FORBIDDEN.into_response();
    }

    let message: Value = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, message_id = ?envelope.message_id, "webhook body is not valid JSON");
            return (StatusCode::BAD_REQUEST, "invalid JSON body").into_response();
        }
    };

    let subscription_type = message
        .pointer("/subscription/type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();

    match kind {
        MessageType::Verification => {
            let Some(challenge) = message.get("challenge").and_then(Value::as_str) else {
                warn!(%subscription_type, "verification request without challenge");
                return (StatusCode::BAD_REQUEST, "missing challenge").into_response();
            };
            info!(%subscription_type, "answered callback verification challenge");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                challenge.to_owned(),
            )
                .into_response()
        }
        MessageType::Notification => {
            info!(
                %subscription_type,
                message_id = ?envelope.message_id,
                "received notification"
            );
            if !state.relay.forward(message).await {
                info!(%subscription_type, "notification not relayed, no consumer attached");
            }
            StatusCode::NO_CONTENT.into_response()
        }
        MessageType::Revocation => {
            let (status, condition) = revocation_details(&message);
            warn!(
                %subscription_type,
                %status,
                %condition,
                "subscription revoked by platform"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        MessageType::Other(declared) => {
            info!(message_type = %declared, %subscription_type, "unknown message type");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// `status` and `condition` of a revoked subscription, `null` when absent.
fn revocation_details(message: &Value) -> (&Value, &Value) {
    let field = |name: &str| {
        message
            .get("subscription")
            .and_then(|s| s.get(name))
            .unwrap_or(&Value::Null)
    };
    (field("status"), field("condition"))
}
