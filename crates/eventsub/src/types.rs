//! EventSub subscription model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription type whose condition keys on the raid *target*.
pub const CHANNEL_RAID: &str = "channel.raid";

/// Subscription status as reported by Helix.
///
/// Statuses Twitch adds later deserialize as `Unknown` and are treated as
/// healthy (never deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Enabled,
    WebhookCallbackVerificationPending,
    WebhookCallbackVerificationFailed,
    NotificationFailuresExceeded,
    AuthorizationRevoked,
    ModeratorRemoved,
    UserRemoved,
    VersionRemoved,
    BetaMaintenance,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Statuses the reconciler deletes so the subscription can be recreated.
    ///
    /// `WebhookCallbackVerificationPending` is included: a subscription still
    /// pending at startup is recreated rather than waited on.
    pub fn is_terminal_failure(self) -> bool {
        match self {
            SubscriptionStatus::NotificationFailuresExceeded
            | SubscriptionStatus::WebhookCallbackVerificationFailed
            | SubscriptionStatus::AuthorizationRevoked
            | SubscriptionStatus::WebhookCallbackVerificationPending
            | SubscriptionStatus::UserRemoved => true,
            SubscriptionStatus::Enabled
            | SubscriptionStatus::ModeratorRemoved
            | SubscriptionStatus::VersionRemoved
            | SubscriptionStatus::BetaMaintenance
            | SubscriptionStatus::Unknown => false,
        }
    }
}

/// Delivery transport of a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transport {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    /// Only sent on create; Helix never echoes it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A platform-side EventSub subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub condition: BTreeMap<String, Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub transport: Option<Transport>,
}

/// One page of `GET /eventsub/subscriptions`.
#[derive(Debug, Deserialize)]
pub struct SubscriptionPage {
    pub data: Vec<Subscription>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Body of `POST /eventsub/subscriptions`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateSubscription {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub condition: BTreeMap<String, Value>,
    pub transport: Transport,
}

/// Build the create request for one subscription type.
///
/// The condition keys on `broadcaster_user_id`, except `channel.raid`, which
/// keys on `to_broadcaster_user_id` so the relay hears about raids *into*
/// the channel.
pub fn build_subscription(
    kind: &str,
    channel_id: &str,
    callback_url: &str,
    secret: &str,
) -> CreateSubscription {
    let condition_key = if kind == CHANNEL_RAID {
        "to_broadcaster_user_id"
    } else {
        "broadcaster_user_id"
    };

    let mut condition = BTreeMap::new();
    condition.insert(
        condition_key.to_string(),
        Value::String(channel_id.to_string()),
    );

    CreateSubscription {
        kind: kind.to_string(),
        version: "1".to_string(),
        condition,
        transport: Transport {
            method: "webhook".to_string(),
            callback: Some(callback_url.to_string()),
            secret: Some(secret.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_failure_set_is_exact() {
        use SubscriptionStatus::*;
        let terminal = [
            NotificationFailuresExceeded,
            WebhookCallbackVerificationFailed,
            AuthorizationRevoked,
            WebhookCallbackVerificationPending,
            UserRemoved,
        ];
        let healthy = [
            Enabled,
            ModeratorRemoved,
            VersionRemoved,
            BetaMaintenance,
            Unknown,
        ];
        for status in terminal {
            assert!(status.is_terminal_failure(), "{status:?} must be terminal");
        }
        for status in healthy {
            assert!(!status.is_terminal_failure(), "{status:?} must not be terminal");
        }
    }

    #[test]
    fn status_parses_snake_case_and_unknown() {
        let status: SubscriptionStatus =
            serde_json::from_str("\"webhook_callback_verification_pending\"").unwrap();
        assert_eq!(status, SubscriptionStatus::WebhookCallbackVerificationPending);

        let status: SubscriptionStatus = serde_json::from_str("\"user_removed\"").unwrap();
        assert_eq!(status, SubscriptionStatus::UserRemoved);

        let status: SubscriptionStatus =
            serde_json::from_str("\"some_future_status\"").unwrap();
        assert_eq!(status, SubscriptionStatus::Unknown);
    }

    #[test]
    fn helix_page_deserializes() {
        let json = r#"{
            "data": [{
                "id": "26b1c993-bfcf-44d9-b876-379dacafe75a",
                "status": "enabled",
                "type": "channel.follow",
                "version": "1",
                "condition": {"broadcaster_user_id": "1234"},
                "created_at": "2020-11-10T14:32:18.730260295Z",
                "transport": {"method": "webhook", "callback": "https://example.com/eventsub"},
                "cost": 1
            }],
            "total": 1,
            "total_cost": 1,
            "max_total_cost": 10000,
            "pagination": {}
        }"#;
        let page: SubscriptionPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.total, 1);
        assert!(page.pagination.cursor.is_none());
        let sub = &page.data[0];
        assert_eq!(sub.kind, "channel.follow");
        assert_eq!(sub.status, SubscriptionStatus::Enabled);
        assert_eq!(sub.condition["broadcaster_user_id"], "1234");
    }

    #[test]
    fn default_condition_keys_on_broadcaster() {
        let body = build_subscription(
            "channel.follow",
            "1234",
            "https://example.com/eventsub",
            "s3cretvalue",
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "channel.follow",
                "version": "1",
                "condition": {"broadcaster_user_id": "1234"},
                "transport": {
                    "method": "webhook",
                    "callback": "https://example.com/eventsub",
                    "secret": "s3cretvalue"
                }
            })
        );
    }

    #[test]
    fn raid_condition_keys_on_target() {
        let body = build_subscription(
            "channel.raid",
            "1234",
            "https://example.com/eventsub",
            "s3cretvalue",
        );
        assert_eq!(body.condition.len(), 1);
        assert_eq!(body.condition["to_broadcaster_user_id"], "1234");
        assert!(!body.condition.contains_key("broadcaster_user_id"));
    }
}
