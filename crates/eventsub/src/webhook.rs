//! Inbound webhook authenticity
//!
//! Twitch signs each delivery with
//! `sha256=hex(HMAC-SHA256(secret, message_id || timestamp || raw_body))`.
//! The body must be the exact bytes received; re-serialized JSON would not
//! match. The final comparison runs in constant time.

use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_MESSAGE_ID: &str = "twitch-eventsub-message-id";
pub const HEADER_TIMESTAMP: &str = "twitch-eventsub-message-timestamp";
pub const HEADER_SIGNATURE: &str = "twitch-eventsub-message-signature";
pub const HEADER_MESSAGE_TYPE: &str = "twitch-eventsub-message-type";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Declared kind of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// `webhook_callback_verification`: challenge handshake
    Verification,
    Notification,
    Revocation,
    /// Anything else, including a missing header (kept for logging)
    Other(String),
}

impl MessageType {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("webhook_callback_verification") => MessageType::Verification,
            Some("notification") => MessageType::Notification,
            Some("revocation") => MessageType::Revocation,
            Some(other) => MessageType::Other(other.to_string()),
            None => MessageType::Other(String::new()),
        }
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            MessageType::Verification => "verification",
            MessageType::Notification => "notification",
            MessageType::Revocation => "revocation",
            MessageType::Other(_) => "other",
        }
    }
}

/// The four EventSub headers, each absent if missing or not visible ASCII.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeHeaders {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub message_type: Option<String>,
}

impl EnvelopeHeaders {
    /// Header lookup is case-insensitive.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        Self {
            message_id: get(HEADER_MESSAGE_ID),
            timestamp: get(HEADER_TIMESTAMP),
            signature: get(HEADER_SIGNATURE),
            message_type: get(HEADER_MESSAGE_TYPE),
        }
    }

    pub fn kind(&self) -> MessageType {
        MessageType::from_header(self.message_type.as_deref())
    }
}

/// `sha256=<hex>` signature for the given parts.
///
/// `None` only if the HMAC cannot be keyed, which SHA-256 HMAC never refuses.
pub fn compute_signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Some(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Whether the delivery was signed with `secret`.
///
/// Missing id, timestamp or signature headers fail verification. The
/// comparison cost does not depend on where the first mismatching byte is.
pub fn verify(headers: &EnvelopeHeaders, body: &[u8], secret: &[u8]) -> bool {
    let (Some(id), Some(timestamp), Some(provided)) = (
        headers.message_id.as_deref(),
        headers.timestamp.as_deref(),
        headers.signature.as_deref(),
    ) else {
        return false;
    };

    let Some(expected) = compute_signature(secret, id, timestamp, body) else {
        return false;
    };
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderName, HeaderValue};

    const SECRET: &[u8] = b"s3cretvalue";
    const ID: &str = "e76c6bd4-55c9-4987-8304-da1588d8988b";
    const TS: &str = "2019-11-16T10:11:12.634234626Z";
    const BODY: &[u8] = br#"{"challenge":"abc123","subscription":{"type":"channel.follow"}}"#;

    fn signed() -> EnvelopeHeaders {
        EnvelopeHeaders {
            message_id: Some(ID.into()),
            timestamp: Some(TS.into()),
            signature: compute_signature(SECRET, ID, TS, BODY),
            message_type: Some("webhook_callback_verification".into()),
        }
    }

    #[test]
    fn signature_matches_independent_hmac() {
        let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
        let mut message = Vec::new();
        message.extend_from_slice(ID.as_bytes());
        message.extend_from_slice(TS.as_bytes());
        message.extend_from_slice(BODY);
        mac.update(&message);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(
            compute_signature(SECRET, ID, TS, BODY),
            Some(expected.clone())
        );
        assert_eq!(expected.len(), "sha256=".len() + 64);
    }

    #[test]
    fn correctly_signed_message_verifies() {
        assert!(verify(&signed(), BODY, SECRET));
    }

    #[test]
    fn wrong_secret_fails() {
        assert!(!verify(&signed(), BODY, b"another-secret"));
    }

    #[test]
    fn any_single_byte_change_fails() {
        let headers = signed();

        let mut body = BODY.to_vec();
        for i in [0, body.len() / 2, body.len() - 1] {
            body[i] ^= 0x01;
            assert!(!verify(&headers, &body, SECRET), "body byte {i}");
            body[i] ^= 0x01;
        }

        let mut bad_id = headers.clone();
        bad_id.message_id = Some(ID.replacen('e', "f", 1));
        assert!(!verify(&bad_id, BODY, SECRET));

        let mut bad_ts = headers.clone();
        bad_ts.timestamp = Some(TS.replace("2019", "2018"));
        assert!(!verify(&bad_ts, BODY, SECRET));

        let sig = headers.signature.clone().unwrap();
        for i in [0, 7, sig.len() - 1] {
            let mut bytes = sig.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mut bad_sig = headers.clone();
            bad_sig.signature = Some(String::from_utf8(bytes).unwrap());
            assert!(!verify(&bad_sig, BODY, SECRET), "signature byte {i}");
        }
    }

    #[test]
    fn truncated_or_uppercase_signature_fails() {
        let headers = signed();
        let sig = headers.signature.clone().unwrap();

        let mut truncated = headers.clone();
        truncated.signature = Some(sig[..sig.len() - 1].to_string());
        assert!(!verify(&truncated, BODY, SECRET));

        let mut upper = headers.clone();
        upper.signature = Some(sig.to_uppercase());
        assert!(!verify(&upper, BODY, SECRET));
    }

    #[test]
    fn missing_headers_fail_without_panicking() {
        let full = signed();

        let mut no_sig = full.clone();
        no_sig.signature = None;
        assert!(!verify(&no_sig, BODY, SECRET));

        let mut no_id = full.clone();
        no_id.message_id = None;
        assert!(!verify(&no_id, BODY, SECRET));

        let mut no_ts = full;
        no_ts.timestamp = None;
        assert!(!verify(&no_ts, BODY, SECRET));

        assert!(!verify(&EnvelopeHeaders::default(), b"", SECRET));
    }

    #[test]
    fn headers_are_read_case_insensitively() {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_bytes(b"Twitch-Eventsub-Message-Id").unwrap(),
            HeaderValue::from_static("abc"),
        );
        map.insert(
            HeaderName::from_bytes(b"TWITCH-EVENTSUB-MESSAGE-TYPE").unwrap(),
            HeaderValue::from_static("revocation"),
        );

        let headers = EnvelopeHeaders::from_headers(&map);
        assert_eq!(headers.message_id.as_deref(), Some("abc"));
        assert_eq!(headers.kind(), MessageType::Revocation);
        assert!(headers.signature.is_none());
    }

    #[test]
    fn message_types_parse() {
        assert_eq!(
            MessageType::from_header(Some("webhook_callback_verification")),
            MessageType::Verification
        );
        assert_eq!(
            MessageType::from_header(Some("notification")),
            MessageType::Notification
        );
        assert_eq!(
            MessageType::from_header(Some("revocation")),
            MessageType::Revocation
        );
        assert_eq!(
            MessageType::from_header(Some("Notification")),
            MessageType::Other("Notification".into())
        );
        assert_eq!(MessageType::from_header(None).label(), "other");
    }
}
