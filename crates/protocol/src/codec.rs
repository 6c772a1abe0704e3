//! Decode/encode the JSON wire envelope (spec §4.1).
//!
//! `decode` never panics and never lets an exception escape: every failure
//! mode is a typed [`DecodeError`] variant (testable property #1, spec §8).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::envelope::{
    AuthPayload, ChannelPayload, Endpoint, Envelope, FingerPayload, LocatePayload, MessageKind,
    Metadata, Payload, PingPongPayload, RequestPayload, TellPayload, WhoPayload,
    DEFAULT_MAX_FRAME_BYTES, PROTOCOL_VERSION,
};

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("not valid json: {0}")]
    NotJson(String),
    #[error("schema violation in field `{field}`: {reason}")]
    SchemaViolation { field: String, reason: String },
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("frame too large: {size} bytes exceeds max {max}")]
    TooLarge { size: usize, max: usize },
}

/// Raw wire shape: every field parses independently of the payload schema,
/// so a malformed payload doesn't stop us from reporting `id`/`type` in logs.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    version: String,
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: String,
    from: Endpoint,
    to: Endpoint,
    payload: serde_json::Value,
    metadata: Metadata,
}

fn violation(field: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::SchemaViolation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Decode and validate a byte frame into an [`Envelope`].
pub fn decode(bytes: &[u8], max_frame_bytes: usize) -> Result<Envelope, DecodeError> {
    if bytes.len() > max_frame_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }

    let raw: RawEnvelope =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::NotJson(e.to_string()))?;

    if raw.version != PROTOCOL_VERSION {
        return Err(violation(
            "version",
            format!("expected `{PROTOCOL_VERSION}`, got `{}`", raw.version),
        ));
    }
    if !raw.metadata.is_valid() {
        return Err(violation(
            "metadata",
            "priority must be 1..=10 and ttl must be 1..=3600",
        ));
    }

    let kind = match raw.kind.as_str() {
        "tell" => MessageKind::Tell,
        "emote" => MessageKind::Emote,
        "emoteto" => MessageKind::Emoteto,
        "channel" => MessageKind::Channel,
        "who" => MessageKind::Who,
        "finger" => MessageKind::Finger,
        "locate" => MessageKind::Locate,
        "presence" => MessageKind::Presence,
        "auth" => MessageKind::Auth,
        "ping" => MessageKind::Ping,
        "pong" => MessageKind::Pong,
        "error" => MessageKind::Error,
        "mudlist" => MessageKind::Mudlist,
        "channels" => MessageKind::Channels,
        other => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let payload = parse_payload(kind, &raw.payload)?;

    Ok(Envelope {
        version: raw.version,
        id: raw.id,
        timestamp: raw.timestamp,
        kind,
        from: raw.from,
        to: raw.to,
        payload,
        metadata: raw.metadata,
    })
}

fn parse_payload(kind: MessageKind, value: &serde_json::Value) -> Result<Payload, DecodeError> {
    match kind {
        MessageKind::Tell => {
            let p: TellPayload = from_value(value, "payload")?;
            let len = p.message.chars().count();
            if !(1..=4096).contains(&len) {
                return Err(violation("payload.message", "must be 1..4096 characters"));
            }
            Ok(Payload::Tell(p))
        },
        MessageKind::Emote | MessageKind::Emoteto => {
            let p: crate::envelope::EmotePayload = from_value(value, "payload")?;
            if p.action.is_empty() {
                return Err(violation("payload.action", "must not be empty"));
            }
            Ok(Payload::Emote(p))
        },
        MessageKind::Channel => {
            let p: ChannelPayload = from_value(value, "payload")?;
            if matches!(p.action, crate::envelope::ChannelAction::Message) && p.message.is_none() {
                return Err(violation(
                    "payload.message",
                    "required when action is `message`",
                ));
            }
            Ok(Payload::Channel(p))
        },
        MessageKind::Who => Ok(Payload::Who(from_value::<WhoPayload>(value, "payload")?)),
        MessageKind::Finger => Ok(Payload::Finger(from_value::<FingerPayload>(
            value, "payload",
        )?)),
        MessageKind::Locate => Ok(Payload::Locate(from_value::<LocatePayload>(
            value, "payload",
        )?)),
        MessageKind::Ping | MessageKind::Pong => Ok(Payload::PingPong(from_value::<
            PingPongPayload,
        >(value, "payload")?)),
        MessageKind::Auth => {
            let p: AuthPayload = from_value(value, "payload")?;
            Ok(Payload::Auth(p))
        },
        MessageKind::Error => Ok(Payload::Error(from_value(value, "payload")?)),
        MessageKind::Mudlist | MessageKind::Channels => Ok(Payload::Request(from_value::<
            RequestPayload,
        >(value, "payload")?)),
        MessageKind::Presence => Ok(Payload::Opaque(value.clone())),
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(
    value: &serde_json::Value,
    field: &str,
) -> Result<T, DecodeError> {
    serde_json::from_value(value.clone()).map_err(|e| violation(field, e.to_string()))
}

/// Serialize an envelope produced by this gateway. Always succeeds for
/// well-formed envelopes (spec §4.1 contract).
pub fn encode(envelope: &Envelope) -> String {
    let payload = payload_to_value(&envelope.payload);
    let value = serde_json::json!({
        "version": envelope.version,
        "id": envelope.id,
        "timestamp": envelope.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "type": envelope.kind.as_str(),
        "from": envelope.from,
        "to": envelope.to,
        "payload": payload,
        "metadata": envelope.metadata,
    });
    // `serde_json::json!` over already-Serialize pieces cannot fail.
    value.to_string()
}

fn payload_to_value(payload: &Payload) -> serde_json::Value {
    match payload {
        Payload::Tell(p) => serde_json::to_value(p),
        Payload::Emote(p) => serde_json::to_value(p),
        Payload::Channel(p) => serde_json::to_value(p),
        Payload::Who(p) => serde_json::to_value(p),
        Payload::Finger(p) => serde_json::to_value(p),
        Payload::Locate(p) => serde_json::to_value(p),
        Payload::PingPong(p) => serde_json::to_value(p),
        Payload::Auth(p) => serde_json::to_value(p),
        Payload::Error(p) => serde_json::to_value(p),
        Payload::Request(p) => serde_json::to_value(p),
        Payload::Opaque(v) => Ok(v.clone()),
    }
    .unwrap_or(serde_json::Value::Null)
}

/// TTL check (spec §4.1): expired frames are dropped silently on receipt.
pub fn is_expired(envelope: &Envelope, now: DateTime<Utc>) -> bool {
    let elapsed = now.signed_duration_since(envelope.timestamp);
    elapsed.num_seconds() > i64::from(envelope.metadata.ttl)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::envelope::{ChannelAction, Metadata};

    fn sample_tell_bytes() -> Vec<u8> {
        serde_json::json!({
            "version": "1.0",
            "id": Uuid::new_v4(),
            "timestamp": "2025-01-26T12:34:56.789Z",
            "type": "tell",
            "from": {"mud": "MudA", "user": "alice"},
            "to": {"mud": "MudB", "user": "bob"},
            "payload": {"message": "hi"},
            "metadata": {"priority": 5, "ttl": 300, "encoding": "utf-8", "language": "en"}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_valid_tell() {
        let env = decode(&sample_tell_bytes(), DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(env.kind, MessageKind::Tell);
        assert_eq!(env.from.mud, "MudA");
        match env.payload {
            Payload::Tell(p) => assert_eq!(p.message, "hi"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_json() {
        let err = decode(b"not json", DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::NotJson(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        let mut v: serde_json::Value = serde_json::from_slice(&sample_tell_bytes()).unwrap();
        v["type"] = serde_json::json!("smoke-signal");
        let err = decode(v.to_string().as_bytes(), DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(_)));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut v: serde_json::Value = serde_json::from_slice(&sample_tell_bytes()).unwrap();
        v["version"] = serde_json::json!("2.0");
        let err = decode(v.to_string().as_bytes(), DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaViolation { .. }));
    }

    #[test]
    fn rejects_oversized_frame() {
        let err = decode(&sample_tell_bytes(), 4).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { .. }));
    }

    #[test]
    fn rejects_empty_tell_message() {
        let mut v: serde_json::Value = serde_json::from_slice(&sample_tell_bytes()).unwrap();
        v["payload"]["message"] = serde_json::json!("");
        let err = decode(v.to_string().as_bytes(), DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaViolation { .. }));
    }

    #[test]
    fn channel_message_action_requires_message_field() {
        let mut v: serde_json::Value = serde_json::from_slice(&sample_tell_bytes()).unwrap();
        v["type"] = serde_json::json!("channel");
        v["payload"] = serde_json::json!({"channel": "ooc", "action": "message"});
        let err = decode(v.to_string().as_bytes(), DEFAULT_MAX_FRAME_BYTES).unwrap_err();
        assert!(matches!(err, DecodeError::SchemaViolation { .. }));
    }

    #[test]
    fn channel_join_does_not_require_message_field() {
        let mut v: serde_json::Value = serde_json::from_slice(&sample_tell_bytes()).unwrap();
        v["type"] = serde_json::json!("channel");
        v["payload"] = serde_json::json!({"channel": "ooc", "action": "join"});
        let env = decode(v.to_string().as_bytes(), DEFAULT_MAX_FRAME_BYTES).expect("decode");
        match env.payload {
            Payload::Channel(p) => assert_eq!(p.action, ChannelAction::Join),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn encode_round_trips_decode() {
        let bytes = sample_tell_bytes();
        let env = decode(&bytes, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        let re_encoded = encode(&env);
        let env2 = decode(re_encoded.as_bytes(), DEFAULT_MAX_FRAME_BYTES).expect("decode2");
        assert_eq!(env, env2);
    }

    #[test]
    fn ttl_expiry_detects_stale_frame() {
        let bytes = sample_tell_bytes();
        let env = decode(&bytes, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        let far_future = env.timestamp + chrono::Duration::seconds(3600);
        assert!(is_expired(&env, far_future));
        assert!(!is_expired(&env, env.timestamp));
    }

    #[test]
    fn metadata_validity() {
        let bad = Metadata {
            priority: 0,
            ttl: 10,
            encoding: "utf-8".into(),
            language: "en".into(),
        };
        assert!(!bad.is_valid());
    }
}
