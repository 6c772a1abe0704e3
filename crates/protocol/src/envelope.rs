//! Envelope, endpoint, metadata, and payload types (spec §3, §4.1, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROTOCOL_VERSION: &str = "1.0";
pub const DEFAULT_MAX_FRAME_BYTES: usize = 65_536;

pub const BROADCAST_TARGET: &str = "*";
pub const GATEWAY_TARGET: &str = "Gateway";

/// Closed set of frame kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Tell,
    Emote,
    Emoteto,
    Channel,
    Who,
    Finger,
    Locate,
    Presence,
    Auth,
    Ping,
    Pong,
    Error,
    Mudlist,
    Channels,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tell => "tell",
            Self::Emote => "emote",
            Self::Emoteto => "emoteto",
            Self::Channel => "channel",
            Self::Who => "who",
            Self::Finger => "finger",
            Self::Locate => "locate",
            Self::Presence => "presence",
            Self::Auth => "auth",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Mudlist => "mudlist",
            Self::Channels => "channels",
        }
    }
}

/// `{mud, user?, channel?, displayName?}` — names one side of a routed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub mud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Endpoint {
    pub fn for_mud(mud: impl Into<String>) -> Self {
        Self {
            mud: mud.into(),
            user: None,
            channel: None,
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub priority: u8,
    pub ttl: u32,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Metadata {
    pub fn is_valid(&self) -> bool {
        (1..=10).contains(&self.priority) && (1..=3600).contains(&self.ttl)
    }
}

// ── Payload schemas (spec §4.1) ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TellPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotePayload {
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelAction {
    Message,
    Join,
    Leave,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub channel: String,
    pub action: ChannelAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Alpha,
    Idle,
    Level,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhoPayload {
    pub request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerPayload {
    pub user: String,
    pub request: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatePayload {
    pub user: String,
    pub request: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPongPayload {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    #[serde(rename = "mudName")]
    pub mud_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: crate::error_codes::GatewayErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub request: bool,
}

/// Kind-specific payload, validated exhaustively per spec §4.1. Gateway
/// synthesized replies (who/mudlist/channels/locate responses, auth-ok,
/// pong) are built ad hoc as `serde_json::Value` in the gateway crate and
/// wrapped via [`crate::Envelope::reply`]; this enum only represents the
/// schema the codec accepts and validates on *decode*.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Tell(TellPayload),
    Emote(EmotePayload),
    Channel(ChannelPayload),
    Who(WhoPayload),
    Finger(FingerPayload),
    Locate(LocatePayload),
    PingPong(PingPongPayload),
    Auth(AuthPayload),
    Error(ErrorPayload),
    Request(RequestPayload),
    /// Presence payloads are opaque to the gateway (carried, not validated
    /// beyond being a JSON object), matching their "out of scope" status.
    Opaque(serde_json::Value),
}

/// The full, validated wire envelope (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub from: Endpoint,
    pub to: Endpoint,
    pub payload: Payload,
    pub metadata: Metadata,
}

impl Envelope {
    /// Build a gateway-synthesized reply envelope: `from = Gateway`,
    /// `to = original sender`, copying the sender's priority (spec §4.4).
    pub fn gateway_reply(to: Endpoint, kind: MessageKind, payload: Payload, priority: u8) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            from: Endpoint::for_mud(GATEWAY_TARGET),
            to,
            payload,
            metadata: Metadata {
                priority,
                ttl: 300,
                encoding: default_encoding(),
                language: default_language(),
            },
        }
    }

    pub fn error_reply(to: Endpoint, code: crate::error_codes::GatewayErrorCode, message: impl Into<String>) -> Self {
        Self::gateway_reply(
            to,
            MessageKind::Error,
            Payload::Error(ErrorPayload {
                code,
                message: message.into(),
                details: None,
            }),
            10,
        )
    }

    pub fn error_reply_with_details(
        to: Endpoint,
        code: crate::error_codes::GatewayErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::gateway_reply(
            to,
            MessageKind::Error,
            Payload::Error(ErrorPayload {
                code,
                message: message.into(),
                details: Some(details),
            }),
            10,
        )
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.mud == BROADCAST_TARGET
    }

    pub fn is_gateway_addressed(&self) -> bool {
        self.to.mud == GATEWAY_TARGET
    }
}
