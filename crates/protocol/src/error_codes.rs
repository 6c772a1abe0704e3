//! Wire-visible error taxonomy (spec §7), as a typed enum mapped to the
//! stable integer codes carried in `error` frames.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorCode {
    InvalidMessage,
    AuthFailed,
    Unauthorized,
    MudNotFound,
    UserNotFound,
    ChannelNotFound,
    RateLimited,
    InternalError,
    ProtocolError,
    UnsupportedVersion,
    MessageTooLarge,
    /// A code outside the known set. Kept so an `error` frame with a
    /// foreign or future code still decodes instead of failing the frame.
    Other(u32),
}

impl GatewayErrorCode {
    pub const fn code(self) -> u32 {
        match self {
            Self::InvalidMessage => 1000,
            Self::AuthFailed => 1001,
            Self::Unauthorized => 1002,
            Self::MudNotFound => 1003,
            Self::UserNotFound => 1004,
            Self::ChannelNotFound => 1005,
            Self::RateLimited => 1006,
            Self::InternalError => 1007,
            Self::ProtocolError => 1008,
            Self::UnsupportedVersion => 1009,
            Self::MessageTooLarge => 1010,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            1000 => Self::InvalidMessage,
            1001 => Self::AuthFailed,
            1002 => Self::Unauthorized,
            1003 => Self::MudNotFound,
            1004 => Self::UserNotFound,
            1005 => Self::ChannelNotFound,
            1006 => Self::RateLimited,
            1007 => Self::InternalError,
            1008 => Self::ProtocolError,
            1009 => Self::UnsupportedVersion,
            1010 => Self::MessageTooLarge,
            other => Self::Other(other),
        }
    }
}

impl From<GatewayErrorCode> for u32 {
    fn from(value: GatewayErrorCode) -> Self {
        value.code()
    }
}

impl Serialize for GatewayErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

impl<'de> Deserialize<'de> for GatewayErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_code(u32::deserialize(deserializer)?))
    }
}

pub const INVALID_MESSAGE: GatewayErrorCode = GatewayErrorCode::InvalidMessage;
pub const AUTH_FAILED: GatewayErrorCode = GatewayErrorCode::AuthFailed;
pub const UNAUTHORIZED: GatewayErrorCode = GatewayErrorCode::Unauthorized;
pub const MUD_NOT_FOUND: GatewayErrorCode = GatewayErrorCode::MudNotFound;
pub const USER_NOT_FOUND: GatewayErrorCode = GatewayErrorCode::UserNotFound;
pub const CHANNEL_NOT_FOUND: GatewayErrorCode = GatewayErrorCode::ChannelNotFound;
pub const RATE_LIMITED: GatewayErrorCode = GatewayErrorCode::RateLimited;
pub const INTERNAL_ERROR: GatewayErrorCode = GatewayErrorCode::InternalError;
pub const PROTOCOL_ERROR: GatewayErrorCode = GatewayErrorCode::ProtocolError;
pub const UNSUPPORTED_VERSION: GatewayErrorCode = GatewayErrorCode::UnsupportedVersion;
pub const MESSAGE_TOO_LARGE: GatewayErrorCode = GatewayErrorCode::MessageTooLarge;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let json = serde_json::to_string(&GatewayErrorCode::MudNotFound).unwrap();
        assert_eq!(json, "1003");
        let back: GatewayErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GatewayErrorCode::MudNotFound);
    }

    #[test]
    fn unknown_code_round_trips_as_other() {
        let back: GatewayErrorCode = serde_json::from_str("4242").unwrap();
        assert_eq!(back, GatewayErrorCode::Other(4242));
        assert_eq!(back.code(), 4242);
    }
}
