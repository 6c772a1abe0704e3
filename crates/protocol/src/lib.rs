//! Wire protocol for the intermud gateway: envelope types, the JSON codec,
//! MUD name validation, and the stable error code table (spec §3, §4.1, §6).

pub mod codec;
pub mod envelope;
pub mod error_codes;
pub mod mudname;

pub use codec::{decode, encode, is_expired, DecodeError};
pub use envelope::{
    AuthPayload, ChannelAction, ChannelPayload, Endpoint, EmotePayload, Envelope, ErrorPayload,
    FingerPayload, LocatePayload, MessageKind, Metadata, Payload, PingPongPayload, RequestPayload,
    SortOrder, TellPayload, WhoPayload, BROADCAST_TARGET, DEFAULT_MAX_FRAME_BYTES, GATEWAY_TARGET,
    PROTOCOL_VERSION,
};
pub use mudname::{validate_name, suggest_name, MudNameError};
