//! Channel membership, moderation, and history (spec §4.5).

pub mod error;
pub mod service;

pub use error::{Error, Result};
pub use service::{ChannelPost, ChannelService, ChannelSummary, HistoryAction, HistoryEntry};
