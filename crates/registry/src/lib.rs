//! Registry adapter (spec §4.7): a replaceable, TTL-bearing key/value, set,
//! and list store backing presence, mudlist, and channel membership.
//!
//! The gateway treats the registry as a *cache*, never the source of
//! truth for a live connection: every read here can return stale or
//! missing data and the caller must fall back to in-memory connection
//! state. The default backend is SQLite, grounded in the teacher's
//! session state store, but any [`RegistryAdapter`] impl works.

pub mod error;
pub mod sqlite;

pub use error::{RegistryError, Result};
pub use sqlite::SqliteRegistry;

use async_trait::async_trait;

/// Key/value/set/list store with per-key TTL expiry (spec §4.7).
///
/// All keys are namespaced by the caller (e.g. `"presence:MudA:alice"`,
/// `"mudlist"`, `"channel:ooc:members"`) — the adapter itself knows
/// nothing about MUD-domain semantics.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl_secs` seconds (0 = no expiry).
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Get `key`'s value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete `key`. Returns whether a row was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Add `member` to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// List all members of the set at `key`.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Push `value` onto the tail of the list at `key`.
    async fn list_push(&self, key: &str, value: &str) -> Result<()>;

    /// Trim the list at `key` to its last `max_len` entries.
    async fn list_trim(&self, key: &str, max_len: usize) -> Result<()>;

    /// Return up to `limit` most recent entries (newest last).
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;
}
