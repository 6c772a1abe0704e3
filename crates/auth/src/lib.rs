//! Credential store (spec §4.6): verifies the shared secret a MUD presents
//! during the auth handshake.
//!
//! A MUD name is provisioned the first time it authenticates with a given
//! secret ("first-connect-wins"); every later handshake for that name must
//! present the same secret. This mirrors the teacher's single-user password
//! store, generalized to many named principals.

pub mod error;
pub mod sqlite;

pub use error::{AuthError, Result};
pub use sqlite::SqliteCredentialStore;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Secret matched an existing registration.
    Accepted,
    /// No prior registration existed; this secret is now on file.
    Provisioned,
    /// A registration existed and the secret did not match it.
    Rejected,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn authenticate(&self, mud_name: &str, secret: &str) -> Result<AuthOutcome>;

    /// Forget a MUD's registration (used by admin tooling, not the wire protocol).
    async fn revoke(&self, mud_name: &str) -> Result<()>;
}

/// Fallback store for `requireCredential = false` (spec §6): every handshake
/// is accepted regardless of the secret presented, including an absent one.
pub struct AllowAllCredentialStore;

#[async_trait]
impl CredentialStore for AllowAllCredentialStore {
    async fn authenticate(&self, _mud_name: &str, _secret: &str) -> Result<AuthOutcome> {
        Ok(AuthOutcome::Accepted)
    }

    async fn revoke(&self, _mud_name: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_accepts_anything() {
        let store = AllowAllCredentialStore;
        assert_eq!(
            store.authenticate("AnyMud", "").await.unwrap(),
            AuthOutcome::Accepted
        );
    }
}
