use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::{AuthError, Result};
use crate::{AuthOutcome, CredentialStore};

/// SQLite-backed credential store, one row per registered MUD name.
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS mud_credentials (
                mud_name      TEXT PRIMARY KEY,
                secret_hash   TEXT NOT NULL,
                registered_at TEXT NOT NULL DEFAULT (datetime('now'))
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

fn verify_secret(secret: &str, hash_str: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash_str) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn authenticate(&self, mud_name: &str, secret: &str) -> Result<AuthOutcome> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT secret_hash FROM mud_credentials WHERE mud_name = ?")
                .bind(mud_name)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((hash,)) => Ok(if verify_secret(secret, &hash) {
                AuthOutcome::Accepted
            } else {
                AuthOutcome::Rejected
            }),
            None => {
                let hash = hash_secret(secret)?;
                sqlx::query(
                    "INSERT INTO mud_credentials (mud_name, secret_hash) VALUES (?, ?)",
                )
                .bind(mud_name)
                .bind(&hash)
                .execute(&self.pool)
                .await?;
                Ok(AuthOutcome::Provisioned)
            },
        }
    }

    async fn revoke(&self, mud_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM mud_credentials WHERE mud_name = ?")
            .bind(mud_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteCredentialStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteCredentialStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn first_connect_provisions() {
        let store = test_store().await;
        assert_eq!(
            store.authenticate("MudA", "s3cret").await.unwrap(),
            AuthOutcome::Provisioned
        );
    }

    #[tokio::test]
    async fn matching_secret_is_accepted_on_second_connect() {
        let store = test_store().await;
        store.authenticate("MudA", "s3cret").await.unwrap();
        assert_eq!(
            store.authenticate("MudA", "s3cret").await.unwrap(),
            AuthOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn mismatched_secret_is_rejected() {
        let store = test_store().await;
        store.authenticate("MudA", "s3cret").await.unwrap();
        assert_eq!(
            store.authenticate("MudA", "wrong").await.unwrap(),
            AuthOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn revoke_allows_re_provisioning() {
        let store = test_store().await;
        store.authenticate("MudA", "s3cret").await.unwrap();
        store.revoke("MudA").await.unwrap();
        assert_eq!(
            store.authenticate("MudA", "new-secret").await.unwrap(),
            AuthOutcome::Provisioned
        );
    }
}
