use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::RegistryAdapter;

/// SQLite-backed [`RegistryAdapter`]. Expiry is lazy: a row past its
/// `expires_at` is treated as absent on read and swept opportunistically
/// rather than via a background task, mirroring the teacher's state store.
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS registry_kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS registry_set (
                key    TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS registry_list (
                key      TEXT NOT NULL,
                position INTEGER NOT NULL,
                value    TEXT NOT NULL,
                PRIMARY KEY (key, position)
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
impl RegistryAdapter for SqliteRegistry {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(now_epoch() + ttl_secs as i64)
        };
        sqlx::query(
            r#"INSERT INTO registry_kv (key, value, expires_at) VALUES (?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM registry_kv WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((_value, Some(expires_at))) if expires_at <= now_epoch() => {
                let _ = self.delete(key).await;
                Ok(None)
            },
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM registry_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO registry_set (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        sqlx::query("DELETE FROM registry_set WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT member FROM registry_set WHERE key = ? ORDER BY member")
                .bind(key)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let next_pos: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(position) FROM registry_list WHERE key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        let position = next_pos.0.unwrap_or(-1) + 1;
        sqlx::query("INSERT INTO registry_list (key, position, value) VALUES (?, ?, ?)")
            .bind(key)
            .bind(position)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_trim(&self, key: &str, max_len: usize) -> Result<()> {
        sqlx::query(
            r#"DELETE FROM registry_list WHERE key = ? AND position NOT IN (
                SELECT position FROM registry_list WHERE key = ? ORDER BY position DESC LIMIT ?
            )"#,
        )
        .bind(key)
        .bind(key)
        .bind(max_len as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT value FROM registry_list WHERE key = ? ORDER BY position DESC LIMIT ?",
        )
        .bind(key)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().rev().map(|(v,)| v).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn test_registry() -> SqliteRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteRegistry::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn set_and_get_round_trips() {
        let reg = test_registry().await;
        reg.set_with_ttl("presence:MudA:alice", "idle", 0)
            .await
            .unwrap();
        assert_eq!(
            reg.get("presence:MudA:alice").await.unwrap().as_deref(),
            Some("idle")
        );
    }

    #[tokio::test]
    async fn expired_key_reads_as_absent() {
        let reg = test_registry().await;
        reg.set_with_ttl("k", "v", 1).await.unwrap();
        sqlx::query("UPDATE registry_kv SET expires_at = 0 WHERE key = 'k'")
            .execute(&reg.pool)
            .await
            .unwrap();
        assert_eq!(reg.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_members_are_deduped_and_sorted() {
        let reg = test_registry().await;
        reg.set_add("mudlist", "MudB").await.unwrap();
        reg.set_add("mudlist", "MudA").await.unwrap();
        reg.set_add("mudlist", "MudA").await.unwrap();
        assert_eq!(reg.set_members("mudlist").await.unwrap(), vec!["MudA", "MudB"]);
    }

    #[tokio::test]
    async fn set_remove_deletes_member() {
        let reg = test_registry().await;
        reg.set_add("mudlist", "MudA").await.unwrap();
        reg.set_remove("mudlist", "MudA").await.unwrap();
        assert!(reg.set_members("mudlist").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_push_and_range_preserve_order() {
        let reg = test_registry().await;
        for msg in ["a", "b", "c"] {
            reg.list_push("channel:ooc:history", msg).await.unwrap();
        }
        assert_eq!(
            reg.list_range("channel:ooc:history", 10).await.unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn list_trim_keeps_most_recent() {
        let reg = test_registry().await;
        for msg in ["a", "b", "c", "d"] {
            reg.list_push("k", msg).await.unwrap();
        }
        reg.list_trim("k", 2).await.unwrap();
        assert_eq!(reg.list_range("k", 10).await.unwrap(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let reg = test_registry().await;
        assert!(!reg.delete("missing").await.unwrap());
        reg.set_with_ttl("k", "v", 0).await.unwrap();
        assert!(reg.delete("k").await.unwrap());
    }
}
