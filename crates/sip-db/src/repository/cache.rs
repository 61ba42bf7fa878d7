//! # Local Cache Repository
//!
//! String keys, opaque blob values. Backs the change token, the subscription
//! flag and whatever counters the application caches through the gateway.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  local_cache                                             │
//! │  ──────────────────────────────────────────────────────  │
//! │  changeToken         │ <opaque cursor bytes>            │
//! │  subscriptionsSaved  │ {"type":"bool","value":true}     │
//! │  drinkTotal          │ {"type":"integer","value":4}     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write is a single `INSERT .. ON CONFLICT DO UPDATE`, so a crash
//! leaves either the old or the new value, never a torn one.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use sip_core::FieldValue;

/// Repository for the local key/value cache.
#[derive(Debug, Clone)]
pub struct LocalCacheRepository {
    pool: SqlitePool,
}

impl LocalCacheRepository {
    /// Creates a new LocalCacheRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LocalCacheRepository { pool }
    }

    /// Reads the raw blob stored under `key`.
    pub async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM local_cache WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous value atomically.
    pub async fn put(&self, key: &str, value: &[u8]) -> DbResult<()> {
        debug!(key = %key, bytes = value.len(), "Writing local cache entry");

        sqlx::query(
            r#"
            INSERT INTO local_cache (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes `key`. Returns true if an entry existed.
    pub async fn delete(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM local_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists all keys in insertion-independent (sorted) order.
    pub async fn keys(&self) -> DbResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM local_cache ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }

    // =========================================================================
    // Typed Values
    // =========================================================================

    /// Reads a typed value stored with [`put_value`](Self::put_value).
    pub async fn get_value(&self, key: &str) -> DbResult<Option<FieldValue>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores a typed value as tagged JSON.
    pub async fn put_value(&self, key: &str, value: &FieldValue) -> DbResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes).await
    }

    /// Reads a boolean flag; missing or non-boolean values read as false.
    pub async fn get_flag(&self, key: &str) -> DbResult<bool> {
        Ok(matches!(
            self.get_value(key).await?,
            Some(FieldValue::Bool(true))
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use sip_core::FieldValue;

    #[tokio::test]
    async fn test_put_get_overwrite_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache = db.cache();

        assert_eq!(cache.get("changeToken").await.unwrap(), None);

        cache.put("changeToken", b"first").await.unwrap();
        cache.put("changeToken", b"second").await.unwrap();
        assert_eq!(
            cache.get("changeToken").await.unwrap(),
            Some(b"second".to_vec())
        );

        assert!(cache.delete("changeToken").await.unwrap());
        assert!(!cache.delete("changeToken").await.unwrap());
        assert_eq!(cache.get("changeToken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_values_and_flags() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache = db.cache();

        assert!(!cache.get_flag("subscriptionsSaved").await.unwrap());

        cache
            .put_value("subscriptionsSaved", &FieldValue::Bool(true))
            .await
            .unwrap();
        cache
            .put_value("drinkTotal", &FieldValue::Integer(4))
            .await
            .unwrap();

        assert!(cache.get_flag("subscriptionsSaved").await.unwrap());
        assert!(!cache.get_flag("drinkTotal").await.unwrap());
        assert_eq!(
            cache.get_value("drinkTotal").await.unwrap(),
            Some(FieldValue::Integer(4))
        );
        assert_eq!(
            cache.keys().await.unwrap(),
            vec!["drinkTotal".to_string(), "subscriptionsSaved".to_string()]
        );
    }

    #[tokio::test]
    async fn test_garbage_blob_is_a_serialization_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache = db.cache();

        cache.put("drinkTotal", b"\xff\x00").await.unwrap();
        assert!(matches!(
            cache.get_value("drinkTotal").await,
            Err(crate::DbError::Serialization(_))
        ));
    }
}
