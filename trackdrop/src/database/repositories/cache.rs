//! Delivery cache repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::CacheEntryDbModel;

/// Content id -> delivery reference store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Delivery reference for `content_id`, if cached.
    async fn lookup(&self, content_id: &str) -> Result<Option<String>>;

    /// Insert or replace the reference for `content_id`.
    async fn store(&self, content_id: &str, delivery_ref: &str) -> Result<()>;

    /// Remove the entry. Returns whether one existed.
    async fn evict(&self, content_id: &str) -> Result<bool>;
}

/// SQLx implementation of [`CacheStore`].
pub struct SqlxCacheStore {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxCacheStore {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    /// Full row for `content_id`.
    pub async fn get(&self, content_id: &str) -> Result<Option<CacheEntryDbModel>> {
        let entry = sqlx::query_as::<_, CacheEntryDbModel>(
            "SELECT * FROM delivery_cache WHERE content_id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM delivery_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl CacheStore for SqlxCacheStore {
    async fn lookup(&self, content_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT delivery_ref FROM delivery_cache WHERE content_id = ?")
                .bind(content_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(delivery_ref,)| delivery_ref))
    }

    async fn store(&self, content_id: &str, delivery_ref: &str) -> Result<()> {
        let entry = CacheEntryDbModel::new(content_id, delivery_ref);
        sqlx::query(
            r#"
            INSERT INTO delivery_cache (content_id, delivery_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                delivery_ref = excluded.delivery_ref,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.content_id)
        .bind(&entry.delivery_ref)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn evict(&self, content_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM delivery_cache WHERE content_id = ?")
            .bind(content_id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool_with_size, run_migrations};

    async fn store() -> SqlxCacheStore {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxCacheStore::new(pool.clone(), pool)
    }

    #[tokio::test]
    async fn test_lookup_store_evict() {
        let store = store().await;
        assert_eq!(store.lookup("abc").await.unwrap(), None);

        store.store("abc", "file-1").await.unwrap();
        assert_eq!(store.lookup("abc").await.unwrap().as_deref(), Some("file-1"));

        assert!(store.evict("abc").await.unwrap());
        assert!(!store.evict("abc").await.unwrap());
        assert_eq!(store.lookup("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_upserts() {
        let store = store().await;
        store.store("abc", "file-1").await.unwrap();
        let first = store.get("abc").await.unwrap().unwrap();

        store.store("abc", "file-2").await.unwrap();
        let second = store.get("abc").await.unwrap().unwrap();

        assert_eq!(second.delivery_ref, "file-2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
