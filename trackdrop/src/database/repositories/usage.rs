//! Usage counter repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::UsageOwnerDbModel;
use crate::database::time::now_ms;
use crate::engine::{OwnerId, UsageStats};

/// Monotonic usage counter plus the set of distinct requesters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Count one use by `owner_id`; adding an already known owner is a no-op.
    async fn record_use(&self, owner_id: OwnerId) -> Result<()>;

    async fn snapshot(&self) -> Result<UsageStats>;
}

/// SQLx implementation of [`UsageStore`].
pub struct SqlxUsageStore {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxUsageStore {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }

    /// Known requesters, oldest first.
    pub async fn owners(&self) -> Result<Vec<UsageOwnerDbModel>> {
        let owners = sqlx::query_as::<_, UsageOwnerDbModel>(
            "SELECT owner_id, first_seen_at FROM usage_owner ORDER BY first_seen_at, owner_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(owners)
    }
}

#[async_trait]
impl UsageStore for SqlxUsageStore {
    async fn record_use(&self, owner_id: OwnerId) -> Result<()> {
        let mut tx = self.write_pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO usage_counter (id, total_uses) VALUES (1, 1)
            ON CONFLICT(id) DO UPDATE SET total_uses = total_uses + 1
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO usage_owner (owner_id, first_seen_at) VALUES (?, ?)")
            .bind(owner_id)
            .bind(now_ms())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<UsageStats> {
        let total: Option<(i64,)> =
            sqlx::query_as("SELECT total_uses FROM usage_counter WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        let (owners,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_owner")
            .fetch_one(&self.pool)
            .await?;

        Ok(UsageStats {
            total_uses: total.map(|(n,)| n.max(0) as u64).unwrap_or(0),
            distinct_users: owners.max(0) as u64,
        })
    }
}
