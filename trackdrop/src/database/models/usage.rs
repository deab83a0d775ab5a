//! Usage tracking database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A requester seen at least once.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageOwnerDbModel {
    pub owner_id: i64,
    /// Unix epoch milliseconds (UTC).
    pub first_seen_at: i64,
}
