//! Delivery cache database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};

/// A content id mapped to the reference of its last successful delivery.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CacheEntryDbModel {
    pub content_id: String,
    pub delivery_ref: String,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
    /// Unix epoch milliseconds (UTC) of the last upsert.
    pub updated_at: i64,
}

impl CacheEntryDbModel {
    pub fn new(content_id: impl Into<String>, delivery_ref: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            content_id: content_id.into(),
            delivery_ref: delivery_ref.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.updated_at)
    }
}
