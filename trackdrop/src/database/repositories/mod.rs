//! Repository layer.

pub mod cache;
pub mod usage;

pub use cache::{CacheStore, SqlxCacheStore};
pub use usage::{SqlxUsageStore, UsageStore};
