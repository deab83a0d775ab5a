//! Database models.

pub mod cache;
pub mod usage;

pub use cache::CacheEntryDbModel;
pub use usage::UsageOwnerDbModel;
