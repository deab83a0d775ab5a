//! Collaborator contracts consumed by the engine.
//!
//! The engine never talks to yt-dlp, ffmpeg or Telegram directly; it only sees
//! these traits. Concrete adapters live in `crate::media` and `crate::telegram`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::PipelineError;
use crate::Result;

/// Identifier of the requesting user (chat id).
pub type OwnerId = i64;

/// Canonical metadata returned by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub content_id: String,
    pub title: String,
    pub attribution: String,
    pub thumbnail_ref: Option<String>,
    /// URL the item can be fetched from. Empty when it could not be resolved.
    pub source_url: String,
    pub is_collection: bool,
    /// Collection entries in source order. `None` entries are unavailable items.
    pub entries: Option<Vec<Option<Metadata>>>,
}

impl Metadata {
    /// Whether a collection entry carries enough to be turned into an item.
    pub fn is_resolvable(&self) -> bool {
        !self.source_url.trim().is_empty()
    }

    /// Check the shape of a single-item record.
    pub fn validate_item(self) -> std::result::Result<Self, PipelineError> {
        if self.content_id.trim().is_empty() {
            return Err(PipelineError::ExtractionFailure(
                "probe returned no content id".to_string(),
            ));
        }
        if !self.is_resolvable() {
            return Err(PipelineError::ExtractionFailure(format!(
                "no source url for {}",
                self.content_id
            )));
        }
        Ok(self)
    }
}

/// Tags written into the artifact during post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub title: String,
    pub attribution: String,
    pub thumbnail_ref: Option<String>,
}

/// Result of post-processing.
#[derive(Debug, Clone)]
pub struct TaggedArtifact {
    pub path: PathBuf,
    /// Encoded cover image, when one could be produced.
    pub cover: Option<Vec<u8>>,
}

/// A fresh delivery.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub path: &'a Path,
    pub title: &'a str,
    pub attribution: &'a str,
    pub cover: Option<&'a [u8]>,
}

/// Outcome of re-sending a cached delivery reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedDelivery {
    Delivered,
    /// The surface no longer accepts the reference.
    Stale,
}

/// What the user is shown as "currently happening" next to a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Preparing,
    Downloading,
    Processing,
    Uploading,
}

/// Handle to one status message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusContext {
    pub owner_id: OwnerId,
    pub handle: String,
}

/// Status surface errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// The status target disappeared (message deleted, chat closed).
    #[error("status target is gone")]
    Gone,
    #[error("status transport error: {0}")]
    Transport(String),
}

/// Usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_uses: u64,
    pub distinct_users: u64,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolve metadata for a URL or identifier.
    async fn probe(&self, identifier: &str) -> Result<Metadata>;

    /// Retrieve the media into `dest` and return the path actually written.
    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf>;
}

#[async_trait]
pub trait Tagger: Send + Sync {
    async fn apply_tags(&self, path: &Path, tags: &TagSet) -> Result<TaggedArtifact>;
}

#[async_trait]
pub trait DeliverySurface: Send + Sync {
    /// Deliver a local artifact; returns a reference that can be re-sent later.
    async fn deliver(&self, owner_id: OwnerId, upload: Upload<'_>) -> Result<String>;

    async fn deliver_cached(&self, owner_id: OwnerId, delivery_ref: &str)
    -> Result<CachedDelivery>;
}

#[async_trait]
pub trait StatusSurface: Send + Sync {
    async fn open(
        &self,
        owner_id: OwnerId,
        text: &str,
    ) -> std::result::Result<StatusContext, StatusError>;

    async fn emit_status(
        &self,
        ctx: &StatusContext,
        text: &str,
        activity: Activity,
    ) -> std::result::Result<(), StatusError>;

    async fn close(&self, ctx: &StatusContext) -> std::result::Result<(), StatusError>;

    /// Send a standalone notice.
    async fn notify(
        &self,
        owner_id: OwnerId,
        text: &str,
    ) -> std::result::Result<StatusContext, StatusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content_id: &str, url: &str) -> Metadata {
        Metadata {
            content_id: content_id.to_string(),
            title: "t".to_string(),
            source_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_item() {
        assert!(meta("abc", "https://youtu.be/abc").validate_item().is_ok());
        assert!(matches!(
            meta("", "https://youtu.be/abc").validate_item(),
            Err(PipelineError::ExtractionFailure(_))
        ));
        assert!(matches!(
            meta("abc", "  ").validate_item(),
            Err(PipelineError::ExtractionFailure(_))
        ));
    }
}
