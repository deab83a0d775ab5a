//! yt-dlp backed media source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use process_utils::{describe_failure, run_captured, tokio_command};
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::{MediaSource, Metadata};
use crate::utils::fs::ensure_dir_all;
use crate::{Error, Result};

const UNKNOWN: &str = "<unknown>";

/// Configuration for [`YtDlpSource`].
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary.
    pub binary: String,
    /// ffmpeg used by yt-dlp for audio extraction.
    pub ffmpeg_location: Option<String>,
    /// Audio bitrate passed to `--audio-quality`.
    pub audio_quality: String,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            ffmpeg_location: None,
            audio_quality: "192K".to_string(),
        }
    }
}

/// Info record as printed by `yt-dlp -J`. Only the fields we use.
#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    artist: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    entries: Option<Vec<Option<RawInfo>>>,
}

impl RawInfo {
    fn into_metadata(self, fallback_url: Option<&str>) -> Metadata {
        let is_collection = self.kind.as_deref() == Some("playlist") || self.entries.is_some();
        let source_url = self
            .webpage_url
            .or(self.url)
            .or_else(|| fallback_url.map(str::to_string))
            .unwrap_or_default();
        let entries = self.entries.map(|entries| {
            entries
                .into_iter()
                .map(|entry| entry.map(|raw| raw.into_metadata(None)))
                .collect()
        });

        Metadata {
            content_id: self.id.unwrap_or_default(),
            title: self.title.unwrap_or_else(|| UNKNOWN.to_string()),
            attribution: self
                .artist
                .or(self.uploader)
                .unwrap_or_else(|| UNKNOWN.to_string()),
            thumbnail_ref: self.thumbnail,
            source_url,
            is_collection,
            entries,
        }
    }
}

/// Parse the JSON printed by `yt-dlp -J` for `identifier`.
pub fn parse_probe_output(json: &str, identifier: &str) -> Result<Metadata> {
    let raw: RawInfo = serde_json::from_str(json)?;
    Ok(raw.into_metadata(Some(identifier)))
}

/// Media source that shells out to yt-dlp.
pub struct YtDlpSource {
    config: YtDlpConfig,
}

impl YtDlpSource {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    /// Check that the binary can be started.
    pub async fn is_available(&self) -> bool {
        process_utils::probe_binary(&self.config.binary, "--version").await
    }

    fn output_template(dest: &Path) -> PathBuf {
        dest.with_extension("%(ext)s")
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn probe(&self, identifier: &str) -> Result<Metadata> {
        let mut cmd = tokio_command(&self.config.binary);
        cmd.args(["-J", "--no-warnings", "--ignore-errors", "--"])
            .arg(identifier);

        debug!("Probing {}", identifier);
        let output = run_captured(&mut cmd).await?;
        let stdout = output.stdout_lossy();
        // with --ignore-errors yt-dlp exits non-zero when some entries failed but
        // still prints the collection
        if stdout.trim().is_empty() {
            return Err(Error::Other(describe_failure("yt-dlp", &output)));
        }
        parse_probe_output(&stdout, identifier)
    }

    async fn fetch(&self, identifier: &str, dest: &Path) -> Result<PathBuf> {
        if let Some(dir) = dest.parent() {
            ensure_dir_all(dir).await?;
        }

        let mut cmd = tokio_command(&self.config.binary);
        cmd.args([
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            self.config.audio_quality.as_str(),
            "--no-playlist",
            "--no-warnings",
            "--no-progress",
        ]);
        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        cmd.arg("-o")
            .arg(Self::output_template(dest))
            .arg("--")
            .arg(identifier);

        let output = run_captured(&mut cmd).await?;
        if !output.success() {
            return Err(Error::Other(describe_failure("yt-dlp", &output)));
        }

        let path = dest.with_extension("mp3");
        info!("Fetched {} into {}", identifier, path.display());
        Ok(path)
    }
}
