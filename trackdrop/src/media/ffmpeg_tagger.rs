//! ffmpeg backed tagger: cover art and ID3 tags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{describe_failure, run_captured, tokio_command};
use tracing::debug;

use crate::engine::{TagSet, TaggedArtifact, Tagger};
use crate::utils::fs::remove_file_if_exists;
use crate::{Error, Result};

/// Centre square crop, then the inner 346/461 of it (rounded down to even sides).
const COVER_FILTER: &str =
    r"crop=min(iw\,ih):min(iw\,ih),crop=trunc(iw*346/461/2)*2:trunc(ih*346/461/2)*2";

pub struct FfmpegTagger {
    ffmpeg_path: String,
    http: reqwest::Client,
}

impl FfmpegTagger {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self::with_client(
            ffmpeg_path,
            reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        )
    }

    pub fn with_client(ffmpeg_path: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            http,
        }
    }

    /// Download the thumbnail and turn it into the cropped JPEG cover.
    async fn prepare_cover(&self, url: &str, workdir: &Path) -> Result<PathBuf> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let source = workdir.join("thumbnail");
        tokio::fs::write(&source, &bytes)
            .await
            .map_err(|e| Error::io_path("writing", &source, e))?;

        let cover = workdir.join("cover.jpg");
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(&source)
            .args(["-vf", COVER_FILTER, "-frames:v", "1", "-q:v", "2"])
            .arg(&cover);

        let output = run_captured(&mut cmd).await?;
        if !output.success() {
            return Err(Error::Other(describe_failure("ffmpeg", &output)));
        }
        Ok(cover)
    }

    fn tag_command(&self, input: &Path, cover: Option<&Path>, tags: &TagSet, output: &Path) -> tokio::process::Command {
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"]).arg(input);
        if let Some(cover) = cover {
            cmd.arg("-i")
                .arg(cover)
                .args(["-map", "0:a", "-map", "1:v"]);
        } else {
            cmd.args(["-map", "0:a"]);
        }
        cmd.args(["-c", "copy", "-id3v2_version", "3"])
            .arg("-metadata")
            .arg(format!("title={}", tags.title))
            .arg("-metadata")
            .arg(format!("artist={}", tags.attribution));
        if cover.is_some() {
            cmd.args([
                "-metadata:s:v",
                "title=Cover",
                "-metadata:s:v",
                "comment=Cover (front)",
                "-disposition:v",
                "attached_pic",
            ]);
        }
        cmd.arg(output);
        cmd
    }
}

#[async_trait]
impl Tagger for FfmpegTagger {
    async fn apply_tags(&self, path: &Path, tags: &TagSet) -> Result<TaggedArtifact> {
        let workdir = tempfile::tempdir()?;

        let cover_path = match &tags.thumbnail_ref {
            Some(url) => Some(self.prepare_cover(url, workdir.path()).await?),
            None => None,
        };

        let tagged = path.with_extension("tagged.mp3");
        let mut cmd = self.tag_command(path, cover_path.as_deref(), tags, &tagged);
        let output = run_captured(&mut cmd).await?;
        if !output.success() {
            remove_file_if_exists(&tagged).await;
            return Err(Error::Other(describe_failure("ffmpeg", &output)));
        }

        if let Err(e) = tokio::fs::rename(&tagged, path).await {
            remove_file_if_exists(&tagged).await;
            return Err(Error::io_path("replacing", path, e));
        }

        let cover = match &cover_path {
            Some(cover) => Some(
                tokio::fs::read(cover)
                    .await
                    .map_err(|e| Error::io_path("reading", cover, e))?,
            ),
            None => None,
        };
        debug!("Tagged {}", path.display());

        Ok(TaggedArtifact {
            path: path.to_path_buf(),
            cover,
        })
    }
}
