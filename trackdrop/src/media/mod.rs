//! Media adapters backed by external tools.

pub mod ffmpeg_tagger;
pub mod ytdlp;

pub use ffmpeg_tagger::FfmpegTagger;
pub use ytdlp::{YtDlpConfig, YtDlpSource};
