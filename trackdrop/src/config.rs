//! Process configuration read from environment variables.
//!
//! Supported env vars (all optional unless noted):
//! - `TRACKDROP_BOT_TOKEN`: Bot API token, required to run the bot
//! - `TRACKDROP_ADMIN_ID`: user allowed to run `/analytics`
//! - `DATABASE_URL` (default `sqlite:trackdrop.db?mode=rwc`)
//! - `TRACKDROP_DOWNLOAD_DIR` (default `downloads`)
//! - `TRACKDROP_LOG_DIR` (default `logs`)
//! - `YTDLP_PATH` (default `yt-dlp`), `FFMPEG_PATH` (default `ffmpeg`)
//! - `TRACKDROP_MAX_CONCURRENT_FETCHES` (5), `TRACKDROP_MAX_WORKERS` (16)
//! - `TRACKDROP_TICK_INTERVAL_MS` (1000), `TRACKDROP_SLOW_TICK_THRESHOLD` (15)
//! - `TRACKDROP_NOTICE_TTL_SECS` (10)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::media::YtDlpConfig;
use crate::telegram::BotConfig;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:trackdrop.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Everything the binary needs to wire its services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: Option<String>,
    pub admin_id: Option<i64>,
    pub database_url: String,
    pub log_dir: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            admin_id: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self {
            bot_token: var("TRACKDROP_BOT_TOKEN"),
            admin_id: parse_var(&var, "TRACKDROP_ADMIN_ID")?,
            ..Self::default()
        };

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = var("TRACKDROP_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("YTDLP_PATH") {
            config.ytdlp_path = path;
        }
        if let Some(path) = var("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }

        let engine = &mut config.engine;
        if let Some(dir) = var("TRACKDROP_DOWNLOAD_DIR") {
            engine.download_dir = PathBuf::from(dir);
        }
        if let Some(n) = parse_var(&var, "TRACKDROP_MAX_CONCURRENT_FETCHES")? {
            engine.max_concurrent_fetches = n;
        }
        if let Some(n) = parse_var(&var, "TRACKDROP_MAX_WORKERS")? {
            engine.max_workers = n;
        }
        if let Some(ms) = parse_var(&var, "TRACKDROP_TICK_INTERVAL_MS")? {
            engine.tick_interval_ms = ms;
        }
        if let Some(ticks) = parse_var(&var, "TRACKDROP_SLOW_TICK_THRESHOLD")? {
            engine.slow_tick_threshold = ticks;
        }
        if let Some(secs) = parse_var(&var, "TRACKDROP_NOTICE_TTL_SECS")? {
            engine.notice_ttl_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_fetches == 0 {
            return Err(Error::config(
                "TRACKDROP_MAX_CONCURRENT_FETCHES must be at least 1",
            ));
        }
        if self.engine.max_workers < self.engine.max_concurrent_fetches {
            return Err(Error::config(format!(
                "TRACKDROP_MAX_WORKERS ({}) must be at least TRACKDROP_MAX_CONCURRENT_FETCHES ({})",
                self.engine.max_workers, self.engine.max_concurrent_fetches
            )));
        }
        if self.engine.tick_interval_ms == 0 {
            return Err(Error::config("TRACKDROP_TICK_INTERVAL_MS must be at least 1"));
        }
        Ok(())
    }

    /// The bot token, or a configuration error when it is missing.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| Error::config("TRACKDROP_BOT_TOKEN is not set"))
    }

    pub fn ytdlp_config(&self) -> YtDlpConfig {
        YtDlpConfig {
            binary: self.ytdlp_path.clone(),
            ffmpeg_location: Some(self.ffmpeg_path.clone()),
            ..YtDlpConfig::default()
        }
    }

    pub fn bot_config(&self) -> BotConfig {
        BotConfig {
            admin_id: self.admin_id,
            notice_ttl: Duration::from_secs(self.engine.notice_ttl_secs),
            ..BotConfig::default()
        }
    }
}

fn parse_var<T, V>(var: &V, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("{key}: invalid value '{raw}': {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bot_token, None);
        assert_eq!(config.admin_id, None);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.engine.max_concurrent_fetches, 5);
        assert_eq!(config.engine.max_workers, 16);
        assert_eq!(config.engine.download_dir, PathBuf::from("downloads"));
        assert!(config.require_bot_token().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TRACKDROP_BOT_TOKEN", "123:abc"),
            ("TRACKDROP_ADMIN_ID", "42"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("TRACKDROP_DOWNLOAD_DIR", "/tmp/td"),
            ("YTDLP_PATH", "/opt/yt-dlp"),
            ("TRACKDROP_MAX_CONCURRENT_FETCHES", "2"),
            ("TRACKDROP_TICK_INTERVAL_MS", "250"),
            ("TRACKDROP_NOTICE_TTL_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.require_bot_token().unwrap(), "123:abc");
        assert_eq!(config.admin_id, Some(42));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.engine.download_dir, PathBuf::from("/tmp/td"));
        assert_eq!(config.engine.max_concurrent_fetches, 2);
        assert_eq!(config.engine.tick_interval_ms, 250);
        assert_eq!(config.ytdlp_config().binary, "/opt/yt-dlp");
        assert_eq!(config.bot_config().admin_id, Some(42));
        assert_eq!(config.bot_config().notice_ttl, Duration::from_secs(3));
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = load(&[("DATABASE_URL", "  "), ("TRACKDROP_ADMIN_ID", "")]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.admin_id, None);
    }

    #[test]
    fn test_invalid_numbers_are_configuration_errors() {
        let err = load(&[("TRACKDROP_MAX_WORKERS", "lots")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("TRACKDROP_MAX_WORKERS")));

        let err = load(&[("TRACKDROP_MAX_CONCURRENT_FETCHES", "0")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_worker_pool_must_cover_fetch_slots() {
        let err = load(&[
            ("TRACKDROP_MAX_CONCURRENT_FETCHES", "8"),
            ("TRACKDROP_MAX_WORKERS", "4"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
