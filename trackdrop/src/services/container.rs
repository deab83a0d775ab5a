//! Service container for dependency injection.
//!
//! The ServiceContainer builds every application service from an [`AppConfig`]
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SqlxCacheStore, SqlxUsageStore};
use crate::database::{DbPool, WritePool};
use crate::engine::{
    DeliveryEngine, Dispatcher, EngineCollaborators, EngineEvent, PipelineDeps,
};
use crate::media::{FfmpegTagger, YtDlpSource};
use crate::telegram::{Bot, TelegramClient};
use crate::utils::fs;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Read pool.
    pub pool: DbPool,
    /// Serialized write pool.
    pub write_pool: WritePool,
    pub cache_store: Arc<SqlxCacheStore>,
    pub usage_store: Arc<SqlxUsageStore>,
    pub source: Arc<YtDlpSource>,
    pub telegram: Arc<TelegramClient>,
    pub engine: Arc<DeliveryEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub bot: Arc<Bot>,
    config: AppConfig,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Wire every service. Fails when the bot token is missing.
    pub fn new(config: AppConfig, pool: DbPool, write_pool: WritePool) -> Result<Self> {
        let telegram = Arc::new(TelegramClient::new(config.require_bot_token()?));
        Ok(Self::with_telegram(config, pool, write_pool, telegram))
    }

    /// Wire every service around an existing Bot API client.
    pub fn with_telegram(
        config: AppConfig,
        pool: DbPool,
        write_pool: WritePool,
        telegram: Arc<TelegramClient>,
    ) -> Self {
        info!("Initializing service container");

        let cache_store = Arc::new(SqlxCacheStore::new(pool.clone(), write_pool.clone()));
        let usage_store = Arc::new(SqlxUsageStore::new(pool.clone(), write_pool.clone()));

        let source = Arc::new(YtDlpSource::new(config.ytdlp_config()));
        let tagger = Arc::new(FfmpegTagger::new(config.ffmpeg_path.clone()));

        let collaborators = EngineCollaborators {
            pipeline: PipelineDeps {
                source: source.clone(),
                tagger,
                delivery: telegram.clone(),
                cache: cache_store.clone(),
            },
            status: telegram.clone(),
        };
        let engine = Arc::new(DeliveryEngine::new(config.engine.clone(), collaborators));
        let dispatcher = Arc::new(Dispatcher::new(engine.clone(), usage_store.clone()));
        let bot = Arc::new(Bot::new(
            telegram.clone(),
            dispatcher.clone(),
            config.bot_config(),
        ));

        info!("Service container initialized");

        Self {
            pool,
            write_pool,
            cache_store,
            usage_store,
            source,
            telegram,
            engine,
            dispatcher,
            bot,
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Prepare directories, check external tools and start background tasks.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        fs::ensure_dir_all(&self.config.engine.download_dir).await?;

        if !self.source.is_available().await {
            warn!(
                binary = %self.config.ytdlp_path,
                "yt-dlp is not runnable; every request will fail until it is installed"
            );
        }
        if !process_utils::probe_binary(&self.config.ffmpeg_path, "-version").await {
            warn!(binary = %self.config.ffmpeg_path, "ffmpeg is not runnable; tagging will fail");
        }

        match self.cache_store.count().await {
            Ok(entries) => info!(entries, "Delivery cache loaded"),
            Err(e) => warn!("Failed to count delivery cache entries: {}", e),
        }

        self.setup_engine_event_subscriptions();

        info!("Services initialized");
        Ok(())
    }

    /// Log engine lifecycle events.
    fn setup_engine_event_subscriptions(&self) {
        let mut receiver = self.engine.subscribe();
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!("Engine event handler shutting down");
                        break;
                    }
                    result = receiver.recv() => {
                        match result {
                            Ok(event) => log_engine_event(&event),
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(skipped, "Engine event handler lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
    }

    /// Run the bot until shutdown is requested.
    pub async fn run_bot(&self) -> Result<()> {
        self.bot
            .clone()
            .run(self.cancellation_token.child_token())
            .await
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Stop polling and background tasks first so no new jobs arrive
        self.cancellation_token.cancel();

        let cancelled = self.engine.shutdown();
        info!("Cancelled {} active jobs", cancelled);

        // Wait for offloaded fetches and tagging runs to unwind
        let workers = self.engine.workers().clone();
        let drained = tokio::time::timeout(timeout, async move {
            while workers.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pools...");
        self.write_pool.close().await;
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

fn log_engine_event(event: &EngineEvent) {
    match event {
        EngineEvent::JobStarted { job_id, owner_id, url } => {
            debug!(job_id = %job_id, owner_id, url = %url, "Job started");
        }
        EngineEvent::StageChanged {
            job_id,
            item_id,
            ordinal_index,
            stage,
        } => {
            debug!(job_id = %job_id, item_id = %item_id, ordinal_index, stage = %stage, "Stage changed");
        }
        EngineEvent::ItemFinished {
            job_id,
            item_id,
            content_id,
            outcome,
        } => {
            debug!(
                job_id = %job_id,
                item_id = %item_id,
                content_id = content_id.as_deref().unwrap_or("-"),
                outcome = ?outcome,
                "Item finished"
            );
        }
        EngineEvent::JobFinished {
            job_id,
            owner_id,
            outcome,
        } => {
            info!(job_id = %job_id, owner_id, outcome = ?outcome, "Job finished");
        }
    }
}
