use mimalloc::MiMalloc;
use tracing::{error, info};
use trackdrop::config::AppConfig;
use trackdrop::services::ServiceContainer;
use trackdrop::{database, logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    info!(
        "trackdrop {} starting (filter: {})",
        env!("CARGO_PKG_VERSION"),
        logging_config.get_filter()
    );

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    let write_pool = database::init_write_pool(&config.database_url).await?;
    database::run_migrations(&write_pool).await?;

    let container = ServiceContainer::new(config, pool, write_pool)?;
    container.initialize().await?;
    logging_config.start_retention_cleanup(container.cancellation_token());

    tokio::select! {
        result = container.run_bot() => {
            if let Err(e) = result {
                error!("Bot stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    container.shutdown().await?;

    info!("trackdrop stopped");
    Ok(())
}
