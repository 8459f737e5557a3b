use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use uptime_engine::{
    Engine,
    config::{StorageConfig, read_config_file},
    notify::{EmailTransport, HttpMailRelay},
    storage::{MemoryBackend, StorageBackend, seed_monitors},
    util::{get_config_path, get_workers},
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to $UPTIME_CONFIG)
    #[arg(short, long)]
    file: Option<String>,

    /// Log level for the engine and the hub
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![("uptime_engine", level), ("uptime_hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn open_backend(storage: Option<&StorageConfig>) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match storage.cloned().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory storage, nothing will be persisted");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("using SQLite storage at {}", path.display());
            Arc::new(
                uptime_engine::storage::sqlite::SqliteBackend::new(&path)
                    .await
                    .with_context(|| format!("failed to open database {}", path.display()))?,
            )
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => bail!("SQLite storage requires the `storage-sqlite` feature"),
    };

    let health = backend.health_check().await?;
    if !health.healthy {
        bail!("storage backend is unhealthy: {}", health.message);
    }
    debug!("storage healthy: {} {:?}", health.message, health.metadata);

    Ok(backend)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    let _ = ctrl_c.await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let mut config = read_config_file(&path).with_context(|| format!("failed to read config {path}"))?;
    if let Some(workers) = get_workers() {
        config.engine.workers = workers;
    }

    let backend = open_backend(config.storage.as_ref()).await?;
    if let Some(monitors) = &config.monitors {
        let stored = seed_monitors(backend.as_ref(), monitors, config.engine.min_interval())
            .await
            .context("failed to seed monitors from config")?;
        info!("seeded {stored}/{} monitors from config", monitors.len());
    }

    let mut builder = Engine::builder(config.engine.clone(), backend);
    if let Some(email) = config.email.clone() {
        builder = builder.email_transport(Arc::new(HttpMailRelay::new(email)) as Arc<dyn EmailTransport>);
    }
    let engine = builder.start().await.context("failed to start the engine")?;

    info!("uptime hub running with {} workers", config.engine.workers);
    shutdown_signal().await;
    info!("shutting down");

    if let Err(e) = engine.shutdown().await {
        error!("unclean shutdown: {e}");
    }
    Ok(())
}
