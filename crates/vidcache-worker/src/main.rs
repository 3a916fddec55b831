//! Transcode cache worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vidcache_media::TokioProcessRunner;
use vidcache_models::SystemClock;
use vidcache_storage::{LocalObjectStore, ObjectStore, S3ObjectStore};
use vidcache_store::{RedisCacheStore, StoreConfig};
use vidcache_worker::{metrics, CacheEnvironment, CacheWorker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vidcache=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vidcache-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse()?;
        match metrics::init_metrics(addr) {
            Ok(()) => info!("Prometheus exporter listening on {}", addr),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    let store_config = StoreConfig::from_env();
    let store = RedisCacheStore::connect(&store_config).await?;

    let objects: Arc<dyn ObjectStore> = match std::env::var("VIDCACHE_LOCAL_OBJECT_ROOT") {
        Ok(root) => {
            info!("Reading sources from local directory {}", root);
            Arc::new(LocalObjectStore::new(root))
        }
        Err(_) => Arc::new(S3ObjectStore::from_env().await?),
    };

    let env = CacheEnvironment::new(
        config,
        Arc::new(store),
        &store_config,
        objects,
        Arc::new(TokioProcessRunner),
        Arc::new(SystemClock),
    );
    env.ffmpeg.check()?;
    env.ffprobe.check()?;

    let worker = CacheWorker::new(Arc::new(env));
    worker.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    worker.shutdown().await?;
    Ok(())
}
