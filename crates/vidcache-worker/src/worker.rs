//! Component wiring and lifecycle.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::batch_resize::BatchResizer;
use crate::environment::CacheEnvironment;
use crate::error::WorkerResult;
use crate::probe::SourceProber;
use crate::reaper::IdleReaper;
use crate::resolver::MediaResolver;
use crate::transcoder::Transcoder;

/// All components over one environment, plus the reaper task.
pub struct CacheWorker {
    env: Arc<CacheEnvironment>,
    transcoder: Arc<Transcoder>,
    resolver: MediaResolver,
    resizer: BatchResizer,
    prober: SourceProber,
    reaper: Arc<IdleReaper>,
    shutdown: watch::Sender<bool>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWorker {
    pub fn new(env: Arc<CacheEnvironment>) -> Self {
        let transcoder = Arc::new(Transcoder::new(Arc::clone(&env)));
        let (shutdown, _) = watch::channel(false);
        Self {
            resolver: MediaResolver::new(Arc::clone(&env), Arc::clone(&transcoder)),
            resizer: BatchResizer::new(Arc::clone(&env)),
            prober: SourceProber::new(&env),
            reaper: Arc::new(IdleReaper::new(Arc::clone(&env), Arc::clone(&transcoder))),
            transcoder,
            env,
            shutdown,
            reaper_task: Mutex::new(None),
        }
    }

    pub fn env(&self) -> &Arc<CacheEnvironment> {
        &self.env
    }

    pub fn resolver(&self) -> &MediaResolver {
        &self.resolver
    }

    pub fn resizer(&self) -> &BatchResizer {
        &self.resizer
    }

    pub fn prober(&self) -> &SourceProber {
        &self.prober
    }

    pub fn transcoder(&self) -> &Arc<Transcoder> {
        &self.transcoder
    }

    pub fn reaper(&self) -> &Arc<IdleReaper> {
        &self.reaper
    }

    /// Initialize the cache root and start the reaper.
    pub async fn start(&self) -> WorkerResult<()> {
        self.env.initialize().await?;

        let mut task = self.reaper_task.lock().await;
        if task.is_none() {
            *task = Some(
                Arc::clone(&self.reaper)
                    .spawn(self.env.config.reaper_period, self.shutdown.subscribe()),
            );
        }
        info!("Cache worker started");
        Ok(())
    }

    /// Stop the reaper, drain in-flight transcodes and release the cache root.
    pub async fn shutdown(&self) -> WorkerResult<()> {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.reaper_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Reaper task ended abnormally: {}", e);
            }
        }

        info!("Waiting for in-flight transcodes to complete...");
        if !self.transcoder.drain(self.env.config.shutdown_timeout).await {
            warn!("Shutdown timeout reached with transcodes still running");
        }

        self.env.shutdown().await?;
        info!("Cache worker stopped");
        Ok(())
    }
}
