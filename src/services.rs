//! Background service lifecycle management.
//!
//! `SinkService` owns the worker thread that drives the engine once per
//! available input buffer. Two optional tokio tasks sit beside it:
//! 1. Stats reporter (periodic roll-up log line)
//! 2. Config watcher (re-reads the configuration file when it changes and
//!    reconciles the engine; the external control path)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::{self, SinkConfig};
use crate::core::{format_speed_compact, CycleOutcome, FanoutEngine, StatusSnapshot};
use crate::error::{Result, SinkError};
use crate::input::InputPorts;

/// Worker thread running service cycles until stopped or until every input
/// has finished.
/// Implements Drop to stop and join the worker.
pub struct SinkService {
    engine: Arc<FanoutEngine>,
    shutdown: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SinkService {
    /// Spawn the worker thread.
    pub fn start(engine: Arc<FanoutEngine>, mut inputs: InputPorts) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let worker = {
            let engine = Arc::clone(&engine);
            let shutdown = Arc::clone(&shutdown);
            let finished = Arc::clone(&finished);
            std::thread::Builder::new()
                .name("fanout-service".into())
                .spawn(move || {
                    let idle = Duration::from_millis(config::SERVICE_IDLE_SLEEP_MS);
                    let mut cycles = 0u64;
                    while !shutdown.load(Ordering::Relaxed) {
                        match engine.service(&mut inputs) {
                            CycleOutcome::Normal => cycles += 1,
                            CycleOutcome::Noop => {
                                if inputs.is_exhausted() {
                                    tracing::info!("All inputs finished");
                                    break;
                                }
                                std::thread::sleep(idle);
                            }
                        }
                    }
                    tracing::info!("Service loop exited after {cycles} cycles");
                    finished.store(true, Ordering::Release);
                })
                .map_err(|e| SinkError::Io(format!("failed to spawn service thread: {e}")))?
        };

        tracing::info!("SinkService started");
        Ok(Self {
            engine,
            shutdown,
            finished,
            worker: Some(worker),
        })
    }

    pub fn engine(&self) -> &Arc<FanoutEngine> {
        &self.engine
    }

    /// True once the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Spawn a task that logs the roll-up counters every
    /// [`config::STATS_INTERVAL_SECS`].
    pub fn start_stats_reporter(engine: Arc<FanoutEngine>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(config::STATS_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                tracing::info!("{}", summarize(&engine.status()));
            }
        })
    }

    /// Spawn a task that reconciles `engine` whenever the file at `path`
    /// changes.
    pub fn start_config_watcher(engine: Arc<FanoutEngine>, path: PathBuf) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config::CONFIG_RELOAD_INTERVAL_SECS));
            let mut last_modified = modified_time(&path).ok();
            loop {
                ticker.tick().await;
                let engine = Arc::clone(&engine);
                let watched = path.clone();
                let seen = last_modified;
                let outcome =
                    tokio::task::spawn_blocking(move || reload_if_changed(&engine, &watched, seen)).await;
                match outcome {
                    Ok(Ok(Some(modified))) => last_modified = Some(modified),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => tracing::debug!("Config watcher: {e}"),
                    Err(e) => tracing::warn!("Config reload task failed: {e}"),
                }
            }
        })
    }
}

impl Drop for SinkService {
    fn drop(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Service thread panicked");
            }
        }
    }
}

fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| SinkError::Io(format!("{}: {e}", path.display())))
}

/// Reconcile `engine` from `path` if its modification time differs from
/// `last_seen`.
///
/// Returns the new modification time when the file changed, whether or not
/// it parsed; a file that fails to parse is logged and the current
/// configuration is kept.
pub fn reload_if_changed(
    engine: &FanoutEngine,
    path: &Path,
    last_seen: Option<SystemTime>,
) -> Result<Option<SystemTime>> {
    let modified = modified_time(path)?;
    if last_seen == Some(modified) {
        return Ok(None);
    }

    match SinkConfig::from_file(path) {
        Ok(cfg) => {
            tracing::info!("Configuration file {} changed, reconciling", path.display());
            engine.reconcile(cfg.connections);
        }
        Err(e) => tracing::warn!(
            "Ignoring unreadable configuration {}: {e}",
            path.display()
        ),
    }
    Ok(Some(modified))
}

/// One-line roll-up for the periodic log.
pub fn summarize(status: &StatusSnapshot) -> String {
    format!(
        "{}/{} ports connected, {} bytes sent, {}",
        status.connected_count(),
        status.connection_stats.len(),
        status.total_bytes,
        format_speed_compact(status.bytes_per_sec)
    )
}
