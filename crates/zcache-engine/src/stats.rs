//! Hit/miss counters and an optional periodic metrics-file sink. Grounded
//! in `znprofiler.c`'s counters, reimplemented as a `tracing` sink plus an
//! atomic counter pair: the profiler is "entirely out of the core" (spec
//! §9), specified here as a sink that observes the core rather than one
//! it depends on.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

/// Process-wide hit/miss counters. Cheap enough to update on every `get`.
pub struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Spec §6 `hit_ratio`. `0.0` before any request has completed.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let misses = self.misses() as f64;
        let total = hits + misses;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a background task that appends `hit_ratio,hits,misses` lines to
/// `path` every `period`, for offline plotting — the sink role spec §9
/// assigns the profiler. Disabled entirely when `metrics_path` is unset
/// (the common case in tests and short-lived tool invocations).
pub fn spawn_metrics_sink(stats: Arc<Stats>, path: PathBuf, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let line = format!("{:.6},{},{}\n", stats.hit_ratio(), stats.hits(), stats.misses());
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    if let Err(e) = file.write_all(line.as_bytes()).await {
                        warn!(?path, error = %e, "failed to append metrics line");
                    }
                }
                Err(e) => warn!(?path, error = %e, "failed to open metrics sink file"),
            }
        }
    })
}

pub fn log_snapshot(stats: &Stats) {
    info!(
        hits = stats.hits(),
        misses = stats.misses(),
        hit_ratio = stats.hit_ratio(),
        "cache stats snapshot"
    );
}
