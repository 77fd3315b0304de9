//! Periodic reclamation of expired compilations.
//!
//! Each pass evicts expired registry entries with their files, drops idle
//! rate limit buckets, and removes request directories that neither an
//! entry nor a request in flight owns and that are older than the retention
//! window (left behind by a crash or restart).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::paths::{BUILD_DIR_PREFIX, remove_dir_if_exists};
use crate::rate_limit::RateLimiter;
use crate::registry::ArtifactRegistry;

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub failed_deletes: usize,
    pub pruned_clients: usize,
    pub orphans_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub struct RetentionSweeper {
    registry: Arc<ArtifactRegistry>,
    limiter: Arc<RateLimiter>,
    work_dir: PathBuf,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        registry: Arc<ArtifactRegistry>,
        limiter: Arc<RateLimiter>,
        work_dir: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            work_dir: work_dir.into(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one pass as of `now`.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let eviction = self.registry.evict_expired(now).await;
        let pruned_clients = self.limiter.prune_idle(now);

        let orphans_removed = match self.remove_orphans().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", self.work_dir.display(), e);
                0
            }
        };

        SweepReport {
            evicted: eviction.removed.len(),
            failed_deletes: eviction.failed_deletes.len(),
            pruned_clients,
            orphans_removed,
        }
    }

    async fn remove_orphans(&self) -> Result<usize> {
        let mut dir = match fs::read_dir(&self.work_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let owned = self.registry.owned_dirs().await;
        let retention = self.registry.retention();
        let mut removed = 0;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_build_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(BUILD_DIR_PREFIX));
            if !is_build_dir || owned.contains(&path) {
                continue;
            }
            if !older_than(&path, retention).await {
                continue;
            }

            match remove_dir_if_exists(&path).await {
                Ok(()) => {
                    tracing::debug!("Removed orphaned {}", path.display());
                    removed += 1;
                }
                Err(e) => tracing::warn!("Failed to remove orphaned {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }

    /// Sweep every `interval` until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = self.sweep(Instant::now()).await;
                if report.is_empty() {
                    tracing::debug!("Sweep found nothing to reclaim");
                } else {
                    tracing::info!(
                        "Sweep evicted {} compilations ({} with delete failures), pruned {} clients, removed {} orphans",
                        report.evicted,
                        report.failed_deletes,
                        report.pruned_clients,
                        report.orphans_removed
                    );
                }
            }
        })
    }
}

async fn older_than(path: &Path, age: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|elapsed| elapsed > age)
}
