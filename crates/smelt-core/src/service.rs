//! The compile service: every component wired together.
//!
//! HTTP handlers talk to this type only. It owns the rate limiter, the
//! orchestrator with its worker pool, the artifact registry, the packager,
//! the retention sweeper and the stats counters.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::compile::{CompilerInvoker, Toolchain};
use crate::config::{ArchivePolicy, ServiceConfig};
use crate::error::{Error, Result};
use crate::orchestrate::{Orchestrator, WorkerPool};
use crate::package::{Archive, ArchivePackager, archive_file_name};
use crate::paths::{ARCHIVE_FILE_NAME, BuildDirs};
use crate::rate_limit::{Admission, RateLimiter};
use crate::registry::{ArtifactRegistry, RegistryEntry};
use crate::request::{CompilationRequest, CompileRequest};
use crate::result::CompilationResult;
use crate::stats::{Stats, StatsSnapshot};
use crate::sweeper::{RetentionSweeper, SweepReport};

/// A stored compilation as seen by clients.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub compilation_id: String,
    pub result: CompilationResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Download file name, when at least one module exists.
    pub archive_name: Option<String>,

    /// Size of the cached archive (eager policy only).
    pub archive_size: Option<u64>,
}

impl Compilation {
    fn from_entry(entry: &RegistryEntry, archive_size: Option<u64>) -> Self {
        Self {
            compilation_id: entry.compilation_id.clone(),
            result: entry.result.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            archive_name: entry
                .result
                .has_modules()
                .then(|| archive_file_name(&entry.compilation_id)),
            archive_size,
        }
    }
}

#[derive(Debug)]
pub struct CompileService {
    config: ServiceConfig,
    limiter: Arc<RateLimiter>,
    orchestrator: Orchestrator,
    registry: Arc<ArtifactRegistry>,
    packager: ArchivePackager,
    sweeper: Arc<RetentionSweeper>,
    stats: Stats,
}

impl CompileService {
    /// Locate the compiler and build the service.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let toolchain = Toolchain::locate(&config.compiler)?;
        Ok(Self::with_toolchain(config, toolchain))
    }

    /// Build the service around an already located compiler.
    pub fn with_toolchain(config: ServiceConfig, toolchain: Toolchain) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let registry = Arc::new(ArtifactRegistry::new(config.retention));
        let sweeper = Arc::new(RetentionSweeper::new(
            registry.clone(),
            limiter.clone(),
            config.work_dir.clone(),
            config.sweep_interval,
        ));

        Self {
            orchestrator: Orchestrator::new(CompilerInvoker::new(toolchain), &config),
            packager: ArchivePackager::new(config.include_diagnostics),
            limiter,
            registry,
            sweeper,
            stats: Stats::new(),
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        self.orchestrator.pool()
    }

    /// Admission check for `client`. Returns the requests left in its
    /// window.
    pub fn admit(&self, client: &str) -> Result<usize> {
        match self.limiter.admit(client, Instant::now()) {
            Admission::Allowed { remaining } => Ok(remaining),
            Admission::Denied { retry_after } => {
                self.stats.record_rate_limited();
                tracing::info!("Rate limited {} (retry after {:?})", client, retry_after);
                Err(Error::RateLimited { retry_after })
            }
        }
    }

    /// Parse and validate a JSON request body.
    pub fn validate(&self, body: &[u8]) -> Result<CompilationRequest> {
        let request = CompileRequest::from_json(body)?
            .validate(&self.config.limits, &self.config.compiler)?;
        Ok(request)
    }

    /// Compile a validated request and store its result.
    ///
    /// Every stored result gets an id, even one where all plugins failed,
    /// so its diagnostics stay retrievable until expiry.
    pub async fn compile(&self, request: CompilationRequest) -> Compilation {
        // Owned by this request until stored, so the orphan scan skips it
        let root = BuildDirs::for_request(&self.config.work_dir, request.id).root;
        let _in_flight = self.registry.claim(root);

        let result = self.orchestrator.run(request).await;

        self.stats.record_compilation(
            result.succeeded_count(),
            result.failed_count(),
            result.timed_out_count(),
        );

        let archive = match self.config.archive_policy {
            ArchivePolicy::Eager if result.has_modules() => {
                let path = result.root_dir.join(ARCHIVE_FILE_NAME);
                match self.packager.write_cached(&result, &path).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to prebuild archive for {}: {}",
                            result.request_id,
                            e
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let archive_size = match &archive {
            Some(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            None => None,
        };

        let stored = self
            .registry
            .store_with_archive(result.clone(), archive)
            .await;

        Compilation {
            archive_name: result
                .has_modules()
                .then(|| archive_file_name(&stored.compilation_id)),
            compilation_id: stored.compilation_id,
            result,
            created_at: stored.created_at,
            expires_at: stored.expires_at,
            archive_size,
        }
    }

    /// Validate then compile.
    pub async fn compile_json(&self, body: &[u8]) -> Result<Compilation> {
        let request = self.validate(body)?;
        Ok(self.compile(request).await)
    }

    /// Archive of a stored compilation.
    pub async fn download(&self, compilation_id: &str) -> Result<Archive> {
        let entry = self.registry.get(compilation_id).await?;
        self.packager.build(&entry).await
    }

    /// Metadata of a stored compilation.
    pub async fn info(&self, compilation_id: &str) -> Result<Compilation> {
        let entry = self.registry.get(compilation_id).await?;
        let archive_size = match &entry.archive_path {
            Some(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            None => None,
        };
        Ok(Compilation::from_entry(&entry, archive_size))
    }

    /// Remove a stored compilation and its files now.
    pub async fn delete(&self, compilation_id: &str) -> Result<()> {
        self.registry.delete(compilation_id).await
    }

    /// One retention pass as of `now`.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        self.sweeper.sweep(now).await
    }

    /// Start the periodic sweeper.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.sweeper.clone().spawn()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Entries currently in the registry.
    pub async fn active_compilations(&self) -> usize {
        self.registry.len().await
    }
}
