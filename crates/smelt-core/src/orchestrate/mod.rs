//! Batch orchestration.
//!
//! Turns a validated [`CompilationRequest`] into a [`CompilationResult`]:
//! materializes sources and includes, runs one compiler job per plugin on
//! the shared [`WorkerPool`], and cleans scratch files so only artifacts
//! remain in the request directory.
//!
//! Jobs of one request run concurrently up to the pool size. Results are
//! always reported in submission order.

mod job;
mod pool;

pub use job::{CompilationJob, JobStatus};
pub use pool::{WorkerPool, WorkerSlot};

use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::fs;

use crate::compile::CompilerInvoker;
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::paths::{BuildDirs, remove_dir_if_exists, remove_file_if_exists};
use crate::request::{CompilationRequest, IncludeFile, Plugin, RequestId};
use crate::result::{Artifact, ArtifactKind, CompilationResult, PluginResult};

/// Diagnostic shown to clients when a job could not run. Details go to the
/// server log only.
pub const INTERNAL_FAILURE_MESSAGE: &str = "Internal error: the compiler could not be run";

/// Runs whole requests against the compiler.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    invoker: CompilerInvoker,
    pool: WorkerPool,
    work_dir: PathBuf,
    compile_timeout: Duration,
    source_extension: String,
    module_extension: String,
}

/// What every job of one request shares.
#[derive(Debug)]
struct JobContext {
    request_id: RequestId,
    invoker: CompilerInvoker,
    pool: WorkerPool,
    dirs: BuildDirs,
    timeout: Duration,
    source_extension: String,
    module_extension: String,
}

impl Orchestrator {
    pub fn new(invoker: CompilerInvoker, config: &ServiceConfig) -> Self {
        Self::with_pool(invoker, WorkerPool::new(config.worker_pool_size), config)
    }

    /// Use an existing pool, e.g. one shared with another orchestrator.
    pub fn with_pool(invoker: CompilerInvoker, pool: WorkerPool, config: &ServiceConfig) -> Self {
        Self {
            invoker,
            pool,
            work_dir: config.work_dir.clone(),
            compile_timeout: config.compile_timeout,
            source_extension: config.compiler.source_extension.clone(),
            module_extension: config.compiler.module_extension.clone(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn invoker(&self) -> &CompilerInvoker {
        &self.invoker
    }

    /// Compile every plugin of `request`.
    ///
    /// Never fails as a whole: any per-plugin problem, including one that
    /// prevents the compiler from running, is reported in that plugin's
    /// result. Returns only after every job reached a terminal state.
    pub async fn run(&self, request: CompilationRequest) -> CompilationResult {
        let created_at = Utc::now();
        let request_id = request.id;
        let dirs = BuildDirs::for_request(&self.work_dir, request_id);

        tracing::info!(
            "Compiling request {} ({} plugins)",
            request_id,
            request.plugins.len()
        );

        if let Err(e) = prepare_request_dir(&self.work_dir, request_id, &request.includes).await {
            tracing::warn!("Failed to prepare build directory for {}: {}", request_id, e);
            if let Err(e) = dirs.remove().await {
                tracing::warn!("Failed to remove {}: {}", dirs.root.display(), e);
            }
            let plugins = request
                .plugins
                .iter()
                .map(|plugin| internal_failure(request_id, &plugin.name))
                .collect();
            return CompilationResult {
                request_id,
                root_dir: dirs.root,
                plugins,
                created_at,
            };
        }

        let ctx = Arc::new(JobContext {
            request_id,
            invoker: self.invoker.clone(),
            pool: self.pool.clone(),
            dirs: dirs.clone(),
            timeout: self.compile_timeout,
            source_extension: self.source_extension.clone(),
            module_extension: self.module_extension.clone(),
        });

        let names: Vec<String> = request.plugins.iter().map(|p| p.name.clone()).collect();

        // Spawned so a dropped caller cannot leave a job half done
        let handles = request.plugins.into_iter().map(|plugin| {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.run_job(plugin).await })
        });

        let plugins = join_all(handles)
            .await
            .into_iter()
            .zip(names)
            .map(|(joined, name)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("Job {}:{} aborted: {}", request_id, name, e);
                    internal_failure(request_id, &name)
                }
            })
            .collect();

        if let Err(e) = remove_dir_if_exists(&dirs.include_dir).await {
            tracing::warn!("Failed to remove shared includes of {}: {}", request_id, e);
        }

        let result = CompilationResult {
            request_id,
            root_dir: dirs.root,
            plugins,
            created_at,
        };

        tracing::info!(
            "Request {} finished: {} succeeded, {} failed",
            request_id,
            result.succeeded_count(),
            result.failed_count()
        );

        result
    }
}

impl JobContext {
    async fn run_job(&self, plugin: Plugin) -> PluginResult {
        let job_dir = self.dirs.job_dir(&plugin.name);
        let source_path = job_dir.join(format!("{}.{}", plugin.name, self.source_extension));
        let module_path = job_dir.join(format!("{}.{}", plugin.name, self.module_extension));
        let private_include_dir = job_dir.join("include");

        // Official first, then shared, then the plugin's own
        let mut include_dirs = Vec::new();
        if let Some(dir) = self.invoker.toolchain().official_include_dir() {
            include_dirs.push(dir.to_path_buf());
        }
        include_dirs.push(self.dirs.include_dir.clone());
        if !plugin.includes.is_empty() {
            include_dirs.push(private_include_dir.clone());
        }

        let mut job = CompilationJob::new(self.request_id, &plugin.name, source_path, include_dirs);

        if let Err(e) = materialize(&job_dir, &job.source_path, &plugin, &private_include_dir).await
        {
            tracing::warn!("Failed to write sources for job {}: {}", job.id, e);
            job.fail_internal(INTERNAL_FAILURE_MESSAGE);
            return job.into_result();
        }

        let outcome = match self.pool.acquire().await {
            Ok(_slot) => {
                job.start();
                tracing::debug!("Job {} started", job.id);
                self.invoker
                    .invoke(&job.source_path, &job.include_dirs, self.timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = remove_file_if_exists(&job.source_path).await {
            tracing::warn!("Failed to remove source of job {}: {}", job.id, e);
        }
        if let Err(e) = remove_dir_if_exists(&private_include_dir).await {
            tracing::warn!("Failed to remove includes of job {}: {}", job.id, e);
        }

        match outcome {
            Ok(outcome) => {
                let log = scrub_paths(&outcome.combined_output(), &self.dirs.root);
                let module = module_artifact(&module_path).await;
                job.complete(&outcome, log, module, self.timeout);
            }
            Err(e) => {
                tracing::warn!("Failed to run compiler for job {}: {}", job.id, e);
                job.fail_internal(INTERNAL_FAILURE_MESSAGE);
            }
        }

        let mut result = job.into_result();
        tracing::debug!(
            "Job {} finished: {:?} in {:?}",
            result.job_id,
            result.status,
            result.duration
        );

        if !result.succeeded() {
            // Partial output of a failed compile is not an artifact
            if let Err(e) = remove_file_if_exists(&module_path).await {
                tracing::warn!("Failed to remove stray module of {}: {}", result.job_id, e);
            }
            let log_path = job_dir.join(format!("{}.log", result.name));
            match write_diagnostics_file(&log_path, &result).await {
                Ok(artifact) => result.diagnostics_file = Some(artifact),
                Err(e) => {
                    tracing::warn!("Failed to write log of {}: {}", result.job_id, e);
                }
            }
        }

        result
    }
}

/// Create the request directory and write the shared includes.
async fn prepare_request_dir(
    work_dir: &Path,
    request_id: RequestId,
    includes: &[IncludeFile],
) -> Result<()> {
    let dirs = BuildDirs::create(work_dir, request_id).await?;
    write_includes(&dirs.include_dir, includes).await
}

async fn write_includes(dir: &Path, includes: &[IncludeFile]) -> Result<()> {
    for include in includes {
        fs::write(dir.join(&include.name), &include.text).await?;
    }
    Ok(())
}

/// Write one plugin's source and private includes into its job directory.
async fn materialize(
    job_dir: &Path,
    source_path: &Path,
    plugin: &Plugin,
    private_include_dir: &Path,
) -> Result<()> {
    fs::create_dir_all(job_dir).await?;
    if !plugin.includes.is_empty() {
        fs::create_dir_all(private_include_dir).await?;
        write_includes(private_include_dir, &plugin.includes).await?;
    }
    fs::write(source_path, &plugin.source).await?;
    Ok(())
}

/// The module file, if the compiler left a regular file behind.
async fn module_artifact(path: &Path) -> Option<Artifact> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(Artifact {
            kind: ArtifactKind::Module,
            path: path.to_path_buf(),
            size: meta.len(),
        }),
        _ => None,
    }
}

/// Persist a failed plugin's log so it can be shipped in the archive.
async fn write_diagnostics_file(path: &Path, result: &PluginResult) -> Result<Artifact> {
    let text = if result.log.trim().is_empty() {
        result
            .diagnostics
            .iter()
            .map(|d| format!("{}\n", d))
            .collect::<String>()
    } else {
        result.log.clone()
    };
    fs::write(path, &text).await?;
    Ok(Artifact {
        kind: ArtifactKind::Diagnostics,
        path: path.to_path_buf(),
        size: text.len() as u64,
    })
}

/// Strip the request directory from compiler output.
fn scrub_paths(log: &str, root: &Path) -> String {
    let root = root.display().to_string();
    if root.is_empty() {
        return log.to_string();
    }
    log.replace(&format!("{root}{MAIN_SEPARATOR}"), "")
        .replace(&root, ".")
}

fn internal_failure(request_id: RequestId, plugin_name: &str) -> PluginResult {
    let mut job = CompilationJob::new(request_id, plugin_name, PathBuf::new(), Vec::new());
    job.fail_internal(INTERNAL_FAILURE_MESSAGE);
    job.into_result()
}
