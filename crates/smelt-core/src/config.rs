//! Service configuration.
//!
//! Every tunable of the service lives here. The CLI fills these in from
//! flags and environment variables; tests build them directly.

use std::path::PathBuf;
use std::time::Duration;

/// Request shape limits.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum plugins per compile request.
    pub max_plugins: usize,

    /// Maximum includes per request (shared), and per plugin.
    pub max_includes: usize,

    /// Maximum length of a plugin or include name.
    pub max_name_len: usize,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_plugins: 10,
            max_includes: 10,
            max_name_len: 64,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Sliding window rate limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether admission control is applied at all.
    pub enabled: bool,

    /// Length of the sliding window.
    pub window: Duration,

    /// Requests admitted per client per window.
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(120),
            max_requests: 10,
        }
    }
}

/// External compiler settings.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Explicit compiler executable. If None, the toolchain lookup decides.
    pub compiler_path: Option<PathBuf>,

    /// Server-side include directory searched before user includes.
    pub official_include_dir: Option<PathBuf>,

    /// Extension given to materialized plugin sources.
    pub source_extension: String,

    /// Extension of the module the compiler writes beside the source.
    pub module_extension: String,

    /// Extension appended to include names that carry none.
    pub include_extension: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            compiler_path: None,
            official_include_dir: None,
            source_extension: "sma".to_string(),
            module_extension: "amxx".to_string(),
            include_extension: "inc".to_string(),
        }
    }
}

/// When download archives get built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchivePolicy {
    /// Build on every download.
    #[default]
    Lazy,
    /// Build once when the result is stored and serve the cached file.
    Eager,
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Request shape limits.
    pub limits: Limits,

    /// Wall-clock limit for one compiler invocation.
    pub compile_timeout: Duration,

    /// Admission control.
    pub rate_limit: RateLimitConfig,

    /// How long a stored compilation stays downloadable.
    pub retention: Duration,

    /// Period of the retention sweeper.
    pub sweep_interval: Duration,

    /// Maximum concurrent compiler processes across all requests.
    pub worker_pool_size: usize,

    /// Root under which per-request build directories are created.
    pub work_dir: PathBuf,

    /// External compiler settings.
    pub compiler: CompilerConfig,

    /// When download archives get built.
    pub archive_policy: ArchivePolicy,

    /// Add failed plugins' logs to the archive as text entries.
    pub include_diagnostics: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            compile_timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            retention: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            worker_pool_size: default_pool_size(),
            work_dir: std::env::temp_dir().join("smelt"),
            compiler: CompilerConfig::default(),
            archive_policy: ArchivePolicy::default(),
            include_diagnostics: false,
        }
    }
}

impl ServiceConfig {
    /// Config rooted at a specific work directory.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }
}

/// One worker per available CPU.
fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
