//! Serve command implementation for Smelt CLI.
//!
//! Every setting has a flag and an environment variable fallback.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use smelt_core::{ArchivePolicy, CompileService, ServiceConfig};
use smelt_server::ServerConfig;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host address to bind to
    #[arg(long, env = "SMELT_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "SMELT_PORT", default_value_t = 8000)]
    port: u16,

    /// Use the first X-Forwarded-For hop as the client identity
    #[arg(long, env = "SMELT_TRUST_FORWARDED")]
    trust_forwarded: bool,

    /// Compiler executable (default: next to this binary, then PATH)
    #[arg(long, env = "SMELT_COMPILER")]
    compiler: Option<PathBuf>,

    /// Server-side include directory, searched before request includes
    #[arg(long, env = "SMELT_INCLUDE_DIR")]
    include_dir: Option<PathBuf>,

    /// Directory for per-request build directories
    #[arg(long, env = "SMELT_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Maximum concurrent compiler processes (default: CPU count)
    #[arg(long, env = "SMELT_WORKERS")]
    workers: Option<usize>,

    /// Maximum plugins per request
    #[arg(long, env = "SMELT_MAX_PLUGINS_PER_REQUEST", default_value_t = 10)]
    max_plugins: usize,

    /// Maximum include files per request (and per plugin)
    #[arg(long, env = "SMELT_MAX_INCLUDES_PER_REQUEST", default_value_t = 10)]
    max_includes: usize,

    /// Maximum request body size in bytes
    #[arg(long, env = "SMELT_MAX_BODY_BYTES", default_value_t = 16 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Per-plugin compile timeout in seconds
    #[arg(long, env = "SMELT_COMPILE_TIMEOUT", default_value_t = 30)]
    compile_timeout: u64,

    /// Rate limit window in seconds
    #[arg(long, env = "SMELT_RATE_LIMIT_WINDOW", default_value_t = 120)]
    rate_limit_window: u64,

    /// Compilations allowed per client per window
    #[arg(long, env = "SMELT_RATE_LIMIT_COUNT", default_value_t = 10)]
    rate_limit_count: usize,

    /// Disable rate limiting
    #[arg(long, env = "SMELT_NO_RATE_LIMIT")]
    no_rate_limit: bool,

    /// Seconds a compilation stays downloadable
    #[arg(long, env = "SMELT_FILE_RETENTION_TIME", default_value_t = 600)]
    retention: u64,

    /// Seconds between cleanup sweeps
    #[arg(long, env = "SMELT_CLEANUP_INTERVAL", default_value_t = 300)]
    cleanup_interval: u64,

    /// Build archives when compiling instead of on download
    #[arg(long, env = "SMELT_EAGER_ARCHIVES")]
    eager_archives: bool,

    /// Add failed plugins' compiler logs to archives
    #[arg(long, env = "SMELT_INCLUDE_DIAGNOSTICS")]
    include_diagnostics: bool,
}

impl ServeArgs {
    fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();

        config.limits.max_plugins = self.max_plugins;
        config.limits.max_includes = self.max_includes;
        config.limits.max_body_bytes = self.max_body_bytes;
        config.compile_timeout = Duration::from_secs(self.compile_timeout);

        config.rate_limit.enabled = !self.no_rate_limit;
        config.rate_limit.window = Duration::from_secs(self.rate_limit_window);
        config.rate_limit.max_requests = self.rate_limit_count;

        config.retention = Duration::from_secs(self.retention);
        config.sweep_interval = Duration::from_secs(self.cleanup_interval.max(1));

        if let Some(workers) = self.workers {
            config.worker_pool_size = workers;
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }

        config.compiler.compiler_path = self.compiler.clone();
        config.compiler.official_include_dir = self.include_dir.clone();

        if self.eager_archives {
            config.archive_policy = ArchivePolicy::Eager;
        }
        config.include_diagnostics = self.include_diagnostics;

        config
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            trust_forwarded: self.trust_forwarded,
        }
    }
}

/// Start the compile server.
pub async fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.service_config();
    let service = CompileService::new(config)?;

    let server_config = args.server_config();
    println!("\nSmelt - plugin compile server");
    println!("{}", "─".repeat(50));
    println!(
        "  ◆ Compiler: {}",
        service.config().compiler.compiler_path.as_ref().map_or_else(
            || "auto".to_string(),
            |p| p.display().to_string()
        )
    );
    println!(
        "  ◆ Server:   http://{}:{}",
        server_config.host, server_config.port
    );
    println!("  ◆ Workers:  {}", service.pool().size());
    println!("{}", "─".repeat(50));
    println!("Press Ctrl+C to stop");
    println!();

    smelt_server::serve(service, server_config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ServeArgs,
    }

    fn parse(argv: &[&str]) -> ServeArgs {
        let mut full = vec!["smelt"];
        full.extend_from_slice(argv);
        Wrapper::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        let config = args.service_config();
        assert_eq!(config.limits.max_plugins, 10);
        assert_eq!(config.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit.window, Duration::from_secs(120));
        assert_eq!(config.retention, Duration::from_secs(600));
        assert_eq!(config.archive_policy, ArchivePolicy::Lazy);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_every_flag_has_env_fallback() {
        let command = Wrapper::command();
        let missing: Vec<_> = command
            .get_arguments()
            .filter(|arg| !matches!(arg.get_id().as_str(), "help" | "version"))
            .filter(|arg| arg.get_env().is_none())
            .map(|arg| arg.get_id().to_string())
            .collect();
        assert!(missing.is_empty(), "no env fallback: {missing:?}");
    }

    #[test]
    fn test_flags() {
        let args = parse(&[
            "--port",
            "9000",
            "--workers",
            "3",
            "--compile-timeout",
            "5",
            "--no-rate-limit",
            "--eager-archives",
            "--work-dir",
            "/srv/smelt",
        ]);
        let config = args.service_config();
        assert_eq!(args.server_config().port, 9000);
        assert_eq!(config.worker_pool_size, 3);
        assert_eq!(config.compile_timeout, Duration::from_secs(5));
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.archive_policy, ArchivePolicy::Eager);
        assert_eq!(config.work_dir, PathBuf::from("/srv/smelt"));
    }
}
