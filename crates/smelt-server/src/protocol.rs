//! JSON response types.
//!
//! Request bodies are parsed by [`smelt_core::CompileRequest`]; this module
//! only shapes what goes back out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use smelt_core::{Compilation, Diagnostic, PluginResult, PluginStatus, ServiceConfig, StatsSnapshot};

/// Response of `POST /compile` and `GET /info/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResponse {
    pub compilation_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub summary: Summary,
    pub results: Vec<PluginReport>,
    pub download: Option<DownloadInfo>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// Outcome of one plugin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginReport {
    pub name: String,
    pub status: PluginStatus,
    pub timed_out: bool,
    pub errors: usize,
    pub warnings: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub log: String,
    pub module_available: bool,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub url: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl From<&PluginResult> for PluginReport {
    fn from(plugin: &PluginResult) -> Self {
        Self {
            name: plugin.name.clone(),
            status: plugin.status,
            timed_out: plugin.timed_out,
            errors: plugin.error_count(),
            warnings: plugin.warning_count(),
            diagnostics: plugin.diagnostics.clone(),
            log: plugin.log.clone(),
            module_available: plugin.module.is_some(),
            size_bytes: plugin.module.as_ref().map_or(0, |m| m.size),
            duration_ms: u64::try_from(plugin.duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<&Compilation> for CompilationResponse {
    fn from(compilation: &Compilation) -> Self {
        let result = &compilation.result;
        Self {
            compilation_id: compilation.compilation_id.clone(),
            created_at: compilation.created_at,
            expires_at: compilation.expires_at,
            summary: Summary {
                total: result.plugins.len(),
                succeeded: result.succeeded_count(),
                failed: result.failed_count(),
                timed_out: result.timed_out_count(),
            },
            results: result.plugins.iter().map(PluginReport::from).collect(),
            download: compilation
                .archive_name
                .as_ref()
                .map(|filename| DownloadInfo {
                    url: format!("/download/{}", compilation.compilation_id),
                    filename: filename.clone(),
                    size_bytes: compilation.archive_size,
                }),
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub limits: LimitsInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsInfo {
    pub max_plugins: usize,
    pub max_includes: usize,
    pub max_name_length: usize,
    pub max_body_bytes: usize,
    pub compile_timeout_seconds: u64,
    pub rate_limit_enabled: bool,
    pub rate_limit_count: usize,
    pub rate_limit_window_seconds: u64,
    pub workers: usize,
}

impl HealthResponse {
    pub fn new(config: &ServiceConfig, workers: usize) -> Self {
        Self {
            status: "healthy",
            service: "smelt",
            version: env!("CARGO_PKG_VERSION"),
            limits: LimitsInfo {
                max_plugins: config.limits.max_plugins,
                max_includes: config.limits.max_includes,
                max_name_length: config.limits.max_name_len,
                max_body_bytes: config.limits.max_body_bytes,
                compile_timeout_seconds: config.compile_timeout.as_secs(),
                rate_limit_enabled: config.rate_limit.enabled,
                rate_limit_count: config.rate_limit.max_requests,
                rate_limit_window_seconds: config.rate_limit.window.as_secs(),
                workers,
            },
        }
    }
}

/// Response of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    pub active_compilations: usize,
    pub workers_busy: usize,
    pub file_retention_seconds: u64,
    pub cleanup_interval_seconds: u64,
}
