//! Outcome of a compiled batch.
//!
//! A [`CompilationResult`] is produced by the orchestrator and then owned
//! by the artifact registry for the rest of its life, together with the
//! request directory holding its artifacts.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::compile::{Diagnostic, Severity};
use crate::request::RequestId;

/// Plugin-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Succeeded,
    Failed,
}

/// What an artifact file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Compiled binary module.
    Module,
    /// Compiler log of a failed plugin.
    Diagnostics,
}

/// A file on disk belonging to exactly one compilation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size: u64,
}

/// Final state of one plugin's job.
#[derive(Debug, Clone)]
pub struct PluginResult {
    pub name: String,

    /// `<request id>:<plugin name>`.
    pub job_id: String,

    pub status: PluginStatus,

    /// Killed for exceeding the compile timeout.
    pub timed_out: bool,

    pub diagnostics: Vec<Diagnostic>,

    /// Raw compiler output with build paths stripped.
    pub log: String,

    /// Compiled module, present only when `status` is `Succeeded`.
    pub module: Option<Artifact>,

    /// Log file, present only for failed plugins.
    pub diagnostics_file: Option<Artifact>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub duration: Duration,
}

impl PluginResult {
    pub fn succeeded(&self) -> bool {
        self.status == PluginStatus::Succeeded
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity.is_error())
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }
}

/// Every plugin of one request, in submission order.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub request_id: RequestId,

    /// Request directory owning all artifacts below.
    pub root_dir: PathBuf,

    pub plugins: Vec<PluginResult>,

    pub created_at: DateTime<Utc>,
}

impl CompilationResult {
    pub fn succeeded_count(&self) -> usize {
        self.plugins.iter().filter(|p| p.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.plugins.len() - self.succeeded_count()
    }

    pub fn timed_out_count(&self) -> usize {
        self.plugins.iter().filter(|p| p.timed_out).count()
    }

    /// Successful modules, in submission order.
    pub fn modules(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.plugins
            .iter()
            .filter_map(|p| p.module.as_ref().map(|m| (p.name.as_str(), m)))
    }

    pub fn has_modules(&self) -> bool {
        self.modules().next().is_some()
    }
}
