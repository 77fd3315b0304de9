//! Lifecycle of one plugin's compilation.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::compile::{Diagnostic, InvocationOutcome, parse_output};
use crate::result::{Artifact, PluginResult, PluginStatus};

/// Job state. `Succeeded`, `Failed` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

/// One compiler invocation for one plugin of a request.
#[derive(Debug)]
pub struct CompilationJob {
    pub id: String,
    pub plugin_name: String,
    pub source_path: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    diagnostics: Vec<Diagnostic>,
    log: String,
    module: Option<Artifact>,
    duration: Duration,
}

impl CompilationJob {
    pub fn new(
        request_id: impl std::fmt::Display,
        plugin_name: &str,
        source_path: PathBuf,
        include_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            id: format!("{request_id}:{plugin_name}"),
            plugin_name: plugin_name.to_string(),
            source_path,
            include_dirs,
            status: JobStatus::Created,
            started_at: None,
            finished_at: None,
            diagnostics: Vec::new(),
            log: String::new(),
            module: None,
            duration: Duration::ZERO,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// The compiler process is about to start.
    pub fn start(&mut self) {
        if self.status == JobStatus::Created {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Classify a finished invocation.
    ///
    /// `module` is the module file if it exists on disk. `log` is the
    /// compiler output, already stripped of build paths.
    pub fn complete(
        &mut self,
        outcome: &InvocationOutcome,
        log: String,
        module: Option<Artifact>,
        timeout: Duration,
    ) {
        if self.status.is_terminal() {
            return;
        }

        let parsed = parse_output(&log);
        let parsed_errors = parsed.error_count();
        let mut diagnostics = parsed.diagnostics;

        let status = if outcome.timed_out {
            diagnostics.insert(0, Diagnostic::timeout(timeout.as_secs()));
            JobStatus::TimedOut
        } else if outcome.success() {
            if module.is_some() {
                JobStatus::Succeeded
            } else {
                diagnostics.push(Diagnostic::simple(
                    "Compiler reported success but produced no module",
                ));
                JobStatus::Failed
            }
        } else {
            if parsed_errors == 0 {
                diagnostics.push(Diagnostic::simple(match outcome.exit_code {
                    Some(code) => format!("Compiler exited with code {code}"),
                    None => "Compiler was terminated by a signal".to_string(),
                }));
            }
            JobStatus::Failed
        };

        self.module = if status == JobStatus::Succeeded {
            module
        } else {
            None
        };
        self.diagnostics = diagnostics;
        self.log = log;
        self.duration = outcome.duration;
        self.finish(status);
    }

    /// The compiler could not be run at all. The message must not carry
    /// host paths; details belong in the server log.
    pub fn fail_internal(&mut self, message: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.diagnostics = vec![Diagnostic::simple(message)];
        self.finish(JobStatus::Failed);
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Freeze into the plugin-level result.
    pub fn into_result(self) -> PluginResult {
        let status = match self.status {
            JobStatus::Succeeded => PluginStatus::Succeeded,
            _ => PluginStatus::Failed,
        };
        PluginResult {
            name: self.plugin_name,
            job_id: self.id,
            status,
            timed_out: self.status == JobStatus::TimedOut,
            diagnostics: self.diagnostics,
            log: self.log,
            module: self.module,
            diagnostics_file: None,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration: self.duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Severity;
    use crate::result::ArtifactKind;

    fn job() -> CompilationJob {
        CompilationJob::new("req", "admin", PathBuf::from("admin.sma"), Vec::new())
    }

    fn outcome(exit_code: Option<i32>, timed_out: bool) -> InvocationOutcome {
        InvocationOutcome {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            timed_out,
            duration: Duration::from_millis(5),
        }
    }

    fn module() -> Option<Artifact> {
        Some(Artifact {
            kind: ArtifactKind::Module,
            path: PathBuf::from("admin.amxx"),
            size: 10,
        })
    }

    #[test]
    fn test_lifecycle_success() {
        let mut job = job();
        assert_eq!(job.id, "req:admin");
        assert_eq!(job.status(), JobStatus::Created);

        job.start();
        assert_eq!(job.status(), JobStatus::Running);

        let log = "admin.sma(3) : warning 217: loose indentation\n".to_string();
        job.complete(&outcome(Some(0), false), log, module(), Duration::from_secs(30));
        assert_eq!(job.status(), JobStatus::Succeeded);

        let result = job.into_result();
        assert!(result.succeeded());
        assert!(result.module.is_some());
        assert_eq!(result.diagnostics[0].severity, Severity::Warning);
        assert!(result.started_at.is_some() && result.finished_at.is_some());
    }

    #[test]
    fn test_timeout_is_failure_with_diagnostic() {
        let mut job = job();
        job.start();
        job.complete(&outcome(None, true), String::new(), None, Duration::from_secs(30));
        assert_eq!(job.status(), JobStatus::TimedOut);

        let result = job.into_result();
        assert_eq!(result.status, PluginStatus::Failed);
        assert!(result.timed_out);
        assert_eq!(
            result.diagnostics[0].message,
            "Compilation timed out after 30 seconds"
        );
    }

    #[test]
    fn test_nonzero_exit_without_parsed_errors() {
        let mut job = job();
        job.start();
        job.complete(&outcome(Some(2), false), "garbage".to_string(), None, Duration::from_secs(1));

        let result = job.into_result();
        assert_eq!(result.status, PluginStatus::Failed);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].message, "Compiler exited with code 2");
        assert_eq!(result.log, "garbage");
    }

    #[test]
    fn test_success_without_module_fails() {
        let mut job = job();
        job.start();
        job.complete(&outcome(Some(0), false), String::new(), None, Duration::from_secs(1));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_module_dropped_on_failure() {
        let mut job = job();
        job.start();
        let log = "admin.sma(1) : error 010: invalid function".to_string();
        job.complete(&outcome(Some(1), false), log, module(), Duration::from_secs(1));

        let result = job.into_result();
        assert!(result.module.is_none());
        assert_eq!(result.error_count(), 1);
        // Parsed errors replace the generic exit code message
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code.as_deref(), Some("010"));
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut job = job();
        job.start();
        job.fail_internal("Internal error");
        assert_eq!(job.status(), JobStatus::Failed);

        job.complete(&outcome(Some(0), false), String::new(), module(), Duration::from_secs(1));
        job.start();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.into_result().module.is_none());
    }
}
