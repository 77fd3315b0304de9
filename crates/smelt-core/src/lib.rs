//! Core engine of the smelt plugin compiler service.
//!
//! This crate provides:
//! - Sliding window rate limiting per client
//! - Compiler lookup, invocation with a hard timeout, diagnostic parsing
//! - Request validation and batch orchestration on a bounded worker pool
//! - In-memory artifact registry with time-based retention
//! - Deterministic zip packaging of compiled modules

pub mod compile;
pub mod config;
pub mod error;
pub mod orchestrate;
pub mod package;
pub mod paths;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod result;
pub mod service;
pub mod stats;
pub mod sweeper;

pub use compile::{
    CompilerInvoker, Diagnostic, InvocationOutcome, ParsedOutput, Severity, Toolchain,
    parse_output,
};
pub use config::{ArchivePolicy, CompilerConfig, Limits, RateLimitConfig, ServiceConfig};
pub use error::{Error, Result};
pub use orchestrate::{CompilationJob, JobStatus, Orchestrator, WorkerPool};
pub use package::{Archive, ArchivePackager, archive_file_name};
pub use paths::BuildDirs;
pub use rate_limit::{Admission, RateLimiter};
pub use registry::{ArtifactRegistry, EntryGuard, InFlight, RegistryEntry};
pub use request::{CompilationRequest, CompileRequest, RequestId, ValidationError};
pub use result::{Artifact, ArtifactKind, CompilationResult, PluginResult, PluginStatus};
pub use service::{Compilation, CompileService};
pub use stats::{Stats, StatsSnapshot};
pub use sweeper::{RetentionSweeper, SweepReport};
