//! External compiler integration.
//!
//! This module provides:
//! - Toolchain lookup (where the compiler executable lives)
//! - Invocation (one child process with a hard timeout)
//! - Diagnostic parsing (compiler log → structured diagnostics)
//!
//! # Architecture
//!
//! ```text
//! source.sma ──► CompilerInvoker ──► compiler process (own process group)
//!                      │                      │
//!                      │                      ├── exit 0 ──► source.amxx
//!                      │                      └── exit ≠ 0 / timeout
//!                      ▼
//!              InvocationOutcome ──► parse_output ──► Vec<Diagnostic>
//! ```

mod diagnostics;
mod invoker;
mod toolchain;

pub use diagnostics::{Diagnostic, ParsedOutput, Severity, parse_output};
pub use invoker::{CompilerInvoker, InvocationOutcome};
pub use toolchain::{COMPILER_ENV, DEFAULT_COMPILER_NAME, Toolchain};
