//! Compiler toolchain lookup.
//!
//! The compiler is a pre-built external executable. This module only
//! finds it and records where it lives; it never builds or installs it.

use std::path::{Path, PathBuf};

use crate::config::CompilerConfig;
use crate::error::{Error, Result};

/// Environment variable overriding the compiler location.
pub const COMPILER_ENV: &str = "SMELT_COMPILER";

/// Executable name searched next to the current binary and on PATH.
pub const DEFAULT_COMPILER_NAME: &str = "amxxpc";

/// A located compiler plus its fixed include directory.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Path to the compiler executable.
    compiler_path: PathBuf,

    /// Server-side include directory, searched first.
    official_include_dir: Option<PathBuf>,
}

impl Toolchain {
    /// Locate the compiler.
    ///
    /// Looks in the following order:
    /// 1. `compiler_path` from the config
    /// 2. `SMELT_COMPILER` environment variable
    /// 3. Same directory as the current executable
    /// 4. System PATH
    pub fn locate(config: &CompilerConfig) -> Result<Self> {
        let compiler_path = match &config.compiler_path {
            Some(path) => Self::check_exists(path)?,
            None => Self::find_compiler()?,
        };

        if let Some(dir) = &config.official_include_dir
            && !dir.is_dir()
        {
            return Err(Error::Toolchain(format!(
                "include directory not found: {}",
                dir.display()
            )));
        }

        tracing::info!("Using compiler {}", compiler_path.display());

        Ok(Self {
            compiler_path,
            official_include_dir: config.official_include_dir.clone(),
        })
    }

    /// Build a toolchain from a known path without probing the filesystem.
    pub fn from_path(compiler_path: impl Into<PathBuf>) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            official_include_dir: None,
        }
    }

    /// Set the server-side include directory.
    pub fn with_official_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.official_include_dir = Some(dir.into());
        self
    }

    /// Get the compiler path.
    pub fn compiler_path(&self) -> &Path {
        &self.compiler_path
    }

    /// Get the server-side include directory.
    pub fn official_include_dir(&self) -> Option<&Path> {
        self.official_include_dir.as_deref()
    }

    /// Directory holding the compiler, exported as its library path.
    pub fn library_dir(&self) -> Option<&Path> {
        self.compiler_path.parent()
    }

    fn check_exists(path: &Path) -> Result<PathBuf> {
        if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::Toolchain(format!(
                "compiler not found: {}",
                path.display()
            )))
        }
    }

    fn find_compiler() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(COMPILER_ENV) {
            return Self::check_exists(Path::new(&path));
        }

        let name = if cfg!(windows) {
            format!("{DEFAULT_COMPILER_NAME}.exe")
        } else {
            DEFAULT_COMPILER_NAME.to_string()
        };

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidate = exe_dir.join(&name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        which::which(&name).map_err(|_| {
            Error::Toolchain(format!(
                "could not find '{name}'. Set {COMPILER_ENV} or pass --compiler."
            ))
        })
    }
}
