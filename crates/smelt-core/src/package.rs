//! Download archives.
//!
//! Archives are deterministic: entries follow submission order and every
//! entry carries the same fixed timestamp and permissions, so packaging
//! the same result twice yields identical bytes.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tokio::fs;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::registry::RegistryEntry;
use crate::result::CompilationResult;

/// Download file name for a compilation.
pub fn archive_file_name(compilation_id: &str) -> String {
    format!("compiled_plugins_{compilation_id}.zip")
}

/// A finished archive held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Builds zip archives from stored results. Never mutates the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchivePackager {
    include_diagnostics: bool,
}

impl ArchivePackager {
    pub fn new(include_diagnostics: bool) -> Self {
        Self {
            include_diagnostics,
        }
    }

    /// Archive for a registry entry, from its cache when one exists.
    pub async fn build(&self, entry: &RegistryEntry) -> Result<Archive> {
        let file_name = archive_file_name(&entry.compilation_id);

        if let Some(cached) = &entry.archive_path {
            match fs::read(cached).await {
                Ok(bytes) => return Ok(Archive { file_name, bytes }),
                Err(e) => {
                    tracing::warn!(
                        "Cached archive of {} unreadable, rebuilding: {}",
                        entry.compilation_id,
                        e
                    );
                }
            }
        }

        let bytes = self.bundle(&entry.compilation_id, &entry.result).await?;
        Ok(Archive { file_name, bytes })
    }

    /// Build the archive and write it to `path`, for the eager policy.
    pub async fn write_cached(&self, result: &CompilationResult, path: &Path) -> Result<PathBuf> {
        let bytes = self.bundle(&result.request_id.to_string(), result).await?;
        fs::write(path, &bytes).await?;
        Ok(path.to_path_buf())
    }

    /// Zip every successful module, plus failed plugins' logs when
    /// diagnostics are enabled.
    ///
    /// Fails with [`Error::NoArtifacts`] when no plugin succeeded.
    pub async fn bundle(&self, id: &str, result: &CompilationResult) -> Result<Vec<u8>> {
        if !result.has_modules() {
            return Err(Error::NoArtifacts(id.to_string()));
        }

        let mut files = Vec::new();
        for plugin in &result.plugins {
            let artifact = match (&plugin.module, &plugin.diagnostics_file) {
                (Some(module), _) => module,
                (None, Some(log)) if self.include_diagnostics => log,
                _ => continue,
            };
            let Some(name) = artifact.path.file_name() else {
                continue;
            };
            let bytes = fs::read(&artifact.path).await?;
            files.push((name.to_string_lossy().into_owned(), bytes));
        }

        write_zip(&files)
    }
}

fn write_zip(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}
