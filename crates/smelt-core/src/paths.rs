//! Build directory management.
//!
//! Every accepted request gets its own directory under the work dir, so
//! concurrent requests never collide on file names:
//!
//! ```text
//! <work_dir>/
//! └── smelt_build_<request id>/
//!     ├── include/          # Shared includes (scratch)
//!     ├── build/
//!     │   └── <plugin>/     # One job directory per plugin
//!     │       ├── include/  # Per-plugin includes (scratch)
//!     │       ├── <plugin>.sma   (scratch)
//!     │       ├── <plugin>.amxx  (artifact)
//!     │       └── <plugin>.log   (artifact, failed plugins only)
//!     └── archive.zip       # Cached archive (eager policy only)
//! ```

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;
use crate::request::RequestId;

/// Prefix of every per-request directory. The sweeper relies on it to
/// recognise orphans.
pub const BUILD_DIR_PREFIX: &str = "smelt_build_";

/// File name of a cached archive inside a request directory.
pub const ARCHIVE_FILE_NAME: &str = "archive.zip";

/// Directory structure for one request.
#[derive(Debug, Clone)]
pub struct BuildDirs {
    /// The request directory itself.
    pub root: PathBuf,

    /// Shared include directory.
    pub include_dir: PathBuf,

    /// Parent of all job directories.
    pub build_dir: PathBuf,
}

impl BuildDirs {
    /// Compute the layout for a request without touching the disk.
    pub fn for_request(work_dir: &Path, request_id: RequestId) -> Self {
        let root = work_dir.join(format!("{BUILD_DIR_PREFIX}{request_id}"));
        Self {
            include_dir: root.join("include"),
            build_dir: root.join("build"),
            root,
        }
    }

    /// Create the request directory structure.
    pub async fn create(work_dir: &Path, request_id: RequestId) -> Result<Self> {
        let dirs = Self::for_request(work_dir, request_id);
        fs::create_dir_all(&dirs.include_dir).await?;
        fs::create_dir_all(&dirs.build_dir).await?;
        Ok(dirs)
    }

    /// Directory for one plugin's job.
    pub fn job_dir(&self, plugin_name: &str) -> PathBuf {
        self.build_dir.join(plugin_name)
    }

    /// Location of the cached archive.
    pub fn archive_path(&self) -> PathBuf {
        self.root.join(ARCHIVE_FILE_NAME)
    }

    /// Remove the whole request directory. Missing directories are fine.
    pub async fn remove(&self) -> Result<()> {
        remove_dir_if_exists(&self.root).await
    }
}

/// `remove_dir_all` that treats "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `remove_file` that treats "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
