//! One external compiler invocation.
//!
//! The compiler runs as a child process in its own process group, so a
//! timeout can take down anything it forked. [`CompilerInvoker::invoke`]
//! always returns: the child and every process in its group are gone and
//! both output pipes are drained (or abandoned after a grace period)
//! before it does.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::toolchain::Toolchain;
use crate::error::{Error, Result};

/// How long to wait for output pipes to close once the process is gone.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What happened to one compiler process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Exit code. None when the process was killed or died from a signal.
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    /// The process hit the wall-clock limit and was killed.
    pub timed_out: bool,

    pub duration: Duration,
}

impl InvocationOutcome {
    /// Exited on its own with code 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let sep = if self.stdout.ends_with('\n') { "" } else { "\n" };
                format!("{}{sep}{}", self.stdout, self.stderr)
            }
        }
    }
}

/// Launches the compiler with a hard timeout.
#[derive(Debug, Clone)]
pub struct CompilerInvoker {
    toolchain: Toolchain,
}

impl CompilerInvoker {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Run `compiler <source file> [-i <dir>]*` from the source's directory.
    ///
    /// Returns `Err` only when the process could not be started or waited
    /// on; a failing or hanging compiler is a normal outcome.
    pub async fn invoke(
        &self,
        source_path: &Path,
        include_dirs: &[PathBuf],
        timeout: Duration,
    ) -> Result<InvocationOutcome> {
        let program = self.toolchain.compiler_path();
        let mut cmd = Command::new(program);

        // Relative source name keeps host paths out of the compiler's log
        match (source_path.parent(), source_path.file_name()) {
            (Some(dir), Some(file)) if !dir.as_os_str().is_empty() => {
                cmd.current_dir(dir).arg(file);
            }
            _ => {
                cmd.arg(source_path);
            }
        }
        for dir in include_dirs {
            cmd.arg("-i").arg(dir);
        }
        if let Some(lib_dir) = self.toolchain.library_dir() {
            cmd.env("LD_LIBRARY_PATH", lib_dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;
        let pid = child.id();

        tracing::debug!(
            "Spawned compiler pid={:?} for {}",
            pid,
            source_path.display()
        );

        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let waited = tokio::time::timeout(timeout, wait_for_exit(&mut child, pid)).await;

        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                drain(stdout_task).await;
                drain(stderr_task).await;
                return Err(Error::Io(e));
            }
            Err(_) => {
                tracing::warn!(
                    "Compiler timed out after {:?} for {}, killing pid={:?}",
                    timeout,
                    source_path.display(),
                    pid
                );
                terminate(&mut child, pid).await;
                (None, true)
            }
        };

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;
        let duration = start.elapsed();

        tracing::debug!(
            "Compiler pid={:?} finished: exit={:?} timed_out={} in {:?}",
            pid,
            exit_code,
            timed_out,
            duration
        );

        Ok(InvocationOutcome {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe
        && let Err(e) = pipe.read_to_end(&mut buf).await
    {
        tracing::debug!("Failed to read compiler output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collect a pipe reader, giving up if the pipe stays open.
async fn drain(mut task: JoinHandle<String>) -> String {
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Compiler output reader failed: {}", e);
            String::new()
        }
        Err(_) => {
            task.abort();
            tracing::warn!("Compiler output pipe still open after exit, abandoning");
            String::new()
        }
    }
}

/// Wait for the compiler to exit, then kill whatever it left running in its
/// group and reap it.
///
/// The group is killed while the exited leader is still a zombie: its pid,
/// and so the group id, cannot be reused by another process until it is
/// reaped.
#[cfg(unix)]
async fn wait_for_exit(child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
    if let Some(pid) = pid {
        tokio::task::spawn_blocking(move || wait_exit_unreaped(pid))
            .await
            .map_err(std::io::Error::other)??;
        kill_process_group(Some(pid));
    }
    child.wait().await
}

#[cfg(not(unix))]
async fn wait_for_exit(child: &mut Child, _pid: Option<u32>) -> std::io::Result<ExitStatus> {
    child.wait().await
}

/// Block until `pid` has exited without reaping it.
#[cfg(unix)]
fn wait_exit_unreaped(pid: u32) -> std::io::Result<()> {
    // SAFETY: siginfo_t is plain data; all-zero is a valid value.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: `info` outlives the call. WNOWAIT leaves the child
        // waitable, so tokio still reaps it through `Child::wait`.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                libc::id_t::from(pid),
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Kill the whole process group, then the child itself, and reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to kill compiler: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group was created by
    // process_group(0) at spawn, so its id is the child's pid.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH means the group is already empty, which is fine
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!("Failed to kill compiler process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
