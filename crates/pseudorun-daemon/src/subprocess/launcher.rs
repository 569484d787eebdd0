//! Compiler process lifecycle.
//!
//! Resolves the compiler binary, spawns it with piped stdout/stderr, and
//! handles graceful shutdown. The compiler never receives interactive data on
//! stdin, so stdin is closed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// What to run.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Compiler binary; bare names are looked up on `PATH`.
    pub executable: PathBuf,
    /// Extra arguments.
    pub args: Vec<String>,
    /// Working directory; defaults to the executable's directory.
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_directory: None,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Launches compiler processes, at most `max_processes` alive at once.
#[derive(Debug)]
pub struct ProcessLauncher {
    permits: Arc<Semaphore>,
    max_processes: usize,
}

impl ProcessLauncher {
    pub fn new(max_processes: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_processes)),
            max_processes,
        }
    }

    /// Spawn a compiler process.
    ///
    /// The returned handle holds a pool slot until it is dropped.
    pub fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle, LaunchError> {
        self.reserve()?.spawn(spec)
    }

    /// Claim a pool slot without spawning anything yet.
    ///
    /// Lets a caller prepare the compiler's shared files only once it is
    /// certain to run. Dropping the slot unused releases it.
    pub fn reserve(&self) -> Result<ProcessSlot, LaunchError> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| LaunchError::PoolExhausted {
                max: self.max_processes,
            })?;
        Ok(ProcessSlot { permit })
    }

    /// Number of launched processes whose handles are still alive.
    pub fn active_count(&self) -> usize {
        self.max_processes
            .saturating_sub(self.permits.available_permits())
    }

    pub const fn capacity(&self) -> usize {
        self.max_processes
    }
}

/// A reserved pool slot, consumed by [`ProcessSlot::spawn`].
#[derive(Debug)]
pub struct ProcessSlot {
    permit: OwnedSemaphorePermit,
}

impl ProcessSlot {
    /// Spawn the compiler in this slot.
    ///
    /// On failure the slot is released.
    pub fn spawn(self, spec: &LaunchSpec) -> Result<ProcessHandle, LaunchError> {
        let executable = resolve_executable(&spec.executable)?;
        let working_dir = match &spec.working_directory {
            Some(dir) => dir.clone(),
            None => executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        if !working_dir.is_dir() {
            return Err(LaunchError::WorkingDirectoryNotFound { path: working_dir });
        }

        let mut cmd = Command::new(&executable);
        cmd.current_dir(&working_dir)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();
        info!(
            process_id = %id,
            pid,
            executable = %executable.display(),
            working_dir = %working_dir.display(),
            "Spawned compiler process"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::SpawnFailed {
                reason: "Failed to capture stdout".to_string(),
            })?;
        let stderr = child.stderr.take();

        Ok(ProcessHandle {
            id,
            pid,
            child,
            stdout: Some(stdout),
            stderr,
            _permit: self.permit,
        })
    }
}

/// Resolve the compiler path.
///
/// Absolute paths are used as-is, relative paths containing a separator are
/// resolved against the current directory, and bare names are searched on `PATH`.
pub fn resolve_executable(path: &Path) -> Result<PathBuf, LaunchError> {
    let not_found = || LaunchError::ExecutableNotFound {
        path: path.to_path_buf(),
    };

    if path.is_absolute() || path.components().count() > 1 {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| LaunchError::SpawnFailed {
                    reason: format!("Cannot determine current directory: {e}"),
                })?
                .join(path)
        };
        return executable_candidates(&resolved)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(not_found);
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .flat_map(|dir| executable_candidates(&dir.join(path)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

#[cfg(windows)]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    if path.extension().is_some() {
        vec![path.to_path_buf()]
    } else {
        vec![path.to_path_buf(), path.with_extension("exe")]
    }
}

#[cfg(not(windows))]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    vec![path.to_path_buf()]
}

/// Handle to a running compiler process.
///
/// Dropping the handle kills the process and frees its pool slot.
#[derive(Debug)]
pub struct ProcessHandle {
    id: String,
    pid: Option<u32>,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    _permit: OwnedSemaphorePermit,
}

impl ProcessHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to exit. `None` means it was killed by a signal.
    pub async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        debug!(process_id = %self.id, ?status, "Compiler process exited");
        Ok(status.code())
    }

    /// Terminate the process: SIGINT first, SIGKILL once `timeout` elapses.
    ///
    /// Returns the exit code once the process has been reaped.
    pub async fn terminate(&mut self, timeout: Duration) -> Option<i32> {
        debug!(process_id = %self.id, pid = self.pid, "Terminating compiler process");

        if !self.interrupt() {
            return self.kill().await;
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(process_id = %self.id, ?status, "Process exited gracefully");
                status.code()
            }
            Ok(Err(e)) => {
                warn!(process_id = %self.id, error = %e, "Error waiting for process");
                self.kill().await
            }
            Err(_) => {
                warn!(process_id = %self.id, "Timeout waiting for graceful shutdown, killing");
                self.kill().await
            }
        }
    }

    /// Send SIGINT. Returns `false` when there is nothing to signal.
    #[cfg(unix)]
    fn interrupt(&self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // `id()` is `None` once the child has been reaped.
        let Some(raw) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGINT) {
            warn!(process_id = %self.id, pid = raw, error = %e, "Failed to send SIGINT");
            return false;
        }
        true
    }

    #[cfg(not(unix))]
    const fn interrupt(&self) -> bool {
        false
    }

    async fn kill(&mut self) -> Option<i32> {
        if let Err(e) = self.child.kill().await {
            warn!(process_id = %self.id, error = %e, "Failed to kill process");
        }
        match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(process_id = %self.id, error = %e, "Failed to reap process");
                None
            }
        }
    }
}

/// Errors from launching a compiler process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Compiler process pool exhausted (max {max})")]
    PoolExhausted { max: usize },

    #[error("Compiler executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("Working directory not found: {}", path.display())]
    WorkingDirectoryNotFound { path: PathBuf },

    #[error("Failed to spawn compiler: {reason}")]
    SpawnFailed { reason: String },
}
