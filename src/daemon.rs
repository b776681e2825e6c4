//! Process control: pid files and stopping running daemons.
//!
//! A running daemon owns `<pid_dir>/pid_<name>`, a text file holding its pid.
//! The process stays in the foreground; whatever supervises it (a terminal,
//! systemd, the UI) is expected to detach it.
use crate::error::{AppResult, DaqError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Every pid file is named `pid_<daemon name>`.
pub const PID_PREFIX: &str = "pid_";

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(100);

/// `<dir>/pid_<name>`
pub fn pid_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{PID_PREFIX}{name}"))
}

/// Read the pid stored in `path`. `None` when the file is missing or does
/// not hold a usable pid.
pub fn read_pid(path: &Path) -> AppResult<Option<i32>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match text.lines().next().map(str::trim).map(str::parse::<i32>) {
        Some(Ok(pid)) if pid > 0 => Ok(Some(pid)),
        _ => {
            warn!("Ignoring unusable pid file {:?}", path);
            Ok(None)
        }
    }
}

#[cfg(unix)]
mod signals {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    pub fn is_alive(pid: i32) -> bool {
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            // Exists, but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub fn terminate(pid: i32) -> Result<(), String> {
        send(pid, Signal::SIGTERM)
    }

    pub fn kill_now(pid: i32) -> Result<(), String> {
        send(pid, Signal::SIGKILL)
    }

    fn send(pid: i32, signal: Signal) -> Result<(), String> {
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(format!("cannot send {:?} to {}: {}", signal, pid, e)),
        }
    }
}

#[cfg(not(unix))]
mod signals {
    pub fn is_alive(_pid: i32) -> bool {
        false
    }

    pub fn terminate(_pid: i32) -> Result<(), String> {
        Err("process control needs a Unix host".to_string())
    }

    pub fn kill_now(_pid: i32) -> Result<(), String> {
        Err("process control needs a Unix host".to_string())
    }
}

pub use signals::is_alive;

/// Our claim on `<dir>/pid_<name>`. The file is removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: i32,
}

impl PidFile {
    /// Claim the pid file. A live owner is an error unless `force` is set, in
    /// which case the owner is killed. A stale file is overwritten.
    pub fn acquire(dir: &Path, name: &str, force: bool) -> AppResult<Self> {
        fs::create_dir_all(dir)?;
        let path = pid_path(dir, name);
        let ours = std::process::id() as i32;

        if let Some(existing) = read_pid(&path)? {
            if existing != ours && is_alive(existing) {
                if !force {
                    return Err(DaqError::Daemon(format!(
                        "daemon '{}' is already running, PID {} (use --force to kill it)",
                        name, existing
                    )));
                }
                warn!("Found old daemon '{}' at PID {}, killing", name, existing);
                signals::kill_now(existing).map_err(DaqError::Daemon)?;
            } else {
                debug!("Replacing stale pid file {:?}", path);
            }
        }

        fs::write(&path, format!("{ours}\n"))?;
        info!("Daemon '{}' running as PID {} ({:?})", name, ours, path);
        Ok(Self { path, pid: ours })
    }

    /// Where the pid was written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Our own pid.
    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if nobody has claimed it since
        if let Ok(Some(pid)) = read_pid(&self.path) {
            if pid == self.pid {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to remove pid file {:?}: {}", self.path, e);
                }
            }
        }
    }
}

/// Result of stopping one daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pid file, or one with nothing usable in it
    NoPidFile,
    /// The recorded process was already gone
    NotRunning {
        /// Pid found in the file
        pid: i32,
    },
    /// Signalled; `killed` when SIGTERM was not enough
    Stopped {
        /// Pid that was signalled
        pid: i32,
        /// SIGKILL was needed
        killed: bool,
    },
}

/// Stop the daemon recorded in `<dir>/pid_<name>` and remove its pid file.
pub async fn stop_daemon(dir: &Path, name: &str) -> AppResult<StopOutcome> {
    let path = pid_path(dir, name);
    let outcome = match read_pid(&path)? {
        None => StopOutcome::NoPidFile,
        Some(pid) if !is_alive(pid) => StopOutcome::NotRunning { pid },
        Some(pid) => {
            signals::terminate(pid).map_err(DaqError::Daemon)?;
            tokio::time::sleep(TERM_GRACE).await;
            let killed = is_alive(pid);
            if killed {
                signals::kill_now(pid).map_err(DaqError::Daemon)?;
            }
            StopOutcome::Stopped { pid, killed }
        }
    };

    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    info!("Stop '{}': {:?}", name, outcome);
    Ok(outcome)
}

/// Stop every daemon with a pid file in `dir`, then remove `dir` if empty.
pub async fn stop_all(dir: &Path) -> AppResult<Vec<(String, StopOutcome)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let file_name = entry?.file_name();
        if let Some(name) = file_name.to_str().and_then(|f| f.strip_prefix(PID_PREFIX)) {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut stopped = Vec::with_capacity(names.len());
    for name in names {
        let outcome = stop_daemon(dir, &name).await?;
        stopped.push((name, outcome));
    }

    if fs::remove_dir(dir).is_err() {
        debug!("Leaving non-empty pid directory {:?}", dir);
    }
    Ok(stopped)
}
