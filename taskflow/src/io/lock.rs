//! Per-task advisory locks (`<task_id>.lock`, created exclusively).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct TaskLock {
    path: PathBuf,
}

/// Outcome of a bounded acquisition attempt.
#[derive(Debug)]
pub enum Acquire {
    Held(TaskLock),
    TimedOut,
}

impl TaskLock {
    /// Create `path` exclusively, retrying until `timeout` elapses.
    ///
    /// The lock file records the holder's pid so that recovery can tell a
    /// crashed holder from a live one.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Acquire> {
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .with_context(|| format!("write lock {}", path.display()))?;
                    return Ok(Acquire::Held(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        debug!(lock = %path.display(), "lock acquisition timed out");
                        return Ok(Acquire::TimedOut);
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create lock {}", path.display()));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(lock = %self.path.display(), err = %err, "failed to release lock");
        }
    }
}

/// Remove lock files in `dir` left behind by dead processes or older than
/// `max_age`. Returns the removed paths.
pub fn clear_stale_locks(dir: &Path, max_age: Duration) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("lock") {
            continue;
        }
        if !is_stale(&path, max_age) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(lock = %path.display(), "removed stale lock");
                removed.push(path);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove lock {}", path.display()));
            }
        }
    }
    removed.sort();
    Ok(removed)
}

fn is_stale(path: &Path, max_age: Duration) -> bool {
    let holder = fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    if let Some(pid) = holder
        && !process_alive(pid)
    {
        return true;
    }
    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());
    age.is_some_and(|age| age >= max_age)
}

/// Whether a process with `pid` currently exists.
///
/// Signal 0 probes without delivering anything: `ESRCH` means gone, `EPERM`
/// means alive under another user.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid == std::process::id()
}
