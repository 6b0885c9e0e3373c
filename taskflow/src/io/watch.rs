//! File-system notifications for the tasks directory.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Wakes the driver when a task record changes.
pub struct TaskWatcher {
    // Dropping the watcher stops the notifications.
    _watcher: PollWatcher,
    rx: Receiver<()>,
}

impl TaskWatcher {
    pub fn new(tasks_dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let mut watcher = PollWatcher::new(
            move |res: Result<NotifyEvent, notify::Error>| {
                if let Ok(event) = res
                    && is_record_change(&event)
                {
                    let _ = tx.send(());
                }
            },
            notify::Config::default().with_poll_interval(POLL_INTERVAL),
        )
        .context("create tasks watcher")?;
        watcher
            .watch(tasks_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", tasks_dir.display()))?;
        info!(path = %tasks_dir.display(), "watching tasks directory");
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Block until a record changes or `timeout` elapses. Returns whether a
    /// change was seen; queued duplicates are drained.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {
                while self.rx.try_recv().is_ok() {}
                debug!("woken by task change");
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Record writes only; lock and temp churn from our own transitions is noise.
fn is_record_change(event: &NotifyEvent) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event.paths.iter().any(|path| {
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        is_json && !hidden
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn event(path: &str) -> NotifyEvent {
        NotifyEvent {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn only_record_files_count() {
        assert!(is_record_change(&event("/w/tasks/t1.json")));
        assert!(!is_record_change(&event("/w/tasks/t1.lock")));
        assert!(!is_record_change(&event("/w/tasks/.t1.1.0.tmp")));
    }

    #[test]
    fn new_record_wakes_waiter() {
        let temp = tempfile::tempdir().expect("tempdir");
        let watcher = TaskWatcher::new(temp.path()).expect("watcher");
        assert!(!watcher.wait(Duration::from_millis(10)));
        fs::write(temp.path().join("t1.json"), "{}").expect("write");
        assert!(watcher.wait(Duration::from_secs(5)));
    }
}
