//! A generic filesystem watcher.
//!
//! The reload controller only needs a stream of `(path, event)`
//! pairs, so the watcher interface is just an mpsc channel.  This is
//! the portable polling implementation: an mtime scan over the
//! watched paths on an interval.  Watching a directory covers the
//! files directly inside it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

/// What happened to a watched path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FsEvent {
    Created,
    Modified,
    Removed,
}

/// One filesystem change.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub event: FsEvent,
}

/// Start watching `paths`, polling every `interval`.  The state at
/// spawn time is the baseline: only changes after that are reported.
/// The watcher stops when the receiver is dropped.
pub fn spawn_poll_watcher(
    paths: Vec<PathBuf>,
    interval: Duration,
) -> mpsc::Receiver<WatchEvent> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut seen = HashMap::new();
        for path in &paths {
            scan(path, &mut seen);
        }

        loop {
            tokio::time::sleep(interval).await;

            let mut current = HashMap::new();
            for path in &paths {
                scan(path, &mut current);
            }

            for (path, mtime) in &current {
                let event = match seen.get(path) {
                    None => Some(FsEvent::Created),
                    Some(old) if old != mtime => Some(FsEvent::Modified),
                    Some(_) => None,
                };
                if let Some(event) = event {
                    if tx
                        .send(WatchEvent {
                            path: path.clone(),
                            event,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            for path in seen.keys() {
                if !current.contains_key(path) {
                    if tx
                        .send(WatchEvent {
                            path: path.clone(),
                            event: FsEvent::Removed,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            seen = current;
        }
    });

    rx
}

fn scan(path: &Path, into: &mut HashMap<PathBuf, SystemTime>) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    if metadata.is_dir() {
        let Ok(entries) = std::fs::read_dir(path) else {
            return;
        };
        for entry in entries.flatten() {
            if let Ok(entry_metadata) = entry.metadata() {
                if entry_metadata.is_file() {
                    into.insert(entry.path(), modified(&entry_metadata));
                }
            }
        }
    } else {
        into.insert(path.to_path_buf(), modified(&metadata));
    }
}

fn modified(metadata: &std::fs::Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn reports_created_files_in_watched_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut events = spawn_poll_watcher(vec![dir.path().to_path_buf()], POLL);

        std::fs::write(dir.path().join("reload"), b"x").unwrap();

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(dir.path().join("reload"), event.path);
        assert_eq!(FsEvent::Created, event.event);
    }

    #[tokio::test]
    async fn reports_modified_and_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.chf");
        std::fs::write(&file, b"one").unwrap();

        let mut events = spawn_poll_watcher(vec![file.clone()], POLL);

        // mtime granularity can be coarse; make sure it moves
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&file, b"two").unwrap();

        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(file, event.path);
        assert_eq!(FsEvent::Modified, event.event);

        std::fs::remove_file(&file).unwrap();
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(FsEvent::Removed, event.event);
    }
}
