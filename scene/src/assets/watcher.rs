use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};

use super::FileSystemSource;
use crate::error::AssetError;

/// Polls an asset directory and reports changed asset paths.
///
/// A path is reported once it has been quiet for the settle delay, and at
/// most once per [`poll`](Self::poll) however many writes it saw.
pub struct AssetWatcher {
    _watcher: PollWatcher,
    root: FileSystemSource,
    changes: Receiver<notify::Event>,
    pending: HashMap<String, Instant>,
    settle: Duration,
}

impl AssetWatcher {
    pub fn new(root: &Path, poll_interval: Duration, settle: Duration) -> Result<Self, AssetError> {
        let root = root.canonicalize().map_err(|source| AssetError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let (tx, rx): (Sender<notify::Event>, _) = crossbeam_channel::unbounded();

        let config = notify::Config::default().with_poll_interval(poll_interval);
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(err) => log::warn!("AssetWatcher: {err}"),
            },
            config,
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        log::info!("AssetWatcher: watching {root:?} every {poll_interval:?}");

        Ok(Self {
            _watcher: watcher,
            root: FileSystemSource::new(root),
            changes: rx,
            pending: HashMap::new(),
            settle,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.root()
    }

    /// Number of changed paths still settling.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drains watcher events and returns the paths that have settled by `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<String> {
        for event in self.changes.try_iter() {
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }
            for file in event.paths.iter().filter(|file| file.is_file()) {
                if let Some(path) = self.root.asset_path(file) {
                    log::trace!("AssetWatcher: {path} changed");
                    self.pending.insert(path, now);
                }
            }
        }

        let settle = self.settle;
        let mut ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, changed)| now.saturating_duration_since(**changed) >= settle)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }
}

impl std::fmt::Debug for AssetWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetWatcher")
            .field("root", &self.root.root())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_is_reported_once_after_settling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        let mut watcher =
            AssetWatcher::new(dir.path(), Duration::from_millis(10), Duration::from_millis(50)).unwrap();

        std::fs::write(dir.path().join("scripts/spin.txt"), "spin").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while watcher.pending() == 0 && Instant::now() < deadline {
            assert!(watcher.poll(Instant::now()).is_empty());
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(watcher.pending(), 1);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(watcher.poll(later), vec!["scripts/spin.txt".to_string()]);
        assert!(watcher.poll(later).is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(AssetWatcher::new(&missing, Duration::from_millis(10), Duration::ZERO).is_err());
    }
}
