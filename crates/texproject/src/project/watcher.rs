//
// project/watcher.rs
//
// Watched file membership and OS watcher bridging
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use dashmap::{DashMap, DashSet};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::path_resolve::parent_dir;

/// A change to a file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Deleted(PathBuf),
}

impl FileEvent {
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Changed(p) | FileEvent::Created(p) | FileEvent::Deleted(p) => p,
        }
    }
}

/// Registers directories with an OS-level watcher
pub trait WatchBackend: Send + Sync {
    fn watch_dir(&self, dir: &Path) -> Result<()>;

    fn unwatch_dir(&self, dir: &Path) -> Result<()>;
}

/// Backend that never reports events. Used when watching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl WatchBackend for NullBackend {
    fn watch_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn unwatch_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }
}

/// `notify` watcher whose events are forwarded to a tokio channel
pub struct NotifyBackend {
    watcher: Mutex<RecommendedWatcher>,
}

impl NotifyBackend {
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<FileEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watcher error: {}", e);
                    return;
                }
            };
            for path in event.paths {
                let file_event = match event.kind {
                    EventKind::Create(_) => FileEvent::Created(path),
                    EventKind::Modify(_) if path.exists() => FileEvent::Changed(path),
                    EventKind::Modify(_) | EventKind::Remove(_) => FileEvent::Deleted(path),
                    _ => continue,
                };
                if tx.send(file_event).is_err() {
                    // Receiver dropped; the engine is shutting down
                    return;
                }
            }
        })
        .map_err(|e| anyhow!("Failed to create file watcher: {e}"))?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            rx,
        ))
    }
}

impl WatchBackend for NotifyBackend {
    fn watch_dir(&self, dir: &Path) -> Result<()> {
        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| anyhow!("File watcher lock poisoned"))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow!("Failed to watch {}: {e}", dir.display()))
    }

    fn unwatch_dir(&self, dir: &Path) -> Result<()> {
        let mut watcher = self
            .watcher
            .lock()
            .map_err(|_| anyhow!("File watcher lock poisoned"))?;
        watcher
            .unwatch(dir)
            .map_err(|e| anyhow!("Failed to unwatch {}: {e}", dir.display()))
    }
}

/// Set of files under observation.
///
/// Files are registered with the backend through their parent directory so
/// editors that save by writing a new file and renaming it over the old one
/// keep being observed. Directories are reference-counted by member files.
pub struct FileWatchSet {
    members: DashSet<PathBuf>,
    dirs: DashMap<PathBuf, usize>,
    backend: Arc<dyn WatchBackend>,
}

impl FileWatchSet {
    pub fn new(backend: Arc<dyn WatchBackend>) -> Self {
        Self {
            members: DashSet::new(),
            dirs: DashMap::new(),
            backend,
        }
    }

    /// Start watching `path`. Returns false if it was already watched.
    pub fn add(&self, path: &Path) -> bool {
        if !self.members.insert(path.to_path_buf()) {
            return false;
        }
        let dir = parent_dir(path);
        let first = {
            let mut count = self.dirs.entry(dir.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            if let Err(e) = self.backend.watch_dir(&dir) {
                log::warn!("{}", e);
            }
        }
        log::trace!("Watching {}", path.display());
        true
    }

    /// Stop watching `path`. Returns false if it was not watched.
    pub fn remove(&self, path: &Path) -> bool {
        if self.members.remove(path).is_none() {
            return false;
        }
        let dir = parent_dir(path);
        let last = match self.dirs.get_mut(&dir) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if last {
            self.dirs.remove(&dir);
            if let Err(e) = self.backend.unwatch_dir(&dir) {
                log::debug!("{}", e);
            }
        }
        log::trace!("Stopped watching {}", path.display());
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.members.contains(path)
    }

    /// Whether an event concerns a member. Late events for removed files are
    /// dropped here.
    pub fn accepts(&self, event: &FileEvent) -> bool {
        self.contains(event.path())
    }

    /// Forget every member and release every directory watch
    pub fn reset(&self) {
        log::debug!("Resetting watch set ({} files)", self.members.len());
        let dirs: Vec<PathBuf> = self.dirs.iter().map(|e| e.key().clone()).collect();
        for dir in dirs {
            if let Err(e) = self.backend.unwatch_dir(&dir) {
                log::debug!("{}", e);
            }
        }
        self.dirs.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Watched paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.members.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Directories currently registered with the backend, sorted
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.dirs.iter().map(|e| e.key().clone()).collect();
        dirs.sort();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records backend calls
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
    }

    impl WatchBackend for RecordingBackend {
        fn watch_dir(&self, dir: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("watch {}", dir.display()));
            Ok(())
        }

        fn unwatch_dir(&self, dir: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unwatch {}", dir.display()));
            Ok(())
        }
    }

    fn watch_set() -> (Arc<RecordingBackend>, FileWatchSet) {
        let backend = Arc::new(RecordingBackend::default());
        (backend.clone(), FileWatchSet::new(backend))
    }

    #[test]
    fn test_add_is_idempotent() {
        let (backend, set) = watch_set();
        assert!(set.add(Path::new("/p/a.tex")));
        assert!(!set.add(Path::new("/p/a.tex")));
        assert_eq!(set.len(), 1);
        assert_eq!(*backend.calls.lock().unwrap(), vec!["watch /p"]);
    }

    #[test]
    fn test_directories_are_reference_counted() {
        let (backend, set) = watch_set();
        set.add(Path::new("/p/a.tex"));
        set.add(Path::new("/p/b.tex"));
        set.add(Path::new("/q/c.bib"));
        assert_eq!(
            set.watched_dirs(),
            vec![PathBuf::from("/p"), PathBuf::from("/q")]
        );

        assert!(set.remove(Path::new("/p/a.tex")));
        assert!(!set.remove(Path::new("/p/a.tex")));
        assert_eq!(set.watched_dirs().len(), 2);
        set.remove(Path::new("/p/b.tex"));
        assert_eq!(set.watched_dirs(), vec![PathBuf::from("/q")]);
        assert!(backend
            .calls
            .lock()
            .unwrap()
            .contains(&"unwatch /p".to_string()));
    }

    #[test]
    fn test_accepts_only_members() {
        let (_backend, set) = watch_set();
        set.add(Path::new("/p/a.tex"));
        assert!(set.accepts(&FileEvent::Changed(PathBuf::from("/p/a.tex"))));
        assert!(!set.accepts(&FileEvent::Changed(PathBuf::from("/p/other.tex"))));
        set.remove(Path::new("/p/a.tex"));
        assert!(!set.accepts(&FileEvent::Deleted(PathBuf::from("/p/a.tex"))));
    }

    #[test]
    fn test_reset() {
        let (_backend, set) = watch_set();
        set.add(Path::new("/p/a.tex"));
        set.add(Path::new("/q/b.tex"));
        set.reset();
        assert!(set.is_empty());
        assert!(set.watched_dirs().is_empty());
        assert!(set.add(Path::new("/p/a.tex")));
    }

    #[tokio::test]
    async fn test_notify_backend_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.tex");
        std::fs::write(&file, "v1").unwrap();

        let (backend, mut rx) = NotifyBackend::new().unwrap();
        let set = FileWatchSet::new(Arc::new(backend));
        set.add(&file);
        std::fs::write(&file, "v2").unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(event) if set.accepts(&event) => return Some(event),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten();
        // Some CI file systems do not deliver events; only check what arrived
        if let Some(event) = event {
            assert!(event.path().ends_with("main.tex"));
        }
    }
}
