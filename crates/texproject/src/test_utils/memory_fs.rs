//! In-memory [`FileAccess`] for unit and integration tests.
//!
//! Modification times come from a logical clock that ticks on every write,
//! so staleness tests never depend on the resolution of the host file
//! system's timestamps. Reads are counted per path to assert that cached
//! entries are not rescanned.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::fs::{FileAccess, FileStat};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: String,
    mtime: SystemTime,
}

#[derive(Debug, Default)]
pub struct MemoryFs {
    files: DashMap<PathBuf, MemoryFile>,
    clock: AtomicU64,
    reads: DashMap<PathBuf, usize>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> SystemTime {
        let t = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(t)
    }

    /// Create or overwrite a file, advancing its modification time.
    pub fn insert(&self, path: impl AsRef<Path>, content: &str) {
        let mtime = self.tick();
        self.files.insert(
            path.as_ref().to_path_buf(),
            MemoryFile {
                content: content.to_string(),
                mtime,
            },
        );
    }

    /// Advance a file's modification time without changing its content.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let mtime = self.tick();
        if let Some(mut file) = self.files.get_mut(path.as_ref()) {
            file.mtime = mtime;
        }
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Number of successful reads of `path` so far
    pub fn read_count(&self, path: impl AsRef<Path>) -> usize {
        self.reads.get(path.as_ref()).map(|n| *n).unwrap_or(0)
    }

    pub fn reset_read_counts(&self) {
        self.reads.clear();
    }
}

#[async_trait]
impl FileAccess for MemoryFs {
    async fn read(&self, path: &Path) -> io::Result<String> {
        let content = self
            .files
            .get(path)
            .map(|f| f.content.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        *self.reads.entry(path.to_path_buf()).or_insert(0) += 1;
        Ok(content)
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.files
            .get(path)
            .map(|f| FileStat {
                mtime: f.mtime,
                size: f.content.len() as u64,
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .files
            .iter()
            .map(|f| f.key().clone())
            .filter(|p| p.starts_with(root))
            .collect();
        files.sort();
        files
    }
}
