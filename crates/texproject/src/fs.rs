//
// fs.rs
//
// File access abstraction for the project engine
//

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use walkdir::WalkDir;

/// Stat result used for staleness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStat {
    /// File modification time
    pub mtime: SystemTime,
    /// File size in bytes
    pub size: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            mtime: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
        }
    }
}

/// Read/stat/exists over local and virtual files.
///
/// The strict methods report the underlying error; the `*_graceful` variants
/// log it and return `None`, which is what the traversal code wants almost
/// everywhere.
#[async_trait]
pub trait FileAccess: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<String>;

    async fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Files under `root`, in a stable order. Used by the workspace root scan.
    async fn list_files(&self, root: &Path) -> Vec<PathBuf>;

    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }

    async fn read_graceful(&self, path: &Path) -> Option<String> {
        match self.read(path).await {
            Ok(content) => Some(content),
            Err(e) => {
                log::debug!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn stat_graceful(&self, path: &Path) -> Option<FileStat> {
        match self.stat(path).await {
            Ok(stat) => Some(stat),
            Err(e) => {
                log::debug!("Cannot stat {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Local disk access through `tokio::fs`
#[derive(Debug, Default, Clone)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileAccess for LocalFs {
    async fn read(&self, path: &Path) -> io::Result<String> {
        let bytes = tokio::fs::read(path).await?;
        // TeX sources in legacy encodings are still worth scanning for ASCII directives
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(FileStat::from_metadata(&metadata))
    }

    async fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let root = root.to_path_buf();
        let walk = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::debug!("Skipping unreadable workspace entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>()
        })
        .await;

        match walk {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Workspace walk task failed: {}", e);
                Vec::new()
            }
        }
    }
}
