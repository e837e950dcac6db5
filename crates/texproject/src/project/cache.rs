//
// project/cache.rs
//
// Per-file dependency cache with independently stamped sub-structures
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use indexmap::IndexSet;
use serde::Serialize;

use super::elements::Elements;

/// A cached value together with the modification time of the content it was
/// derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    /// `None` until a scan from disk content completes
    pub mtime: Option<SystemTime>,
    /// Number of completed rescans
    pub generation: u64,
}

impl<T> Stamped<T> {
    /// Whether the value must be rebuilt before use.
    ///
    /// Dirty buffers always force a rebuild, as does a value that was never
    /// scanned from disk. Otherwise the value is stale only when the file's
    /// current modification time is strictly newer than the stored one.
    pub fn is_stale(&self, current: Option<SystemTime>, dirty: bool) -> bool {
        if dirty {
            return true;
        }
        match (self.mtime, current) {
            (None, _) => true,
            (Some(stored), Some(current)) => current > stored,
            (Some(_), None) => false,
        }
    }

    /// Replace the value after a full rescan. `mtime` is the modification
    /// time of the scanned content, or `None` for unsaved buffer content.
    pub fn refresh(&mut self, value: T, mtime: Option<SystemTime>) {
        self.value = value;
        self.mtime = mtime;
        self.generation += 1;
    }
}

/// Everything the engine knows about one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub elements: Stamped<Elements>,
    /// Included files, in discovery order
    pub children: Stamped<IndexSet<PathBuf>>,
    pub bibs: Stamped<IndexSet<PathBuf>>,
}

/// Cache of [`CacheEntry`] keyed by absolute path.
///
/// Reads return clones so no lock outlives the call.
#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a default entry for `path` if absent. Returns true if created.
    pub fn ensure(&self, path: &Path) -> bool {
        let Ok(mut guard) = self.entries.write() else {
            return false;
        };
        if guard.contains_key(path) {
            return false;
        }
        log::trace!("Created cache entry for {}", path.display());
        guard.insert(path.to_path_buf(), CacheEntry::default());
        true
    }

    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.read().ok()?.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .map(|g| g.contains_key(path))
            .unwrap_or(false)
    }

    /// Mutate the entry for `path`, creating it first if needed.
    pub fn update<R>(&self, path: &Path, f: impl FnOnce(&mut CacheEntry) -> R) -> Option<R> {
        let mut guard = self.entries.write().ok()?;
        let entry = guard.entry(path.to_path_buf()).or_default();
        Some(f(entry))
    }

    pub fn remove(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.write().ok()?.remove(path)
    }

    /// Drop every entry. Only done when the root changes.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            log::debug!("Purging {} cache entries", guard.len());
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries
            .read()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Files reachable from `start` through cached children, `start` first,
    /// in depth-first discovery order. Files without an entry are not
    /// reported and not traversed.
    pub fn included_tex(&self, start: &Path) -> Vec<PathBuf> {
        self.traverse(start).0.into_iter().collect()
    }

    /// Bibliographies of every file reachable from `start`, deduplicated
    pub fn included_bib(&self, start: &Path) -> Vec<PathBuf> {
        self.traverse(start).1.into_iter().collect()
    }

    fn traverse(&self, start: &Path) -> (IndexSet<PathBuf>, IndexSet<PathBuf>) {
        let mut visited: IndexSet<PathBuf> = IndexSet::new();
        let mut bibs: IndexSet<PathBuf> = IndexSet::new();
        let Ok(guard) = self.entries.read() else {
            return (visited, bibs);
        };

        let mut stack = vec![start.to_path_buf()];
        while let Some(file) = stack.pop() {
            if visited.contains(&file) {
                continue;
            }
            let Some(entry) = guard.get(&file) else {
                continue;
            };
            bibs.extend(entry.bibs.value.iter().cloned());
            // Reverse so the first child is visited first
            for child in entry.children.value.iter().rev() {
                if !visited.contains(child) {
                    stack.push(child.clone());
                }
            }
            visited.insert(file);
        }
        (visited, bibs)
    }
}
