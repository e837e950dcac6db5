//
// project/content.rs
//
// File content with open buffers taking precedence over disk
//

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::document_store::EditorState;
use crate::fs::FileAccess;

/// Text of a file plus what the staleness checks need to know about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedContent {
    pub text: String,
    /// Text came from a buffer with unsaved edits
    pub dirty: bool,
    /// Disk modification time, if the file exists on disk
    pub mtime: Option<SystemTime>,
}

impl LoadedContent {
    /// Stamp to record after scanning this content. Unsaved buffer text is
    /// not tied to any disk state, so it gets none.
    pub fn scan_stamp(&self) -> Option<SystemTime> {
        if self.dirty {
            None
        } else {
            self.mtime
        }
    }
}

/// Reads file content for the engine.
///
/// CRITICAL: an open buffer is authoritative. Its text is returned even if
/// the file on disk is newer, and a dirty buffer is reported as such so the
/// cache never treats it as fresh.
pub struct ContentSource {
    fs: Arc<dyn FileAccess>,
    editor: Arc<dyn EditorState>,
}

impl ContentSource {
    pub fn new(fs: Arc<dyn FileAccess>, editor: Arc<dyn EditorState>) -> Self {
        Self { fs, editor }
    }

    pub fn fs(&self) -> &dyn FileAccess {
        self.fs.as_ref()
    }

    pub fn editor(&self) -> &dyn EditorState {
        self.editor.as_ref()
    }

    /// Whether the file has unsaved edits in the editor
    pub fn is_dirty(&self, path: &Path) -> bool {
        self.editor.open_buffer(path).is_some_and(|b| b.dirty)
    }

    /// Current modification time on disk
    pub async fn mtime(&self, path: &Path) -> Option<SystemTime> {
        self.fs.stat_graceful(path).await.map(|s| s.mtime)
    }

    /// Whether the file exists in a buffer or on disk
    pub async fn exists(&self, path: &Path) -> bool {
        self.editor.open_buffer(path).is_some() || self.fs.exists(path).await
    }

    /// Buffer text if open, otherwise disk text. `None` if unreadable.
    pub async fn load(&self, path: &Path) -> Option<LoadedContent> {
        let mtime = self.mtime(path).await;
        if let Some(buffer) = self.editor.open_buffer(path) {
            return Some(LoadedContent {
                text: buffer.text,
                dirty: buffer.dirty,
                mtime,
            });
        }
        let text = self.fs.read_graceful(path).await?;
        Some(LoadedContent {
            text,
            dirty: false,
            mtime,
        })
    }
}
