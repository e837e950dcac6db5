//
// document_store.rs
//
// Open editor buffers and the active document
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use url::Url;

/// An in-memory buffer for a file that is open in the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBuffer {
    pub text: String,
    /// True when the buffer has unsaved edits
    pub dirty: bool,
    pub language_id: String,
}

/// The document focused in the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDocument {
    pub uri: Url,
    /// Local path for `file` URIs, the URI path otherwise
    pub path: PathBuf,
    pub language_id: String,
    pub text: String,
}

impl ActiveDocument {
    pub fn is_local(&self) -> bool {
        self.uri.scheme() == "file"
    }
}

/// Editor-side view the engine consults before touching disk.
///
/// Open buffers are authoritative: when a path has a buffer, its text wins
/// over disk content, and a dirty buffer is never considered cache-fresh.
pub trait EditorState: Send + Sync {
    fn active_document(&self) -> Option<ActiveDocument>;

    fn open_buffer(&self, path: &Path) -> Option<OpenBuffer>;
}

/// Map a URI to the path key used by [`crate::fs::FileAccess`].
pub fn uri_to_path(uri: &Url) -> PathBuf {
    uri.to_file_path()
        .unwrap_or_else(|_| PathBuf::from(uri.path()))
}

/// Guess a language id from a file name the way editors do for TeX files
pub fn language_id_for(path: &Path) -> String {
    crate::project::root::infer_language_id(path).unwrap_or_else(|| "plaintext".to_string())
}

#[derive(Debug, Default)]
struct StoreInner {
    buffers: HashMap<PathBuf, (Url, OpenBuffer)>,
    active: Option<PathBuf>,
}

/// Thread-safe store of open buffers, used by the CLI and by tests in place
/// of a real editor.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) a clean buffer for a local file. The path must be absolute.
    pub fn open(&self, path: &Path, text: &str) {
        match Url::from_file_path(path) {
            Ok(uri) => self.open_uri(uri, text),
            Err(()) => log::warn!("Cannot open non-absolute path {}", path.display()),
        }
    }

    /// Open a buffer addressed by URI, which may use a non-`file` scheme.
    pub fn open_uri(&self, uri: Url, text: &str) {
        let path = uri_to_path(&uri);
        let buffer = OpenBuffer {
            text: text.to_string(),
            dirty: false,
            language_id: language_id_for(&path),
        };
        if let Ok(mut inner) = self.inner.write() {
            log::trace!("Opened buffer {}", uri);
            inner.buffers.insert(path, (uri, buffer));
        }
    }

    /// Replace buffer text and mark it dirty. Returns false if not open.
    pub fn edit(&self, path: &Path, text: &str) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        match inner.buffers.get_mut(path) {
            Some((_, buffer)) => {
                buffer.text = text.to_string();
                buffer.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Mark a buffer saved. Returns its text so the caller can write it out.
    pub fn mark_saved(&self, path: &Path) -> Option<String> {
        let mut inner = self.inner.write().ok()?;
        let (_, buffer) = inner.buffers.get_mut(path)?;
        buffer.dirty = false;
        Some(buffer.text.clone())
    }

    pub fn close(&self, path: &Path) {
        if let Ok(mut inner) = self.inner.write() {
            inner.buffers.remove(path);
            if inner.active.as_deref() == Some(path) {
                inner.active = None;
            }
        }
    }

    /// Focus an open buffer. Returns false if the path is not open.
    pub fn set_active(&self, path: Option<&Path>) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        match path {
            Some(path) if inner.buffers.contains_key(path) => {
                inner.active = Some(path.to_path_buf());
                true
            }
            Some(_) => false,
            None => {
                inner.active = None;
                true
            }
        }
    }
}

impl EditorState for DocumentStore {
    fn active_document(&self) -> Option<ActiveDocument> {
        let inner = self.inner.read().ok()?;
        let path = inner.active.as_ref()?;
        let (uri, buffer) = inner.buffers.get(path)?;
        Some(ActiveDocument {
            uri: uri.clone(),
            path: path.clone(),
            language_id: buffer.language_id.clone(),
            text: buffer.text.clone(),
        })
    }

    fn open_buffer(&self, path: &Path) -> Option<OpenBuffer> {
        let inner = self.inner.read().ok()?;
        inner.buffers.get(path).map(|(_, buffer)| buffer.clone())
    }
}
