//
// project/path_resolve.rs
//
// Search-path resolution for included files
//

use std::path::{Component, Path, PathBuf};

use crate::fs::FileAccess;

/// Lexically normalize a path by resolving `.` and `..` components.
///
/// `..` never pops past the root, and the file system is not consulted, so
/// symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Only pop Normal segments; RootDir and Prefix stay
                match components.last() {
                    Some(Component::Normal(_)) => {
                        components.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => components.push(component),
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Directory containing `path`, or the path itself when it has no parent
pub fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

/// Append `suffix` (e.g. `.tex`) to the file name without replacing anything
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Find `name` in the first directory of `dirs` that contains it.
///
/// Absolute names are tried as-is before the search directories. A name
/// without an extension gets `suffix` appended; a name that does not exist as
/// written is retried with `suffix` appended, so `\input{chap.v2}` finds
/// `chap.v2.tex`.
pub async fn resolve_file(
    fs: &dyn FileAccess,
    dirs: &[PathBuf],
    name: &str,
    suffix: &str,
) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let name_path = Path::new(name);
    let mut candidates_dirs: Vec<&Path> = Vec::with_capacity(dirs.len() + 1);
    if name_path.is_absolute() {
        candidates_dirs.push(Path::new(""));
    }
    candidates_dirs.extend(dirs.iter().map(PathBuf::as_path));

    for dir in candidates_dirs {
        let mut candidate = normalize_path(&dir.join(name_path));
        if candidate.extension().is_none() {
            candidate = with_suffix(&candidate, suffix);
        }
        if !fs.exists(&candidate).await {
            let suffixed = with_suffix(&candidate, suffix);
            if fs.exists(&suffixed).await {
                candidate = suffixed;
            }
        }
        if fs.exists(&candidate).await {
            log::trace!("Resolved '{}' to {}", name, candidate.display());
            return Some(candidate);
        }
    }

    log::trace!("Could not resolve '{}' in {:?}", name, dirs);
    None
}
