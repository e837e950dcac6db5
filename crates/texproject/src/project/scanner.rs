//
// project/scanner.rs
//
// Inclusion directive scanning
//

use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{CaptureMatches, Captures, Regex};

use super::path_resolve::{parent_dir, resolve_file};
use crate::fs::FileAccess;

/// How an inclusion target is searched for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionKind {
    /// `\input`, `\include`, `\subfile`, `\loadglsentries`, ...
    Input,
    /// `\import{dir}{file}` and friends. `sub` variants resolve strictly
    /// relative to the including file.
    Import { dir: String, sub: bool },
    /// Literate-programming chunk option `child='file'`
    Child,
}

/// One inclusion directive found in stripped content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionMatch {
    pub kind: InclusionKind,
    /// Target path as written
    pub path: String,
    /// Byte offset of the directive
    pub index: usize,
    /// Full matched directive text
    pub matched: String,
}

struct InclusionPatterns {
    input: Regex,
    child: Regex,
}

fn patterns() -> &'static InclusionPatterns {
    static PATTERNS: OnceLock<InclusionPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| InclusionPatterns {
        // Groups: 1=import base dir, 2=target
        input: Regex::new(
            r"\\(?:input|InputIfFileExists|include|SweaveInput|subfile|loadglsentries|(?:(?:sub)?(?:import|inputfrom|includefrom)\*?\{([^}]*)\}))(?:\[[^\[\]{}]*\])?\{([^}]*)\}",
        )
        .unwrap(),
        child: Regex::new(r"<<(?:[^,\n]*,)*[ \t]*child='([^']*)'[ \t]*(?:,[^,\n]*)*>>=").unwrap(),
    })
}

/// Iterator over inclusion directives in content order.
///
/// Both syntaxes are scanned lazily and merged by position, so the consumer
/// sees directives in the order they appear in the text. Each scanner owns
/// its position; independent scans of the same text never interfere.
pub struct InclusionScanner<'a> {
    inputs: Peekable<CaptureMatches<'static, 'a>>,
    children: Peekable<CaptureMatches<'static, 'a>>,
}

impl<'a> InclusionScanner<'a> {
    /// Scan `content`, which should already have comments and verbatim
    /// blocks stripped.
    pub fn new(content: &'a str) -> Self {
        let patterns = patterns();
        Self {
            inputs: patterns.input.captures_iter(content).peekable(),
            children: patterns.child.captures_iter(content).peekable(),
        }
    }

    fn from_input(caps: &Captures) -> Option<InclusionMatch> {
        let whole = caps.get(0)?;
        let path = caps.get(2)?.as_str().to_string();
        let kind = match caps.get(1) {
            Some(dir) => InclusionKind::Import {
                dir: dir.as_str().to_string(),
                sub: whole.as_str().starts_with("\\sub"),
            },
            None => InclusionKind::Input,
        };
        Some(InclusionMatch {
            kind,
            path,
            index: whole.start(),
            matched: whole.as_str().to_string(),
        })
    }

    fn from_child(caps: &Captures) -> Option<InclusionMatch> {
        let whole = caps.get(0)?;
        Some(InclusionMatch {
            kind: InclusionKind::Child,
            path: caps.get(1)?.as_str().to_string(),
            index: whole.start(),
            matched: whole.as_str().to_string(),
        })
    }
}

impl Iterator for InclusionScanner<'_> {
    type Item = InclusionMatch;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let input_at = self
                .inputs
                .peek()
                .and_then(|c| c.get(0))
                .map(|m| m.start());
            let child_at = self
                .children
                .peek()
                .and_then(|c| c.get(0))
                .map(|m| m.start());

            let found = match (input_at, child_at) {
                (None, None) => return None,
                (Some(i), Some(c)) if c < i => self.children.next().and_then(|c| Self::from_child(&c)),
                (Some(_), _) => self.inputs.next().and_then(|c| Self::from_input(&c)),
                (None, Some(_)) => self.children.next().and_then(|c| Self::from_child(&c)),
            };
            if found.is_some() {
                return found;
            }
        }
    }
}

/// Resolve an inclusion to an existing file.
///
/// Returns `None` when the target does not exist or is the root file itself.
pub async fn resolve_inclusion(
    fs: &dyn FileAccess,
    inclusion: &InclusionMatch,
    current_file: &Path,
    root_file: &Path,
    tex_dirs: &[PathBuf],
) -> Option<PathBuf> {
    let current_dir = parent_dir(current_file);
    let root_dir = parent_dir(root_file);

    let resolved = match &inclusion.kind {
        InclusionKind::Input | InclusionKind::Child => {
            let mut dirs = vec![current_dir, root_dir];
            dirs.extend(tex_dirs.iter().cloned());
            resolve_file(fs, &dirs, &inclusion.path, ".tex").await
        }
        InclusionKind::Import { dir, sub: true } => {
            let target = Path::new(dir.trim()).join(inclusion.path.trim());
            resolve_file(fs, &[current_dir], &target.to_string_lossy(), ".tex").await
        }
        InclusionKind::Import { dir, sub: false } => {
            let base = Path::new(dir.trim());
            let mut dirs = Vec::with_capacity(2);
            // Relative base dirs resolve against the root's directory
            if base.is_absolute() {
                dirs.push(base.to_path_buf());
            }
            dirs.push(root_dir.join(base));
            resolve_file(fs, &dirs, &inclusion.path, ".tex").await
        }
    };

    match resolved {
        Some(path) if path == root_file => {
            log::trace!("Skipping self-inclusion of root {}", root_file.display());
            None
        }
        Some(path) => Some(path),
        None => {
            log::trace!(
                "Unresolved inclusion '{}' in {}",
                inclusion.matched,
                current_file.display()
            );
            None
        }
    }
}
