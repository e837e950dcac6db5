//
// project/root.rs
//
// Root file discovery strategies
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use indexmap::IndexSet;
use regex::Regex;
use url::Url;

use super::content::ContentSource;
use super::fls::parse_fls_content;
use super::output::{fls_path, out_dir, PlaceholderContext};
use super::path_resolve::{normalize_path, parent_dir, resolve_file};
use super::scanner::{resolve_inclusion, InclusionScanner};
use super::text::strip_comments_and_verbatim;
use crate::config::{build_globset, ProjectConfig};
use crate::document_store::ActiveDocument;

/// Which strategy produced a root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSource {
    MagicComment,
    ActiveDocument,
    Subfile,
    CurrentRoot,
    Workspace,
}

/// A root candidate chosen by one of the strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRoot {
    pub path: PathBuf,
    /// Set when the root came from a non-`file` document
    pub uri: Option<Url>,
    pub source: RootSource,
    /// The open subfile when the root is its main document
    pub local_root_file: Option<PathBuf>,
}

impl FoundRoot {
    fn local(path: PathBuf, source: RootSource) -> Self {
        Self {
            uri: Url::from_file_path(&path).ok(),
            path,
            source,
            local_root_file: None,
        }
    }
}

struct RootPatterns {
    magic: Regex,
    subfiles: Regex,
}

fn patterns() -> &'static RootPatterns {
    static PATTERNS: OnceLock<RootPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| RootPatterns {
        magic: Regex::new(
            r"(?m)^%\s*!\s*T[Ee]X\sroot\s*=\s*(.*\.(?:tex|[jrsRS]nw|[rR]tex|jtexw))\s*$",
        )
        .unwrap(),
        subfiles: Regex::new(r"\\documentclass\[(.*)\]\{subfiles\}").unwrap(),
    })
}

/// Target of the first `% !TeX root = ...` line, as written
pub fn magic_root(text: &str) -> Option<&str> {
    patterns()
        .magic
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

pub fn has_begin_document(stripped: &str) -> bool {
    stripped.contains("\\begin{document}")
}

/// Main file argument of `\documentclass[main]{subfiles}`
pub fn subfiles_main(stripped: &str) -> Option<&str> {
    patterns()
        .subfiles
        .captures(stripped)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Editor language id for TeX-family files
pub fn infer_language_id(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    let id = match ext.as_str() {
        "tex" => "latex",
        "rnw" | "rtex" | "snw" => "rsweave",
        "jnw" | "jtexw" => "jlweave",
        "dtx" => "doctex",
        _ => return None,
    };
    Some(id.to_string())
}

/// Keep the current root when the active file is already part of it
pub fn from_current_root(
    current_root: Option<&Path>,
    active: &Path,
    included: &[PathBuf],
) -> Option<FoundRoot> {
    let root = current_root?;
    if included.iter().any(|p| p == active) {
        log::info!("Found root file from current root: {}", root.display());
        return Some(FoundRoot::local(root.to_path_buf(), RootSource::CurrentRoot));
    }
    None
}

/// Strategies that need file content
pub struct RootFinder {
    content: Arc<ContentSource>,
}

impl RootFinder {
    pub fn new(content: Arc<ContentSource>) -> Self {
        Self { content }
    }

    /// Follow `% !TeX root` comments from the active document.
    ///
    /// A chain that loops ends at the first repeated file. A chain that names
    /// a file that cannot be read yields nothing.
    pub async fn from_magic(&self, active: &ActiveDocument) -> Option<FoundRoot> {
        let target = magic_root(&active.text)?;
        let mut file = normalize_path(&parent_dir(&active.path).join(target));
        let mut stack: Vec<PathBuf> = Vec::new();

        loop {
            if stack.contains(&file) {
                log::info!("Found looped magic root {}", file.display());
                return Some(FoundRoot::local(file, RootSource::MagicComment));
            }
            let Some(content) = self.content.load(&file).await else {
                log::info!("Non-existent magic root {}", file.display());
                return None;
            };
            log::debug!("Found root file by magic comment: {}", file.display());
            stack.push(file.clone());

            match magic_root(&content.text) {
                Some(next) => file = normalize_path(&parent_dir(&file).join(next)),
                None => break,
            }
        }

        log::info!("Found root file by magic comment: {}", file.display());
        Some(FoundRoot::local(file, RootSource::MagicComment))
    }

    /// A subfile's main document, or the active document itself when it
    /// contains `\begin{document}`.
    pub async fn from_active(
        &self,
        active: &ActiveDocument,
        current_root_dir: Option<&Path>,
        config: &ProjectConfig,
    ) -> Option<FoundRoot> {
        let stripped = strip_comments_and_verbatim(&active.text, &config.verbatim_envs);

        if let Some(main) = subfiles_main(&stripped) {
            let mut dirs = vec![parent_dir(&active.path)];
            dirs.extend(current_root_dir.map(Path::to_path_buf));
            match resolve_file(self.content.fs(), &dirs, main, ".tex").await {
                Some(path) => {
                    log::info!(
                        "Found root file of this subfile from active editor: {}",
                        path.display()
                    );
                    let mut found = FoundRoot::local(path, RootSource::Subfile);
                    found.local_root_file = Some(active.path.clone());
                    return Some(found);
                }
                None => log::info!("Cannot find root file of this subfile: {}", main),
            }
        }

        if has_begin_document(&stripped) {
            log::info!("Found root file from active editor: {}", active.path.display());
            return Some(FoundRoot {
                path: active.path.clone(),
                uri: Some(active.uri.clone()),
                source: RootSource::ActiveDocument,
                local_root_file: None,
            });
        }
        None
    }

    /// Scan workspace files for a document that includes the active file.
    ///
    /// Candidates are visited in the order [`crate::fs::FileAccess::list_files`]
    /// returns them. The first file whose `.fls` record or static inclusion
    /// tree contains the active file wins; otherwise the first file with
    /// `\begin{document}` is used.
    pub async fn in_workspace(
        &self,
        workspace: &Path,
        active: Option<&Path>,
        config: &ProjectConfig,
    ) -> Option<FoundRoot> {
        let include = build_globset(&config.root_files_include)?;
        let exclude = build_globset(&config.root_files_exclude);
        let mut first_candidate: Option<PathBuf> = None;

        for file in self.content.fs().list_files(workspace).await {
            let rel = file.strip_prefix(workspace).unwrap_or(&file);
            if !include.is_match(rel) || exclude.as_ref().is_some_and(|e| e.is_match(rel)) {
                continue;
            }

            if let Some(active) = active {
                if self.fls_inputs(&file, workspace, config).await.contains(active) {
                    log::info!("Found root file from '.fls': {}", file.display());
                    return Some(FoundRoot::local(file, RootSource::Workspace));
                }
            }

            let Some(content) = self.content.load(&file).await else {
                continue;
            };
            let stripped = strip_comments_and_verbatim(&content.text, &config.verbatim_envs);
            if !has_begin_document(&stripped) {
                continue;
            }
            if let Some(active) = active {
                if self
                    .static_closure(&file, &stripped, config)
                    .await
                    .contains(active)
                {
                    log::info!("Found root file from parent: {}", file.display());
                    return Some(FoundRoot::local(file, RootSource::Workspace));
                }
            }
            if first_candidate.is_none() {
                first_candidate = Some(file);
            }
        }

        let file = first_candidate?;
        log::info!("Found files that might be root, choose the first one: {}", file.display());
        Some(FoundRoot::local(file, RootSource::Workspace))
    }

    async fn fls_inputs(&self, tex: &Path, workspace: &Path, config: &ProjectConfig) -> IndexSet<PathBuf> {
        let ctx = PlaceholderContext {
            doc: tex,
            workspace: Some(workspace),
            tmp_dir: &config.tmp_dir,
        };
        let fls = fls_path(tex, &out_dir(&config.out_dir, &ctx));
        match self.content.fs().read_graceful(&fls).await {
            Some(content) => parse_fls_content(&content, &parent_dir(tex)).inputs,
            None => IndexSet::new(),
        }
    }

    /// Files statically included from `root` without touching the cache
    async fn static_closure(&self, root: &Path, stripped: &str, config: &ProjectConfig) -> IndexSet<PathBuf> {
        let mut visited: IndexSet<PathBuf> = IndexSet::new();
        visited.insert(root.to_path_buf());
        let mut stack: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), stripped.to_string())];

        while let Some((file, text)) = stack.pop() {
            let matches: Vec<_> = InclusionScanner::new(&text).collect();
            for m in matches {
                let Some(child) =
                    resolve_inclusion(self.content.fs(), &m, &file, root, &config.tex_dirs).await
                else {
                    continue;
                };
                if !visited.insert(child.clone()) {
                    continue;
                }
                if let Some(content) = self.content.load(&child).await {
                    let stripped = strip_comments_and_verbatim(&content.text, &config.verbatim_envs);
                    stack.push((child, stripped));
                }
            }
        }
        visited
    }
}
