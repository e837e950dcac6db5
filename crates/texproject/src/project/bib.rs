//
// project/bib.rs
//
// Bibliography directive scanning and .bib resolution
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::path_resolve::{normalize_path, resolve_file};
use crate::config::ProjectConfig;
use crate::fs::FileAccess;
use crate::process::ProcessSpawner;

fn bib_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Groups: 1=\bibliography / \addbibresource names, 2=\putbib names
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:\\(?:bibliography|addbibresource)(?:\[[^\[\]{}]*\])?)\{(.+?)\}|(?:\\putbib)\[(.+?)\]")
            .unwrap()
    })
}

/// Bibliography names referenced by stripped content, in order.
///
/// Comma-separated lists are split and trimmed; empty names are dropped.
pub fn scan_bib_directives(content: &str) -> Vec<String> {
    bib_pattern()
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .flat_map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Resolves bibliography names to `.bib` files
pub struct BibResolver {
    fs: Arc<dyn FileAccess>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl BibResolver {
    pub fn new(fs: Arc<dyn FileAccess>, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { fs, spawner }
    }

    /// Find `name` in `{root_dir, base_dir, bib_dirs}`, then ask kpsewhich
    /// when enabled for a trusted workspace.
    pub async fn resolve(
        &self,
        name: &str,
        base_dir: &Path,
        root_dir: Option<&Path>,
        config: &ProjectConfig,
    ) -> Option<PathBuf> {
        let mut dirs = Vec::with_capacity(config.bib_dirs.len() + 2);
        if let Some(root_dir) = root_dir {
            dirs.push(root_dir.to_path_buf());
        }
        dirs.push(base_dir.to_path_buf());
        dirs.extend(config.bib_dirs.iter().cloned());

        if let Some(path) = resolve_file(self.fs.as_ref(), &dirs, name, ".bib").await {
            return Some(path);
        }

        if !config.kpsewhich_allowed() {
            log::debug!("Cannot resolve bibliography '{}'", name);
            return None;
        }
        self.kpsewhich(name, base_dir, config).await
    }

    async fn kpsewhich(&self, name: &str, base_dir: &Path, config: &ProjectConfig) -> Option<PathBuf> {
        let args = vec!["-format=.bib".to_string(), name.to_string()];
        match self.spawner.run(&config.kpsewhich_path, &args).await {
            Ok(output) => {
                let found = output.lines().next().unwrap_or("").trim();
                if found.is_empty() {
                    log::debug!("kpsewhich found no bibliography for '{}'", name);
                    return None;
                }
                let path = normalize_path(&base_dir.join(found));
                log::debug!("kpsewhich resolved '{}' to {}", name, path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("kpsewhich failed for '{}': {}", name, e);
                None
            }
        }
    }
}
