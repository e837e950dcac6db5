//
// config.rs
//
// Configuration for the project engine
//

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;

/// When the engine asks the build collaborator to compile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoBuildRun {
    #[default]
    Never,
    OnSave,
    OnFileChange,
}

impl AutoBuildRun {
    fn parse(s: &str) -> Self {
        match s {
            "onSave" => Self::OnSave,
            "onFileChange" => Self::OnFileChange,
            _ => Self::Never,
        }
    }
}

/// Project engine configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Extra directories searched for `\input`-like targets
    pub tex_dirs: Vec<PathBuf>,
    /// Extra directories searched for bibliography files
    pub bib_dirs: Vec<PathBuf>,
    /// Output directory template, placeholders allowed
    pub out_dir: String,
    /// Auto-build trigger
    pub auto_build: AutoBuildRun,
    /// Build the open subfile instead of the root on change
    pub use_sub_file: bool,
    /// Globs selecting root file candidates in the workspace scan
    pub root_files_include: Vec<String>,
    /// Globs removing root file candidates
    pub root_files_exclude: Vec<String>,
    /// Globs of files never parsed nor watched
    pub watch_ignore: Vec<String>,
    /// Environments whose bodies are ignored when scanning
    pub verbatim_envs: Vec<String>,
    /// Whether kpsewhich may be used to locate bibliographies
    pub kpsewhich_enabled: bool,
    /// kpsewhich executable
    pub kpsewhich_path: String,
    /// Untrusted workspaces never spawn external tools
    pub trusted: bool,
    /// Directory substituted for `%TMPDIR%`
    pub tmp_dir: PathBuf,
    #[serde(skip)]
    pub ignore_matcher: IgnoreMatcher,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            tex_dirs: Vec::new(),
            bib_dirs: Vec::new(),
            out_dir: "%DIR%".to_string(),
            auto_build: AutoBuildRun::Never,
            use_sub_file: false,
            root_files_include: [
                "**/*.tex", "**/*.rnw", "**/*.Rnw", "**/*.rtex", "**/*.Rtex", "**/*.snw",
                "**/*.Snw", "**/*.jnw", "**/*.jtexw",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            root_files_exclude: Vec::new(),
            watch_ignore: [
                "**/*.bbx", "**/*.cbx", "**/*.cfg", "**/*.clo", "**/*.cnf", "**/*.def",
                "**/*.fmt", "**/*.ldf", "**/*.map", "**/*.pfb", "**/*.sty", "**/*.cls",
                "**/*.fd", "**/*.tfm", "**/*.vf", "**/*.code.tex", "**/texmf-dist/**",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            verbatim_envs: ["verbatim", "lstlisting", "minted"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            kpsewhich_enabled: false,
            kpsewhich_path: "kpsewhich".to_string(),
            trusted: true,
            tmp_dir: std::env::temp_dir(),
            ignore_matcher: IgnoreMatcher::default(),
        }
    }
}

impl ProjectConfig {
    /// Whether `path` matches one of the ignore globs
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_matcher.is_match(&self.watch_ignore, path)
    }

    /// Whether external tools may be spawned to resolve bibliographies
    pub fn kpsewhich_allowed(&self) -> bool {
        self.kpsewhich_enabled && self.trusted
    }
}

/// `watch_ignore` globs, compiled on first use and kept with the config
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    compiled: OnceLock<(Vec<String>, Option<GlobSet>)>,
}

impl IgnoreMatcher {
    fn is_match(&self, patterns: &[String], path: &Path) -> bool {
        let (compiled_from, set) = self
            .compiled
            .get_or_init(|| (patterns.to_vec(), build_globset(patterns)));
        if compiled_from.as_slice() == patterns {
            return set.as_ref().is_some_and(|set| set.is_match(path));
        }
        // Patterns were edited after the first match
        build_globset(patterns).is_some_and(|set| set.is_match(path))
    }

    #[cfg(test)]
    fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }
}

impl PartialEq for IgnoreMatcher {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Compile glob patterns, skipping (and logging) invalid ones.
/// Returns `None` when no pattern compiles.
pub fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut count = 0;
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
                count += 1;
            }
            Err(e) => log::warn!("Ignoring invalid glob '{}': {}", pattern, e),
        }
    }
    if count == 0 {
        return None;
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            log::warn!("Failed to build glob set: {}", e);
            None
        }
    }
}

/// Key-value configuration lookup, scoped by file path
pub trait ConfigSource: Send + Sync {
    fn config(&self, scope: Option<&Path>) -> Arc<ProjectConfig>;
}

/// One configuration for every scope, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticConfig {
    inner: RwLock<Arc<ProjectConfig>>,
}

impl StaticConfig {
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    pub fn replace(&self, config: ProjectConfig) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Arc::new(config);
        }
    }
}

impl ConfigSource for StaticConfig {
    fn config(&self, _scope: Option<&Path>) -> Arc<ProjectConfig> {
        self.inner
            .read()
            .map(|c| Arc::clone(&*c))
            .unwrap_or_default()
    }
}

fn string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(|p| p.as_str())
            .filter(|s| !s.is_empty() && !s.contains('\0'))
            .map(|s| s.to_string())
            .collect()
    })
}

fn path_list(value: &serde_json::Value) -> Option<Vec<PathBuf>> {
    string_list(value).map(|items| items.into_iter().map(PathBuf::from).collect())
}

/// Parse project configuration from editor-style settings.
///
/// Reads the top-level `latex` section (plus `kpsewhich` and `workspace`).
/// Only keys present in the JSON are applied; absent keys keep their
/// defaults from `ProjectConfig::default()`.
///
/// # Returns
///
/// `Some(ProjectConfig)` when the `latex` section is present, `None` otherwise.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use texproject::config::{parse_project_config, AutoBuildRun};
///
/// let settings = json!({
///     "latex": {
///         "texDirs": ["chapters"],
///         "outDir": "%DIR%/build",
///         "autoBuild": { "run": "onSave" }
///     },
///     "kpsewhich": { "enabled": true }
/// });
/// let cfg = parse_project_config(&settings).unwrap();
/// assert_eq!(cfg.out_dir, "%DIR%/build");
/// assert_eq!(cfg.auto_build, AutoBuildRun::OnSave);
/// assert!(cfg.kpsewhich_enabled);
/// ```
pub fn parse_project_config(settings: &serde_json::Value) -> Option<ProjectConfig> {
    let latex = settings.get("latex")?;
    let mut config = ProjectConfig::default();

    if let Some(v) = latex.get("texDirs").and_then(path_list) {
        config.tex_dirs = v;
    }
    if let Some(v) = latex.get("bibDirs").and_then(path_list) {
        config.bib_dirs = v;
    }
    if let Some(v) = latex.get("outDir").and_then(|v| v.as_str()) {
        config.out_dir = v.to_string();
    }
    if let Some(v) = latex
        .get("autoBuild")
        .and_then(|a| a.get("run"))
        .and_then(|v| v.as_str())
    {
        config.auto_build = AutoBuildRun::parse(v);
    }
    if let Some(v) = latex
        .get("rootFile")
        .and_then(|r| r.get("useSubFile"))
        .and_then(|v| v.as_bool())
    {
        config.use_sub_file = v;
    }
    if let Some(root_files) = latex.get("search").and_then(|s| s.get("rootFiles")) {
        if let Some(v) = root_files.get("include").and_then(string_list) {
            config.root_files_include = v;
        }
        if let Some(v) = root_files.get("exclude").and_then(string_list) {
            config.root_files_exclude = v;
        }
    }
    if let Some(v) = latex
        .get("watch")
        .and_then(|w| w.get("files"))
        .and_then(|f| f.get("ignore"))
        .and_then(string_list)
    {
        config.watch_ignore = v;
    }
    if let Some(v) = latex.get("verbatimEnvs").and_then(string_list) {
        config.verbatim_envs = v;
    }

    if let Some(kpsewhich) = settings.get("kpsewhich") {
        if let Some(v) = kpsewhich.get("enabled").and_then(|v| v.as_bool()) {
            config.kpsewhich_enabled = v;
        }
        if let Some(v) = kpsewhich.get("path").and_then(|v| v.as_str()) {
            if !v.is_empty() && !v.contains('\0') {
                config.kpsewhich_path = v.to_string();
            }
        }
    }
    if let Some(v) = settings
        .get("workspace")
        .and_then(|w| w.get("trusted"))
        .and_then(|v| v.as_bool())
    {
        config.trusted = v;
    }

    log::info!("Project configuration loaded from settings:");
    log::info!("  tex_dirs: {:?}", config.tex_dirs);
    log::info!("  bib_dirs: {:?}", config.bib_dirs);
    log::info!("  out_dir: {}", config.out_dir);
    log::info!("  auto_build: {:?}", config.auto_build);
    log::info!("  use_sub_file: {}", config.use_sub_file);
    log::info!("  root_files_include: {:?}", config.root_files_include);
    log::info!("  root_files_exclude: {:?}", config.root_files_exclude);
    log::info!("  watch_ignore: {:?}", config.watch_ignore);
    log::info!(
        "  kpsewhich: enabled={} path={} trusted={}",
        config.kpsewhich_enabled,
        config.kpsewhich_path,
        config.trusted
    );

    Some(config)
}
