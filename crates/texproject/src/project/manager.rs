//
// project/manager.rs
//
// Orchestration of root discovery, dependency parsing and file events
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use indexmap::IndexSet;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::bib::{scan_bib_directives, BibResolver};
use super::cache::{CacheEntry, DependencyCache};
use super::content::ContentSource;
use super::elements::{ElementExtractor, RegexElementExtractor};
use super::events::{BuildTrigger, EventBus, ProjectEvent, ProjectListener};
use super::fls::{parse_aux_bibdata, parse_fls_content, source_dir_for};
use super::mutex::{KeyedQueueMutex, QueueMutex};
use super::output::{self, PlaceholderContext};
use super::path_resolve::{normalize_path, parent_dir};
use super::root::{self, infer_language_id, FoundRoot, RootFinder};
use super::scanner::{resolve_inclusion, InclusionScanner};
use super::text::strip_comments_and_verbatim;
use super::watcher::{FileEvent, FileWatchSet, NullBackend, WatchBackend};
use crate::config::{AutoBuildRun, ConfigSource, ProjectConfig};
use crate::document_store::EditorState;
use crate::fs::FileAccess;
use crate::process::{ProcessSpawner, TokioProcessSpawner};

/// The capabilities the manager is built from
#[derive(Clone)]
pub struct Collaborators {
    pub fs: Arc<dyn FileAccess>,
    pub editor: Arc<dyn EditorState>,
    pub config: Arc<dyn ConfigSource>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub extractor: Arc<dyn ElementExtractor>,
    pub builder: Option<Arc<dyn BuildTrigger>>,
    pub watch_backend: Arc<dyn WatchBackend>,
}

impl Collaborators {
    /// Collaborators with the regex extractor, a tokio process spawner, no
    /// build trigger and no OS watching.
    pub fn new(
        fs: Arc<dyn FileAccess>,
        editor: Arc<dyn EditorState>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            fs,
            editor,
            config,
            spawner: Arc::new(TokioProcessSpawner::new()),
            extractor: Arc::new(RegexElementExtractor),
            builder: None,
            watch_backend: Arc::new(NullBackend),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ElementExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn BuildTrigger>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_watch_backend(mut self, backend: Arc<dyn WatchBackend>) -> Self {
        self.watch_backend = backend;
        self
    }
}

/// Current root selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootState {
    pub file: Option<PathBuf>,
    pub uri: Option<Url>,
    pub language_id: Option<String>,
    /// Open subfile whose main document is the root
    pub local_root_file: Option<PathBuf>,
}

/// Published after every root search settles
#[derive(Debug, Clone, Default)]
struct RootSearch {
    generation: u64,
    result: Option<PathBuf>,
}

/// Owns the dependency cache, the watch set and the root selection.
///
/// Work is serialized by four guards: root search (no waiting slot),
/// `.fls` parsing and completion refresh (one waiting slot each), and a
/// per-file guard for content rescans. A request rejected by a full guard
/// is dropped with an info log, since the running or queued request covers it.
pub struct Manager {
    workspace: Option<PathBuf>,
    content: Arc<ContentSource>,
    config: Arc<dyn ConfigSource>,
    extractor: Arc<dyn ElementExtractor>,
    builder: Option<Arc<dyn BuildTrigger>>,
    finder: RootFinder,
    bib: BibResolver,
    cache: DependencyCache,
    watch: FileWatchSet,
    events: EventBus,
    root: RwLock<RootState>,
    root_search: watch::Sender<RootSearch>,
    root_guard: QueueMutex,
    fls_guard: QueueMutex,
    completion_guard: QueueMutex,
    content_guard: KeyedQueueMutex<PathBuf>,
}

impl Manager {
    pub fn new(workspace: Option<PathBuf>, collaborators: Collaborators) -> Self {
        let content = Arc::new(ContentSource::new(
            collaborators.fs.clone(),
            collaborators.editor.clone(),
        ));
        let (root_search, _) = watch::channel(RootSearch::default());
        Self {
            workspace: workspace.map(|w| normalize_path(&w)),
            finder: RootFinder::new(content.clone()),
            bib: BibResolver::new(collaborators.fs.clone(), collaborators.spawner.clone()),
            content,
            config: collaborators.config,
            extractor: collaborators.extractor,
            builder: collaborators.builder,
            cache: DependencyCache::new(),
            watch: FileWatchSet::new(collaborators.watch_backend),
            events: EventBus::new(),
            root: RwLock::new(RootState::default()),
            root_search,
            root_guard: QueueMutex::new("root search", 0),
            fls_guard: QueueMutex::new("fls parse", 1),
            completion_guard: QueueMutex::new("completion update", 1),
            content_guard: KeyedQueueMutex::new("content update", 1),
        }
    }

    fn config_for(&self, path: Option<&Path>) -> Arc<ProjectConfig> {
        self.config.config(path)
    }

    // ------------------------------------------------------------------
    // Root state
    // ------------------------------------------------------------------

    pub fn root_state(&self) -> RootState {
        self.root.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn root_file(&self) -> Option<PathBuf> {
        self.root.read().ok()?.file.clone()
    }

    pub fn root_file_uri(&self) -> Option<Url> {
        self.root.read().ok()?.uri.clone()
    }

    pub fn root_dir(&self) -> Option<PathBuf> {
        self.root_file().map(|f| parent_dir(&f))
    }

    pub fn local_root_file(&self) -> Option<PathBuf> {
        self.root.read().ok()?.local_root_file.clone()
    }

    pub fn root_file_language_id(&self) -> Option<String> {
        self.root.read().ok()?.language_id.clone()
    }

    fn set_local_root_file(&self, path: Option<PathBuf>) {
        if let Ok(mut state) = self.root.write() {
            state.local_root_file = path;
        }
    }

    fn clear_root(&self) {
        if let Ok(mut state) = self.root.write() {
            *state = RootState::default();
        }
    }

    /// Resolves with the root once no search is running, waiting for the
    /// in-flight or next search when needed.
    pub async fn wait_for_root(&self) -> Option<PathBuf> {
        let mut rx = self.root_search.subscribe();
        if !self.root_guard.is_busy() {
            if let Some(root) = self.root_file() {
                return Some(root);
            }
        }
        if rx.changed().await.is_err() {
            return self.root_file();
        }
        let result = rx.borrow().result.clone();
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Snapshot of the cache entry for `path`
    pub fn get_cached_content(&self, path: &Path) -> Option<CacheEntry> {
        self.cache.get(path)
    }

    pub fn cached_files(&self) -> Vec<PathBuf> {
        self.cache.paths()
    }

    /// `file` (default: the root) and every file it includes, transitively
    pub fn get_included_tex(&self, file: Option<&Path>) -> Vec<PathBuf> {
        match file.map(Path::to_path_buf).or_else(|| self.root_file()) {
            Some(file) => self.cache.included_tex(&file),
            None => Vec::new(),
        }
    }

    /// Bibliographies of `file` (default: the root) and everything it includes
    pub fn get_included_bib(&self, file: Option<&Path>) -> Vec<PathBuf> {
        match file.map(Path::to_path_buf).or_else(|| self.root_file()) {
            Some(file) => self.cache.included_bib(&file),
            None => Vec::new(),
        }
    }

    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.watch.paths()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.watch.contains(path)
    }

    /// Whether `path` is one of the root's tex or bib dependencies
    pub fn is_in_project(&self, path: &Path) -> bool {
        self.get_included_tex(None).iter().any(|p| p == path)
            || self.get_included_bib(None).iter().any(|p| p == path)
    }

    /// Output directory for `path` (default: the root), `./` without a root
    pub fn get_out_dir(&self, path: Option<&Path>) -> PathBuf {
        let Some(doc) = path.map(Path::to_path_buf).or_else(|| self.root_file()) else {
            return PathBuf::from("./");
        };
        let config = self.config_for(Some(&doc));
        let ctx = PlaceholderContext {
            doc: &doc,
            workspace: self.workspace.as_deref(),
            tmp_dir: &config.tmp_dir,
        };
        output::out_dir(&config.out_dir, &ctx)
    }

    /// PDF path for `tex`, in the output directory or next to the source
    pub fn tex2pdf(&self, tex: &Path, respect_out_dir: bool) -> PathBuf {
        let out_dir = if respect_out_dir {
            self.get_out_dir(Some(tex))
        } else {
            PathBuf::from("./")
        };
        output::tex2pdf(tex, &out_dir)
    }

    pub fn subscribe(&self, listener: Arc<dyn ProjectListener>) {
        self.events.subscribe(listener);
    }

    // ------------------------------------------------------------------
    // Root search
    // ------------------------------------------------------------------

    /// Find the root and, if it changed, rebuild the dependency tree.
    ///
    /// A call made while another search runs waits for that search and
    /// returns its result.
    pub async fn find_root(&self) -> Option<PathBuf> {
        let mut rx = self.root_search.subscribe();
        let guard = match self.root_guard.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                log::info!("{}; waiting for the running search", e);
                if rx.changed().await.is_err() {
                    return self.root_file();
                }
                let result = rx.borrow().result.clone();
                return result;
            }
        };

        let (result, changed) = self.search_and_apply_root().await;

        // Release before publishing so a caller that sees the old value
        // can start its own search.
        drop(guard);
        self.root_search.send_modify(|s| {
            s.generation += 1;
            s.result = result.clone();
        });

        if let (Some(root), true) = (&result, changed) {
            self.events
                .fire(ProjectEvent::CompletionUpdated(root.clone()))
                .await;
            self.events.fire(ProjectEvent::RootChanged(root.clone())).await;
        }
        result
    }

    async fn find_root_candidate(&self, config: &ProjectConfig) -> Option<FoundRoot> {
        let active = self.content.editor().active_document();

        if let Some(active) = &active {
            if let Some(found) = self.finder.from_magic(active).await {
                return Some(found);
            }
            let root_dir = self.root_dir();
            if let Some(found) = self
                .finder
                .from_active(active, root_dir.as_deref(), config)
                .await
            {
                return Some(found);
            }
            let current = self.root_file();
            let included = self.get_included_tex(None);
            if let Some(found) = root::from_current_root(current.as_deref(), &active.path, &included) {
                return Some(found);
            }
        }

        let workspace = self.workspace.as_deref()?;
        self.finder
            .in_workspace(workspace, active.as_ref().map(|a| a.path.as_path()), config)
            .await
    }

    /// Returns the search result and whether the root changed
    async fn search_and_apply_root(&self) -> (Option<PathBuf>, bool) {
        let config = self.config_for(self.workspace.as_deref());
        self.set_local_root_file(None);

        let Some(found) = self.find_root_candidate(&config).await else {
            log::info!("No root file found");
            return (None, false);
        };
        self.set_local_root_file(found.local_root_file.clone());

        let path = found.path;
        let previous = self.root_file();
        if previous.as_deref() == Some(path.as_path()) {
            log::info!("Keep using the same root file: {}", path.display());
            return (Some(path), false);
        }

        log::info!(
            "Root file changed: from {} to {}",
            previous
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            path.display()
        );
        let language_id = infer_language_id(&path).unwrap_or_else(|| "latex".to_string());
        log::info!("Root file languageId: {}", language_id);
        if let Ok(mut state) = self.root.write() {
            state.file = Some(path.clone());
            state.uri = found.uri.or_else(|| Url::from_file_path(&path).ok());
            state.language_id = Some(language_id);
        }

        self.watch.reset();
        self.cache.clear();
        self.content_guard.prune();

        log::info!("Start to find all dependencies");
        self.parse_file_and_subs(&path, &path).await;
        self.parse_fls(&path).await;
        match self.completion_guard.acquire().await {
            Ok(_guard) => self.refresh_elements(&path).await,
            Err(e) => log::info!("{}; skipping element refresh", e),
        }
        (Some(path), true)
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parse `file` and everything it includes, depth first in content order.
    ///
    /// `root` is the document the inclusions are resolved for. Each call
    /// keeps its own visited set.
    pub async fn parse_file_and_subs(&self, file: &Path, root: &Path) {
        let config = self.config_for(Some(file));
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut stack = vec![file.to_path_buf()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(children) = self.update_file_entry(&current, root, &config).await else {
                continue;
            };
            for child in children.iter().rev() {
                if !visited.contains(child) {
                    stack.push(child.clone());
                }
            }
        }
    }

    /// Rescan the stale parts of one file's entry and return its children.
    /// `None` when the file is ignored or unreadable.
    async fn update_file_entry(
        &self,
        file: &Path,
        root: &Path,
        config: &ProjectConfig,
    ) -> Option<IndexSet<PathBuf>> {
        if config.is_ignored(file) {
            log::debug!("Ignoring {}", file.display());
            return None;
        }
        self.cache.ensure(file);
        let newly_watched = self.watch.add(file);

        let _guard = match self.content_guard.acquire(&file.to_path_buf()).await {
            Ok(guard) => guard,
            Err(e) => {
                log::info!("{}; reusing cached children of {}", e, file.display());
                return self.cache.get(file).map(|e| e.children.value);
            }
        };

        let dirty = self.content.is_dirty(file);
        let mtime = self.content.mtime(file).await;
        let entry = self.cache.get(file).unwrap_or_default();
        let children_stale = entry.children.is_stale(mtime, dirty);
        let bibs_stale = entry.bibs.is_stale(mtime, dirty);
        let elements_stale = newly_watched && entry.elements.is_stale(mtime, dirty);
        if !children_stale && !bibs_stale && !elements_stale {
            log::trace!("Cache entry of {} is fresh", file.display());
            return Some(entry.children.value);
        }

        let Some(content) = self.content.load(file).await else {
            log::debug!("Cannot read {}; skipping", file.display());
            return None;
        };
        log::debug!("Parsing {}", file.display());
        let stamp = content.scan_stamp();
        let stripped = strip_comments_and_verbatim(&content.text, &config.verbatim_envs);

        if elements_stale {
            let elements = self.extractor.extract(file, &stripped);
            self.cache.update(file, |e| e.elements.refresh(elements, stamp));
        }

        if bibs_stale {
            let bibs = self.scan_bibs(&stripped, file, root, config).await;
            self.cache.update(file, |e| e.bibs.refresh(bibs, stamp));
        }

        if !children_stale {
            return Some(entry.children.value);
        }
        let children = self.scan_children(&stripped, file, root, config).await;
        self.cache
            .update(file, |e| e.children.refresh(children.clone(), stamp));
        Some(children)
    }

    async fn scan_children(
        &self,
        stripped: &str,
        file: &Path,
        root: &Path,
        config: &ProjectConfig,
    ) -> IndexSet<PathBuf> {
        let matches: Vec<_> = InclusionScanner::new(stripped).collect();
        let mut children = IndexSet::new();
        for m in &matches {
            if let Some(child) =
                resolve_inclusion(self.content.fs(), m, file, root, &config.tex_dirs).await
            {
                log::trace!("Found child {} in {}", child.display(), file.display());
                children.insert(child);
            }
        }
        children
    }

    async fn scan_bibs(
        &self,
        stripped: &str,
        file: &Path,
        root: &Path,
        config: &ProjectConfig,
    ) -> IndexSet<PathBuf> {
        let base_dir = parent_dir(file);
        let root_dir = parent_dir(root);
        let mut bibs = IndexSet::new();
        for name in scan_bib_directives(stripped) {
            match self.bib.resolve(&name, &base_dir, Some(root_dir.as_path()), config).await {
                Some(bib) => {
                    if !config.is_ignored(&bib) {
                        self.watch.add(&bib);
                    }
                    bibs.insert(bib);
                }
                None => log::debug!("Bibliography '{}' in {} not found", name, file.display()),
            }
        }
        bibs
    }

    /// Rescan `file` (default: the root) and its new children, then
    /// refresh completion elements.
    pub async fn refresh(&self, file: Option<&Path>) {
        let Some(root) = self.root_file() else {
            return;
        };
        let file = file.map(Path::to_path_buf).unwrap_or_else(|| root.clone());
        self.update_single_file(&file, &root).await;
        self.update_completion().await;
    }

    /// Update one file's entry and parse children that are not tracked yet
    async fn update_single_file(&self, file: &Path, root: &Path) {
        let config = self.config_for(Some(file));
        let Some(children) = self.update_file_entry(file, root, &config).await else {
            return;
        };
        for child in children {
            if !self.watch.contains(&child) || !self.cache.contains(&child) {
                self.parse_file_and_subs(&child, root).await;
            }
        }
    }

    /// Merge the build's `.fls` record for `tex` into the dependency tree.
    ///
    /// TeX inputs the static scan missed become children of `tex`; other
    /// inputs are only watched. Bibliographies named in `.aux` outputs are
    /// added to `tex`'s bibliographies.
    pub async fn parse_fls(&self, tex: &Path) {
        let _guard = match self.fls_guard.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                log::info!("{}; skipping .fls parse of {}", e, tex.display());
                return;
            }
        };

        let config = self.config_for(Some(tex));
        let source_dir = parent_dir(tex);
        let out_dir = normalize_path(&source_dir.join(self.get_out_dir(Some(tex))));
        let fls_file = output::fls_path(tex, &out_dir);
        let Some(text) = self.content.fs().read_graceful(&fls_file).await else {
            log::debug!("Cannot find .fls file: {}", fls_file.display());
            return;
        };
        log::debug!("Parsing .fls file: {}", fls_file.display());
        let records = parse_fls_content(&text, &source_dir);

        for input in records.external_inputs() {
            if input == tex || config.is_ignored(input) {
                continue;
            }
            let is_tex = input.extension().is_some_and(|e| e == "tex");
            if is_tex {
                let Some(entry) = self.cache.get(tex) else {
                    log::debug!("Cache not ready for {} when parsing .fls", tex.display());
                    continue;
                };
                if entry.children.value.contains(input) {
                    continue;
                }
            } else if self.watch.contains(input) {
                continue;
            }
            if !self.content.fs().exists(input).await {
                continue;
            }
            if is_tex {
                log::debug!("Adding {} from .fls", input.display());
                self.cache.update(tex, |e| {
                    e.children.value.insert(input.clone());
                });
                self.parse_file_and_subs(input, tex).await;
            } else {
                self.watch.add(input);
            }
        }

        for aux in records.aux_outputs() {
            let Some(aux_text) = self.content.fs().read_graceful(aux).await else {
                continue;
            };
            let bib_dir = source_dir_for(&parent_dir(aux), &out_dir, &source_dir);
            for name in parse_aux_bibdata(&aux_text) {
                let Some(bib) = self
                    .bib
                    .resolve(&name, &bib_dir, Some(source_dir.as_path()), &config)
                    .await
                else {
                    log::debug!("Bibliography '{}' from {} not found", name, aux.display());
                    continue;
                };
                self.cache.update(tex, |e| {
                    e.bibs.value.insert(bib.clone());
                });
                if !config.is_ignored(&bib) {
                    self.watch.add(&bib);
                }
            }
        }
    }

    /// Re-extract stale completion elements of the project and notify
    /// listeners.
    pub async fn update_completion(&self) {
        let root = {
            let _guard = match self.completion_guard.acquire().await {
                Ok(guard) => guard,
                Err(e) => {
                    log::info!("{}; skipping", e);
                    return;
                }
            };
            let Some(root) = self.root_file() else {
                return;
            };
            self.refresh_elements(&root).await;
            root
        };
        self.events.fire(ProjectEvent::CompletionUpdated(root)).await;
    }

    async fn refresh_elements(&self, root: &Path) {
        let config = self.config_for(Some(root));
        let files = self
            .get_included_tex(Some(root))
            .into_iter()
            .map(|f| (f, true))
            .chain(self.get_included_bib(Some(root)).into_iter().map(|f| (f, false)));

        for (file, is_tex) in files {
            let dirty = self.content.is_dirty(&file);
            let mtime = self.content.mtime(&file).await;
            let stale = self
                .cache
                .get(&file)
                .map(|e| e.elements.is_stale(mtime, dirty))
                .unwrap_or(true);
            if !stale {
                continue;
            }
            let Some(content) = self.content.load(&file).await else {
                continue;
            };
            let text = if is_tex {
                strip_comments_and_verbatim(&content.text, &config.verbatim_envs)
            } else {
                content.text.clone()
            };
            let elements = self.extractor.extract(&file, &text);
            let stamp = content.scan_stamp();
            self.cache.update(&file, |e| e.elements.refresh(elements, stamp));
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// The focused document changed
    pub async fn on_active_editor_changed(&self) -> Option<PathBuf> {
        let active = self.content.editor().active_document()?;
        let tex_like = infer_language_id(&active.path).is_some()
            || matches!(
                active.language_id.as_str(),
                "latex" | "rsweave" | "jlweave" | "doctex"
            );
        if !tex_like {
            return None;
        }
        self.find_root().await
    }

    /// A buffer was edited. Its unsaved content is rescanned right away.
    pub async fn on_document_changed(&self, path: &Path) {
        if !self.cache.contains(path) {
            return;
        }
        self.refresh(Some(path)).await;
    }

    /// A document was saved. Saving any LaTeX document builds the current
    /// root, or the open subfile when configured.
    pub async fn on_document_saved(&self, path: &Path) {
        if infer_language_id(path).is_none() {
            return;
        }
        let config = self.config_for(Some(path));
        if config.auto_build == AutoBuildRun::OnSave {
            log::info!("Auto build started on saving file: {}", path.display());
            self.trigger_build(false, &config);
        }
    }

    /// Dispatch a watcher event. Events for unwatched files are dropped.
    pub async fn on_file_event(&self, event: FileEvent) {
        if !self.watch.accepts(&event) {
            log::trace!("Dropping event for unwatched file: {:?}", event);
            return;
        }
        match event {
            FileEvent::Changed(path) | FileEvent::Created(path) => {
                self.on_watched_file_changed(&path).await
            }
            FileEvent::Deleted(path) => self.on_watched_file_deleted(&path).await,
        }
    }

    pub async fn on_watched_file_changed(&self, path: &Path) {
        log::info!("File watcher - file changed: {}", path.display());
        let is_bib = path.extension().is_some_and(|e| e == "bib");
        if infer_language_id(path).is_some() {
            if let Some(root) = self.root_file() {
                self.update_single_file(path, &root).await;
            }
            self.update_completion().await;
        } else if is_bib {
            self.update_completion().await;
        }

        let config = self.config_for(Some(path));
        if config.auto_build == AutoBuildRun::OnFileChange {
            log::info!("Auto build started detecting the change of a file: {}", path.display());
            self.trigger_build(is_bib, &config);
        }
    }

    pub async fn on_watched_file_deleted(&self, path: &Path) {
        log::info!("File watcher - file deleted: {}", path.display());
        self.watch.remove(path);
        self.cache.remove(path);
        if self.root_file().as_deref() == Some(path) {
            log::info!("Root file deleted: {}", path.display());
            self.clear_root();
            self.find_root().await;
        }
    }

    /// A build of `root` finished
    pub async fn on_build_finished(&self, root: &Path) {
        self.parse_fls(root).await;
        self.events
            .fire(ProjectEvent::BuildFinished(root.to_path_buf()))
            .await;
    }

    /// Start a build of the current target on its own task. File events
    /// keep flowing while the build runs.
    fn trigger_build(&self, bib_changed: bool, config: &ProjectConfig) {
        let Some(builder) = &self.builder else {
            log::debug!("No build trigger configured");
            return;
        };
        let state = self.root_state();
        let target = match (&state.local_root_file, config.use_sub_file && !bib_changed) {
            (Some(local), true) => local.clone(),
            _ => match state.file {
                Some(root) => root,
                None => return,
            },
        };
        let language_id = infer_language_id(&target)
            .or(state.language_id)
            .unwrap_or_else(|| "latex".to_string());
        let builder = Arc::clone(builder);
        tokio::spawn(async move {
            if let Err(e) = builder.build(&target, &language_id).await {
                log::warn!("Build of {} failed: {}", target.display(), e);
            }
        });
    }

    /// Feed watcher events to the manager until `cancel` fires or the
    /// channel closes.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<FileEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::debug!("File event loop cancelled");
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(event) => manager.on_file_event(event).await,
                        None => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::document_store::DocumentStore;
    use crate::test_utils::memory_fs::MemoryFs;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingBuilder {
        builds: Mutex<Vec<PathBuf>>,
        started: Notify,
    }

    #[async_trait]
    impl BuildTrigger for RecordingBuilder {
        async fn build(&self, root: &Path, _language_id: &str) -> Result<()> {
            self.builds.lock().unwrap().push(root.to_path_buf());
            self.started.notify_one();
            Ok(())
        }
    }

    impl RecordingBuilder {
        /// Builds run on their own task; wait until `count` have started.
        async fn wait_for(&self, count: usize) -> Vec<PathBuf> {
            let _ = tokio::time::timeout(Duration::from_secs(5), async {
                while self.builds.lock().unwrap().len() < count {
                    self.started.notified().await;
                }
            })
            .await;
            self.builds.lock().unwrap().clone()
        }
    }

    /// A build that never finishes
    #[derive(Default)]
    struct StuckBuilder {
        started: AtomicUsize,
    }

    #[async_trait]
    impl BuildTrigger for StuckBuilder {
        async fn build(&self, _root: &Path, _language_id: &str) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Fixture {
        fs: Arc<MemoryFs>,
        store: Arc<DocumentStore>,
        config: Arc<StaticConfig>,
        builder: Arc<RecordingBuilder>,
        manager: Arc<Manager>,
    }

    fn fixture() -> Fixture {
        let fs = Arc::new(MemoryFs::new());
        let store = Arc::new(DocumentStore::new());
        let config = Arc::new(StaticConfig::new(ProjectConfig::default()));
        let builder = Arc::new(RecordingBuilder::default());
        let collaborators = Collaborators::new(fs.clone(), store.clone(), config.clone())
            .with_builder(builder.clone());
        let manager = Arc::new(Manager::new(Some(PathBuf::from("/p")), collaborators));
        Fixture {
            fs,
            store,
            config,
            builder,
            manager,
        }
    }

    /// Write `path` to disk and focus it as a clean buffer
    fn activate(f: &Fixture, path: &str, text: &str) {
        f.fs.insert(path, text);
        f.store.open(Path::new(path), text);
        f.store.set_active(Some(Path::new(path)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_find_root_from_active_document() {
        let f = fixture();
        f.fs.insert("/p/foo.tex", "\\label{sec:foo}");
        activate(&f, "/p/main.tex", "\\begin{document}\\input{foo}\\end{document}");

        let root = f.manager.find_root().await;
        assert_eq!(root, Some(PathBuf::from("/p/main.tex")));
        assert_eq!(f.manager.root_file_language_id().as_deref(), Some("latex"));
        assert_eq!(f.manager.root_dir(), Some(PathBuf::from("/p")));
        assert!(f.manager.is_watched(Path::new("/p/foo.tex")));
        let foo = f.manager.get_cached_content(Path::new("/p/foo.tex")).unwrap();
        assert!(foo.elements.value.labels.contains("sec:foo"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_root_keeps_cache() {
        let f = fixture();
        activate(&f, "/p/main.tex", "\\begin{document}\\end{document}");
        f.manager.find_root().await;
        let before = f.manager.get_cached_content(Path::new("/p/main.tex")).unwrap();
        f.manager.find_root().await;
        let after = f.manager.get_cached_content(Path::new("/p/main.tex")).unwrap();
        assert_eq!(before.children.generation, after.children.generation);
    }

    #[tokio::test]
    async fn test_staleness_triggers_exactly_one_rescan() {
        let f = fixture();
        f.fs.insert("/p/main.tex", "\\input{a}");
        f.fs.insert("/p/a.tex", "");
        let main = Path::new("/p/main.tex");

        f.manager.parse_file_and_subs(main, main).await;
        let first = f.manager.get_cached_content(main).unwrap();
        assert_eq!(first.children.generation, 1);

        // Unchanged file: no rescan, no read
        f.fs.reset_read_counts();
        f.manager.parse_file_and_subs(main, main).await;
        assert_eq!(f.fs.read_count(main), 0);

        f.fs.insert("/p/b.tex", "");
        f.fs.insert(main, "\\input{a}\\input{b}");
        f.manager.parse_file_and_subs(main, main).await;
        f.manager.parse_file_and_subs(main, main).await;
        let entry = f.manager.get_cached_content(main).unwrap();
        assert_eq!(entry.children.generation, 2);
        assert_eq!(entry.children.mtime, f.fs_mtime(main).await);
        assert_eq!(f.fs.read_count(main), 1);
        assert_eq!(entry.children.value.len(), 2);
    }

    impl Fixture {
        async fn fs_mtime(&self, path: &Path) -> Option<std::time::SystemTime> {
            self.fs.stat(path).await.ok().map(|s| s.mtime)
        }
    }

    #[tokio::test]
    async fn test_dirty_buffer_precedence() {
        let f = fixture();
        let main = Path::new("/p/main.tex");
        f.fs.insert(main, "\\input{disk}");
        f.fs.insert("/p/disk.tex", "");
        f.fs.insert("/p/buffer.tex", "");
        f.store.open(main, "\\input{disk}");
        f.store.edit(main, "\\input{buffer}");
        // A newer disk version must not win over the dirty buffer
        f.fs.touch(main);

        f.manager.parse_file_and_subs(main, main).await;
        assert_eq!(
            f.manager.get_included_tex(Some(main)),
            vec![main.to_path_buf(), PathBuf::from("/p/buffer.tex")]
        );
    }

    #[tokio::test]
    async fn test_unreadable_child_does_not_abort_traversal() {
        let f = fixture();
        let main = Path::new("/p/main.tex");
        f.fs.insert(main, "\\input{a}\\input{b}");
        f.fs.insert("/p/a.tex", "");
        f.fs.insert("/p/b.tex", "\\input{c}");
        f.fs.insert("/p/c.tex", "");
        f.fs.remove("/p/a.tex");
        f.manager.parse_file_and_subs(main, main).await;
        assert_eq!(
            f.manager.get_included_tex(Some(main)),
            vec![
                main.to_path_buf(),
                PathBuf::from("/p/b.tex"),
                PathBuf::from("/p/c.tex")
            ]
        );
    }

    #[tokio::test]
    async fn test_ignored_files_are_not_parsed() {
        let f = fixture();
        let main = Path::new("/p/main.tex");
        f.fs.insert(main, "\\input{pkg.code.tex}");
        f.fs.insert("/p/pkg.code.tex", "\\input{deep}");
        f.fs.insert("/p/deep.tex", "");
        f.manager.parse_file_and_subs(main, main).await;
        assert!(!f.manager.is_watched(Path::new("/p/pkg.code.tex")));
        assert!(f.manager.get_cached_content(Path::new("/p/deep.tex")).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parse_fls_merges_inputs_and_aux_bibs() {
        let f = fixture();

        f.fs.insert("/p/chapters/x.tex", "\\label{x}");
        f.fs.insert("/p/figure.pdf", "");
        f.fs.insert("/p/refs.bib", "@book{k,}");
        f.fs.insert(
            "/p/main.fls",
            "PWD /p\nINPUT /p/main.tex\nINPUT chapters/x.tex\nINPUT figure.pdf\nINPUT /usr/share/texmf-dist/tex/latex/base/size10.clo\nOUTPUT main.aux\n",
        );
        f.fs.insert("/p/main.aux", "\\relax\n\\bibdata{refs}\n");
        activate(&f, "/p/main.tex", "\\begin{document}\\input{\\chapterdir/x}\\end{document}");

        f.manager.find_root().await;
        let main = Path::new("/p/main.tex");
        assert_eq!(
            f.manager.get_included_tex(Some(main)),
            vec![main.to_path_buf(), PathBuf::from("/p/chapters/x.tex")]
        );
        assert!(f.manager.is_watched(Path::new("/p/figure.pdf")));
        assert_eq!(
            f.manager.get_included_bib(Some(main)),
            vec![PathBuf::from("/p/refs.bib")]
        );
        assert!(f.manager.is_watched(Path::new("/p/refs.bib")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watched_change_updates_and_builds() {
        let f = fixture();
        f.config.replace(ProjectConfig {
            auto_build: AutoBuildRun::OnFileChange,
            ..ProjectConfig::default()
        });
        f.fs.insert("/p/a.tex", "");
        activate(&f, "/p/main.tex", "\\begin{document}\\input{a}\\end{document}");
        f.manager.find_root().await;

        f.fs.insert("/p/new.tex", "\\label{fresh}");
        f.fs.insert("/p/a.tex", "\\input{new}");
        f.manager
            .on_file_event(FileEvent::Changed(PathBuf::from("/p/a.tex")))
            .await;

        assert!(f
            .manager
            .get_included_tex(None)
            .contains(&PathBuf::from("/p/new.tex")));
        assert!(f.manager.is_watched(Path::new("/p/new.tex")));
        assert_eq!(f.builder.wait_for(1).await, vec![PathBuf::from("/p/main.tex")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_events_for_unwatched_files_are_dropped() {
        let f = fixture();
        f.config.replace(ProjectConfig {
            auto_build: AutoBuildRun::OnFileChange,
            ..ProjectConfig::default()
        });
        f.manager
            .on_file_event(FileEvent::Changed(PathBuf::from("/p/stranger.tex")))
            .await;
        assert!(f.builder.builds.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_on_save_targets_subfile_when_configured() {
        let f = fixture();
        f.config.replace(ProjectConfig {
            auto_build: AutoBuildRun::OnSave,
            use_sub_file: true,
            ..ProjectConfig::default()
        });
        f.fs.insert("/p/main.tex", "\\begin{document}\\subfile{sub}\\end{document}");
        activate(
            &f,
            "/p/sub.tex",
            "\\documentclass[main]{subfiles}\n\\begin{document}\\end{document}",
        );
        f.manager.find_root().await;
        assert_eq!(f.manager.local_root_file(), Some(PathBuf::from("/p/sub.tex")));

        f.manager.on_document_saved(Path::new("/p/notes.txt")).await;
        f.manager.on_document_saved(Path::new("/p/sub.tex")).await;
        assert_eq!(f.builder.wait_for(1).await, vec![PathBuf::from("/p/sub.tex")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_saving_latex_outside_cached_tree_builds_root() {
        let f = fixture();
        f.config.replace(ProjectConfig {
            auto_build: AutoBuildRun::OnSave,
            ..ProjectConfig::default()
        });
        activate(&f, "/p/main.tex", "\\begin{document}\\end{document}");
        f.manager.find_root().await;

        let loose = Path::new("/p/scratch.tex");
        f.fs.insert(loose, "\\section{draft}");
        f.store.open(loose, "\\section{draft}");
        assert!(!f.manager.is_in_project(loose));

        f.manager.on_document_saved(loose).await;
        assert_eq!(f.builder.wait_for(1).await, vec![PathBuf::from("/p/main.tex")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fls_input_survives_rescan_and_rebuild() {
        let f = fixture();
        let main = Path::new("/p/main.tex");
        let generated = PathBuf::from("/p/generated.tex");
        f.fs.insert(&generated, "\\label{gen}");
        f.fs.insert("/p/main.fls", "PWD /p\nINPUT /p/main.tex\nINPUT ./generated.tex\n");
        activate(&f, "/p/main.tex", "\\begin{document}\\end{document}");
        f.manager.find_root().await;

        f.manager.on_build_finished(main).await;
        assert_eq!(
            f.manager.get_included_tex(None),
            vec![main.to_path_buf(), generated.clone()]
        );

        // Edit on disk with the buffer closed; the rescan only sees static inputs
        f.store.close(main);
        f.fs.insert(main, "\\begin{document}\n\\end{document}");
        f.manager
            .on_file_event(FileEvent::Changed(main.to_path_buf()))
            .await;
        assert_eq!(f.manager.get_included_tex(None), vec![main.to_path_buf()]);

        f.manager.on_build_finished(main).await;
        assert_eq!(
            f.manager.get_included_tex(None),
            vec![main.to_path_buf(), generated]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deleting_root_searches_again() {
        let f = fixture();
        f.fs.insert("/p/a.tex", "\\begin{document}\\end{document}");
        f.fs.insert("/p/b.tex", "\\begin{document}\\end{document}");
        f.manager.find_root().await;
        assert_eq!(f.manager.root_file(), Some(PathBuf::from("/p/a.tex")));

        f.fs.remove("/p/a.tex");
        f.manager
            .on_file_event(FileEvent::Deleted(PathBuf::from("/p/a.tex")))
            .await;
        assert_eq!(f.manager.root_file(), Some(PathBuf::from("/p/b.tex")));
        assert!(f.manager.get_cached_content(Path::new("/p/a.tex")).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_find_root_collapses() {
        let f = fixture();
        activate(&f, "/p/main.tex", "\\begin{document}\\end{document}");

        let searches: Vec<_> = (0..4)
            .map(|_| {
                let manager = f.manager.clone();
                tokio::spawn(async move { manager.find_root().await })
            })
            .collect();
        for search in searches {
            assert_eq!(search.await.unwrap(), Some(PathBuf::from("/p/main.tex")));
        }
        assert_eq!(
            f.manager
                .get_cached_content(Path::new("/p/main.tex"))
                .unwrap()
                .children
                .generation,
            1
        );
    }

    #[tokio::test]
    async fn test_out_dir_and_tex2pdf() {
        let f = fixture();
        assert_eq!(f.manager.get_out_dir(None), PathBuf::from("./"));
        f.config.replace(ProjectConfig {
            out_dir: "%DIR%/build".into(),
            ..ProjectConfig::default()
        });
        let tex = Path::new("/p/main.tex");
        assert_eq!(f.manager.get_out_dir(Some(tex)), PathBuf::from("/p/build"));
        assert_eq!(f.manager.tex2pdf(tex, true), PathBuf::from("/p/build/main.pdf"));
        assert_eq!(f.manager.tex2pdf(tex, false), PathBuf::from("/p/main.pdf"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_running_build_does_not_block_event_loop() {
        let fs = Arc::new(MemoryFs::new());
        let store = Arc::new(DocumentStore::new());
        let config = Arc::new(StaticConfig::new(ProjectConfig {
            auto_build: AutoBuildRun::OnFileChange,
            ..ProjectConfig::default()
        }));
        let builder = Arc::new(StuckBuilder::default());
        let collaborators =
            Collaborators::new(fs.clone(), store.clone(), config).with_builder(builder.clone());
        let manager = Arc::new(Manager::new(Some(PathBuf::from("/p")), collaborators));

        fs.insert("/p/a.tex", "");
        fs.insert("/p/main.tex", "\\begin{document}\\input{a}\\end{document}");
        store.open(Path::new("/p/main.tex"), "\\begin{document}\\input{a}\\end{document}");
        store.set_active(Some(Path::new("/p/main.tex")));
        manager.find_root().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = manager.spawn_event_loop(rx, cancel.clone());

        tx.send(FileEvent::Changed(PathBuf::from("/p/a.tex"))).unwrap();
        fs.insert("/p/late.tex", "");
        fs.insert("/p/a.tex", "\\input{late}");
        tx.send(FileEvent::Changed(PathBuf::from("/p/a.tex"))).unwrap();

        let late = PathBuf::from("/p/late.tex");
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.get_included_tex(None).contains(&late) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(seen.is_ok(), "second event was not handled while a build hung");
        assert!(builder.started.load(Ordering::SeqCst) >= 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("event loop did not stop")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_event_loop_stops_on_cancel() {
        let f = fixture();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = f.manager.spawn_event_loop(rx, cancel.clone());
        tx.send(FileEvent::Changed(PathBuf::from("/p/x.tex"))).unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
