// cli/project_report.rs - `texproject report` and `texproject watch`
//
// Resolves the root of a workspace, parses its dependency tree and prints
// what was found. `watch` keeps running, reacting to file changes until
// interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{parse_project_config, ProjectConfig, StaticConfig};
use crate::document_store::DocumentStore;
use crate::fs::LocalFs;
use crate::process::{ProcessSpawner, TokioProcessSpawner};
use crate::project::events::{BuildTrigger, ProjectEvent, ProjectListener};
use crate::project::manager::{Collaborators, Manager};
use crate::project::path_resolve::{normalize_path, parent_dir};
use crate::project::watcher::NotifyBackend;

/// Parsed arguments shared by `report` and `watch`.
#[derive(Debug, Default)]
pub struct ReportArgs {
    pub workspace: PathBuf,
    /// File treated as the focused editor document
    pub active: Option<PathBuf>,
    /// JSON settings file
    pub config: Option<PathBuf>,
    pub json: bool,
    /// Command run on auto-build, followed by the root path
    pub build: Option<Vec<String>>,
}

/// Parse arguments after the subcommand name.
///
/// Expected usage: `<workspace> [--active FILE] [--config FILE] [--json] [--build CMD...]`
pub fn parse_args(args: &mut impl Iterator<Item = String>) -> Result<ReportArgs, String> {
    let mut workspace: Option<PathBuf> = None;
    let mut parsed = ReportArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => parsed.json = true,
            "--active" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--active requires a file".to_string())?;
                parsed.active = Some(PathBuf::from(path));
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--config requires a file".to_string())?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--build" => {
                let command: Vec<String> = args.by_ref().collect();
                if command.is_empty() {
                    return Err("--build requires a command".to_string());
                }
                parsed.build = Some(command);
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown flag: '{}'", other));
            }
            _ => {
                if workspace.is_some() {
                    return Err("Multiple workspaces provided; expected exactly one".to_string());
                }
                workspace = Some(PathBuf::from(arg));
            }
        }
    }

    let workspace = workspace.ok_or_else(|| "Missing required <workspace> argument".to_string())?;
    if !workspace.is_dir() {
        return Err(format!("Workspace is not a directory: {}", workspace.display()));
    }
    parsed.workspace = workspace;
    Ok(parsed)
}

/// Everything the engine knows about a project after root discovery
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReport {
    pub root: Option<PathBuf>,
    pub local_root: Option<PathBuf>,
    pub language_id: Option<String>,
    pub out_dir: PathBuf,
    pub pdf: Option<PathBuf>,
    pub tex_files: Vec<PathBuf>,
    pub bib_files: Vec<PathBuf>,
    pub watched_files: Vec<PathBuf>,
    pub labels: usize,
    pub bib_items: usize,
    pub duration_ms: f64,
}

/// Load settings from a JSON file, or defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<ProjectConfig> {
    let Some(path) = path else {
        return Ok(ProjectConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let settings: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(parse_project_config(&settings).unwrap_or_else(|| {
        log::warn!("No 'latex' section in {}; using defaults", path.display());
        ProjectConfig::default()
    }))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(normalize_path(&cwd.join(path)))
}

/// Focus `active` in the store with its disk content
fn open_active(store: &DocumentStore, active: &Path) -> Result<()> {
    let text = std::fs::read_to_string(active)
        .with_context(|| format!("Failed to read {}", active.display()))?;
    store.open(active, &text);
    if !store.set_active(Some(active)) {
        return Err(anyhow!("Cannot focus {}", active.display()));
    }
    Ok(())
}

/// Collect the report for the manager's current state
pub fn collect_report(manager: &Manager, started: Instant) -> ProjectReport {
    let root = manager.root_file();
    let tex_files = manager.get_included_tex(None);
    let bib_files = manager.get_included_bib(None);
    let (labels, bib_items) = tex_files
        .iter()
        .chain(&bib_files)
        .filter_map(|f| manager.get_cached_content(f))
        .fold((0, 0), |(labels, items), entry| {
            (
                labels + entry.elements.value.labels.len(),
                items + entry.elements.value.bibitems.len(),
            )
        });

    ProjectReport {
        pdf: root.as_deref().map(|r| manager.tex2pdf(r, true)),
        out_dir: manager.get_out_dir(None),
        local_root: manager.local_root_file(),
        language_id: manager.root_file_language_id(),
        root,
        tex_files,
        bib_files,
        watched_files: manager.watched_files(),
        labels,
        bib_items,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Print a report in human-readable format.
pub fn print_report(report: &ProjectReport) {
    println!("=== texproject ===\n");
    match &report.root {
        Some(root) => println!("  {:<12} {}", "root", root.display()),
        None => println!("  {:<12} (none found)", "root"),
    }
    if let Some(local) = &report.local_root {
        println!("  {:<12} {}", "subfile", local.display());
    }
    if let Some(pdf) = &report.pdf {
        println!("  {:<12} {}", "pdf", pdf.display());
    }
    println!("\n  tex files ({}):", report.tex_files.len());
    for file in &report.tex_files {
        println!("    {}", file.display());
    }
    println!("\n  bib files ({}):", report.bib_files.len());
    for file in &report.bib_files {
        println!("    {}", file.display());
    }
    println!(
        "\n  {} labels, {} bib items, {} watched files, {:.2} ms",
        report.labels,
        report.bib_items,
        report.watched_files.len(),
        report.duration_ms
    );
    println!();
}

fn emit(report: &ProjectReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_report(report);
    }
    Ok(())
}

/// Runs the build command without a shell and reports finished roots
struct CommandBuild {
    command: Vec<String>,
    finished: mpsc::UnboundedSender<PathBuf>,
}

#[async_trait]
impl BuildTrigger for CommandBuild {
    async fn build(&self, root: &Path, language_id: &str) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(anyhow!("Empty build command"));
        };
        let mut args = args.to_vec();
        args.push(root.to_string_lossy().into_owned());
        log::info!("Building {} ({}) with {}", root.display(), language_id, program);

        let spawner = TokioProcessSpawner::new()
            .with_timeout(Duration::from_secs(600))
            .with_working_dir(parent_dir(root));
        spawner.run(program, &args).await?;
        self.finished
            .send(root.to_path_buf())
            .map_err(|_| anyhow!("Build listener is gone"))?;
        Ok(())
    }
}

/// Prints events as they happen
struct EventPrinter;

#[async_trait]
impl ProjectListener for EventPrinter {
    async fn on_event(&self, event: &ProjectEvent) {
        match event {
            ProjectEvent::RootChanged(root) => println!("root changed: {}", root.display()),
            ProjectEvent::BuildFinished(root) => println!("build finished: {}", root.display()),
            ProjectEvent::CompletionUpdated(root) => {
                log::debug!("Completion updated for {}", root.display())
            }
        }
    }
}

/// `texproject report`
pub async fn run_report(args: &ReportArgs) -> Result<()> {
    let started = Instant::now();
    let config = load_config(args.config.as_deref())?;
    let store = Arc::new(DocumentStore::new());
    if let Some(active) = &args.active {
        open_active(&store, &absolute(active)?)?;
    }
    let collaborators = Collaborators::new(
        Arc::new(LocalFs::new()),
        store,
        Arc::new(StaticConfig::new(config)),
    );
    let manager = Manager::new(Some(absolute(&args.workspace)?), collaborators);

    manager.find_root().await;
    emit(&collect_report(&manager, started), args.json)
}

/// `texproject watch`
pub async fn run_watch(args: &ReportArgs) -> Result<()> {
    let started = Instant::now();
    let config = load_config(args.config.as_deref())?;
    let store = Arc::new(DocumentStore::new());
    if let Some(active) = &args.active {
        open_active(&store, &absolute(active)?)?;
    }

    let (backend, events) = NotifyBackend::new()?;
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let mut collaborators = Collaborators::new(
        Arc::new(LocalFs::new()),
        store,
        Arc::new(StaticConfig::new(config)),
    )
    .with_watch_backend(Arc::new(backend));
    if let Some(command) = &args.build {
        collaborators = collaborators.with_builder(Arc::new(CommandBuild {
            command: command.clone(),
            finished: finished_tx,
        }));
    }

    let manager = Arc::new(Manager::new(Some(absolute(&args.workspace)?), collaborators));
    manager.subscribe(Arc::new(EventPrinter));
    manager.find_root().await;
    emit(&collect_report(&manager, started), args.json)?;

    let cancel = CancellationToken::new();
    let event_loop = manager.spawn_event_loop(events, cancel.clone());
    println!("Watching {} files; press Ctrl-C to stop", manager.watched_files().len());

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            Some(root) = finished_rx.recv() => manager.on_build_finished(&root).await,
        }
    }

    cancel.cancel();
    event_loop.await?;
    Ok(())
}
