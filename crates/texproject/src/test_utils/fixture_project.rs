//! Deterministic LaTeX project generator for benchmarks and tests.
//!
//! Generates a root document with `\input` chapter chains, labels,
//! bibliographies and filler text. No randomness, so benchmarks are
//! reproducible.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Shape of a generated project.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    /// Files included directly from `main.tex`
    pub chapter_count: usize,
    /// Each chapter includes a chain of this many section files
    pub include_chain_depth: usize,
    pub labels_per_file: usize,
    pub bib_count: usize,
    pub extra_lines_per_file: usize,
}

impl FixtureConfig {
    /// 4 chapters, chains of 2, one bibliography.
    pub fn small() -> Self {
        Self {
            chapter_count: 4,
            include_chain_depth: 2,
            labels_per_file: 3,
            bib_count: 1,
            extra_lines_per_file: 10,
        }
    }

    /// 20 chapters, chains of 5, three bibliographies.
    pub fn medium() -> Self {
        Self {
            chapter_count: 20,
            include_chain_depth: 5,
            labels_per_file: 10,
            bib_count: 3,
            extra_lines_per_file: 50,
        }
    }

    /// 50 chapters, chains of 10, five bibliographies.
    pub fn large() -> Self {
        Self {
            chapter_count: 50,
            include_chain_depth: 10,
            labels_per_file: 20,
            bib_count: 5,
            extra_lines_per_file: 200,
        }
    }

    /// Number of `.tex` files the config produces, `main.tex` included
    pub fn tex_file_count(&self) -> usize {
        1 + self.chapter_count * (1 + self.include_chain_depth)
    }
}

fn section_name(chapter: usize, depth: usize) -> String {
    format!("sec_{}_{}", chapter, depth)
}

fn write_body(content: &mut String, prefix: &str, config: &FixtureConfig) {
    for i in 0..config.labels_per_file {
        let _ = writeln!(content, "\\section{{Part {}}}\\label{{{}:{}}}", i, prefix, i);
    }
    for i in 0..config.extra_lines_per_file {
        let _ = writeln!(
            content,
            "Line {} of {} cites \\cite{{key{}}} and costs 5\\% more. % note {}",
            i, prefix, i, i
        );
    }
}

fn main_content(config: &FixtureConfig) -> String {
    let mut content = String::new();
    content.push_str("\\documentclass{article}\n\\begin{document}\n");
    for chapter in 0..config.chapter_count {
        let _ = writeln!(content, "\\input{{chapters/ch{}}}", chapter);
    }
    write_body(&mut content, "main", config);
    if config.bib_count > 0 {
        let names: Vec<String> = (0..config.bib_count).map(|i| format!("refs{}", i)).collect();
        let _ = writeln!(content, "\\bibliography{{{}}}", names.join(","));
    }
    content.push_str("\\end{document}\n");
    content
}

fn chapter_content(chapter: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    if config.include_chain_depth > 0 {
        let _ = writeln!(content, "\\input{{sections/{}}}", section_name(chapter, 0));
    }
    write_body(&mut content, &format!("ch{}", chapter), config);
    content
}

fn section_content(chapter: usize, depth: usize, config: &FixtureConfig) -> String {
    let mut content = String::new();
    if depth + 1 < config.include_chain_depth {
        // Sections include their successor relative to the root directory
        let _ = writeln!(content, "\\input{{sections/{}}}", section_name(chapter, depth + 1));
    }
    write_body(&mut content, &section_name(chapter, depth), config);
    content
}

fn bib_content(index: usize) -> String {
    let mut content = String::new();
    for i in 0..5 {
        let _ = writeln!(
            content,
            "@article{{key{}_{},\n  title = {{Title {}}},\n}}\n",
            index, i, i
        );
    }
    content
}

/// Write a generated project into `dir`. Returns the path of `main.tex`.
pub fn write_fixture_project(dir: &Path, config: &FixtureConfig) -> Result<PathBuf> {
    let write = |rel: &str, content: String| -> Result<()> {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write fixture file {}", path.display()))
    };

    write("main.tex", main_content(config))?;
    for chapter in 0..config.chapter_count {
        write(&format!("chapters/ch{}.tex", chapter), chapter_content(chapter, config))?;
        for depth in 0..config.include_chain_depth {
            write(
                &format!("sections/{}.tex", section_name(chapter, depth)),
                section_content(chapter, depth, config),
            )?;
        }
    }
    for i in 0..config.bib_count {
        write(&format!("refs{}.bib", i), bib_content(i))?;
    }
    Ok(dir.join("main.tex"))
}

/// Temporary on-disk project. Removed when dropped.
pub struct TestProject {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        // Canonical so paths compare equal to what the file system reports
        let root = temp_dir.path().canonicalize()?;
        log::trace!("Created test project at: {}", root.display());
        Ok(Self {
            _temp_dir: temp_dir,
            root,
        })
    }

    /// Project generated from `config`
    pub fn generated(config: &FixtureConfig) -> Result<Self> {
        let project = Self::new()?;
        write_fixture_project(&project.root, config)?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel` inside the project
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write `rel`, creating parent directories. Returns the absolute path.
    pub fn add_file(&self, rel: &str, content: &str) -> Result<PathBuf> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn remove_file(&self, rel: &str) -> Result<()> {
        std::fs::remove_file(self.path(rel))?;
        Ok(())
    }
}
