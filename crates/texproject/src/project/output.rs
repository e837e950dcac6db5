//
// project/output.rs
//
// Output directory templates and build artifact paths
//

use std::path::{Path, PathBuf};

use super::path_resolve::{normalize_path, parent_dir};

/// Inputs for placeholder expansion
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderContext<'a> {
    /// The document the template is expanded for
    pub doc: &'a Path,
    pub workspace: Option<&'a Path>,
    pub tmp_dir: &'a Path,
}

fn slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Relative path from `base` to `path` for lexically normalized absolute
/// paths. Falls back to `path` when there is no common root.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_components: Vec<_> = path.components().collect();
    let base_components: Vec<_> = base.components().collect();
    let common = path_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return path.to_path_buf();
    }
    let mut rel = PathBuf::new();
    for _ in common..base_components.len() {
        rel.push("..");
    }
    for c in &path_components[common..] {
        rel.push(c.as_os_str());
    }
    rel
}

/// Expand `%DOC%`-style placeholders in `template`.
///
/// | placeholder | value for `/w/ch/intro.tex` in workspace `/w` |
/// |---|---|
/// | `%DOC%` | `/w/ch/intro` |
/// | `%DOC_EXT%` | `/w/ch/intro.tex` |
/// | `%DOCFILE%` | `intro` |
/// | `%DOCFILE_EXT%` | `intro.tex` |
/// | `%DIR%` | `/w/ch` |
/// | `%TMPDIR%` | the temporary directory |
/// | `%WORKSPACE_FOLDER%` | `/w` |
/// | `%RELATIVE_DIR%` | `ch` |
/// | `%RELATIVE_DOC%` | `ch/intro` |
pub fn expand_placeholders(template: &str, ctx: &PlaceholderContext) -> String {
    let doc = normalize_path(ctx.doc);
    let dir = parent_dir(&doc);
    let docfile = doc
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let docfile_ext = doc
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let doc_no_ext = dir.join(&docfile);
    let workspace = ctx.workspace.map(normalize_path).unwrap_or_default();
    let relative_dir = relative_to(&dir, &workspace);
    let relative_doc = relative_to(&doc_no_ext, &workspace);

    // Longer names first so %DOC% does not eat %DOC_EXT%
    template
        .replace("%DOC_EXT%", &slash(&doc))
        .replace("%DOCFILE_EXT%", &docfile_ext)
        .replace("%DOCFILE%", &docfile)
        .replace("%DOC%", &slash(&doc_no_ext))
        .replace("%DIR%", &slash(&dir))
        .replace("%TMPDIR%", &slash(ctx.tmp_dir))
        .replace("%WORKSPACE_FOLDER%", &slash(&workspace))
        .replace("%RELATIVE_DIR%", &slash(&relative_dir))
        .replace("%RELATIVE_DOC%", &slash(&relative_doc))
}

/// Output directory for `doc`, expanded and normalized.
pub fn out_dir(template: &str, ctx: &PlaceholderContext) -> PathBuf {
    let expanded = expand_placeholders(template, ctx);
    let normalized = normalize_path(Path::new(&expanded));
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// PDF produced for `tex`: `dir(tex)/out_dir/<stem>.pdf`. An absolute
/// `out_dir` replaces the source directory.
pub fn tex2pdf(tex: &Path, out_dir: &Path) -> PathBuf {
    artifact_path(tex, out_dir, "pdf")
}

/// `.fls` recorder file written for `tex`
pub fn fls_path(tex: &Path, out_dir: &Path) -> PathBuf {
    artifact_path(tex, out_dir, "fls")
}

fn artifact_path(tex: &Path, out_dir: &Path, extension: &str) -> PathBuf {
    let stem = tex
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    normalize_path(
        &parent_dir(tex)
            .join(out_dir)
            .join(format!("{}.{}", stem, extension)),
    )
}
