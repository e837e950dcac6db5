//
// project/fls.rs
//
// Parsing of TeX recorder (.fls) and .aux files
//

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexSet;
use regex::Regex;

use super::path_resolve::normalize_path;

/// Files read and written during a compilation, as absolute paths
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlsRecords {
    pub inputs: IndexSet<PathBuf>,
    pub outputs: IndexSet<PathBuf>,
}

impl FlsRecords {
    /// Inputs that the build did not also produce
    pub fn external_inputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().filter(|p| !self.outputs.contains(*p))
    }

    /// `.aux` files written by the build
    pub fn aux_outputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.outputs
            .iter()
            .filter(|p| p.extension().is_some_and(|e| e == "aux"))
    }
}

struct FlsPatterns {
    record: Regex,
    bibdata: Regex,
}

fn patterns() -> &'static FlsPatterns {
    static PATTERNS: OnceLock<FlsPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| FlsPatterns {
        // Groups: 1=PWD path, 2=INPUT path, 3=OUTPUT path
        record: Regex::new(r"(?m)^(?:PWD\s*(.*?)|INPUT\s*(.*?)|OUTPUT\s*(.*?))\r?$").unwrap(),
        bibdata: Regex::new(r"(?m)^\\bibdata\{(.*)\}\r?$").unwrap(),
    })
}

/// Parse `.fls` content. Relative records resolve against the `PWD` record
/// when present, otherwise against `root_dir`.
pub fn parse_fls_content(content: &str, root_dir: &Path) -> FlsRecords {
    let mut records = FlsRecords::default();
    let mut base = root_dir.to_path_buf();

    for caps in patterns().record.captures_iter(content) {
        if let Some(pwd) = caps.get(1) {
            let pwd = pwd.as_str().trim();
            if !pwd.is_empty() {
                base = PathBuf::from(pwd);
            }
        } else if let Some(input) = caps.get(2) {
            let input = input.as_str().trim();
            if !input.is_empty() {
                records.inputs.insert(normalize_path(&base.join(input)));
            }
        } else if let Some(output) = caps.get(3) {
            let output = output.as_str().trim();
            if !output.is_empty() {
                records.outputs.insert(normalize_path(&base.join(output)));
            }
        }
    }

    log::trace!(
        "Parsed fls: {} inputs, {} outputs",
        records.inputs.len(),
        records.outputs.len()
    );
    records
}

/// Bibliography names from `\bibdata{a,b}` lines of an `.aux` file
pub fn parse_aux_bibdata(content: &str) -> Vec<String> {
    patterns()
        .bibdata
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
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

/// Map a directory inside the output directory back to the matching source
/// directory, e.g. `/p/build/ch` with out dir `/p/build` and root dir `/p`
/// gives `/p/ch`. Directories outside `out_dir` are returned unchanged.
pub fn source_dir_for(output_dir: &Path, out_dir: &Path, root_dir: &Path) -> PathBuf {
    match output_dir.strip_prefix(out_dir) {
        Ok(rest) => normalize_path(&root_dir.join(rest)),
        Err(_) => output_dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLS: &str = "PWD /p\n\
INPUT /usr/share/texmf-dist/tex/latex/base/article.cls\n\
INPUT main.tex\n\
OUTPUT main.log\n\
INPUT ./chapters/generated.tex\n\
INPUT main.aux\n\
OUTPUT main.aux\n\
OUTPUT main.pdf\n";

    #[test]
    fn test_parse_fls_content() {
        let records = parse_fls_content(FLS, Path::new("/elsewhere"));
        assert!(records.inputs.contains(Path::new("/p/main.tex")));
        assert!(records.inputs.contains(Path::new("/p/chapters/generated.tex")));
        assert!(records.outputs.contains(Path::new("/p/main.pdf")));

        let external: Vec<_> = records.external_inputs().collect();
        assert!(!external.contains(&&PathBuf::from("/p/main.aux")));
        assert_eq!(external.len(), 3);

        let aux: Vec<_> = records.aux_outputs().collect();
        assert_eq!(aux, vec![&PathBuf::from("/p/main.aux")]);
    }

    #[test]
    fn test_parse_fls_without_pwd_uses_root_dir() {
        let records = parse_fls_content("INPUT sub/a.tex\r\nINPUT sub/a.tex\r\n", Path::new("/root"));
        assert_eq!(records.inputs.len(), 1);
        assert!(records.inputs.contains(Path::new("/root/sub/a.tex")));
    }

    #[test]
    fn test_parse_aux_bibdata() {
        let aux = "\\relax\n\\bibstyle{plain}\n\\bibdata{refs, ../shared/more}\n\\citation{x}\n";
        assert_eq!(parse_aux_bibdata(aux), vec!["refs", "../shared/more"]);
        assert!(parse_aux_bibdata("\\relax\n").is_empty());
    }

    #[test]
    fn test_source_dir_for() {
        assert_eq!(
            source_dir_for(Path::new("/p/build/ch"), Path::new("/p/build"), Path::new("/p")),
            PathBuf::from("/p/ch")
        );
        assert_eq!(
            source_dir_for(Path::new("/p"), Path::new("/p"), Path::new("/p")),
            PathBuf::from("/p")
        );
        assert_eq!(
            source_dir_for(Path::new("/other"), Path::new("/p/build"), Path::new("/p")),
            PathBuf::from("/other")
        );
    }
}
