//
// project/elements.rs
//
// Completion-relevant elements extracted from a file
//

use std::path::Path;
use std::sync::OnceLock;

use indexmap::IndexSet;
use regex::Regex;
use serde::Serialize;

/// Labels, macros, environments, bibliography keys and packages defined or
/// used in one file. Each set keeps first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Elements {
    pub labels: IndexSet<String>,
    pub commands: IndexSet<String>,
    pub environments: IndexSet<String>,
    pub bibitems: IndexSet<String>,
    pub packages: IndexSet<String>,
}

impl Elements {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.commands.is_empty()
            && self.environments.is_empty()
            && self.bibitems.is_empty()
            && self.packages.is_empty()
    }
}

/// Produces [`Elements`] from file content. Implementations backed by a real
/// LaTeX parser can replace the regex extractor.
pub trait ElementExtractor: Send + Sync {
    /// `content` has comments and verbatim blocks stripped for TeX files and
    /// is raw for bibliography files.
    fn extract(&self, path: &Path, content: &str) -> Elements;
}

struct ElementPatterns {
    label: Regex,
    command: Regex,
    environment: Regex,
    bibitem: Regex,
    package: Regex,
    bib_entry: Regex,
}

fn patterns() -> &'static ElementPatterns {
    static PATTERNS: OnceLock<ElementPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ElementPatterns {
        label: Regex::new(r"\\label\{([^}]+)\}").unwrap(),
        command: Regex::new(
            r"\\(?:(?:re|provide)?newcommand\*?|DeclareMathOperator\*?|DeclareRobustCommand\*?)\s*\{?\\([a-zA-Z@]+)\}?",
        )
        .unwrap(),
        environment: Regex::new(r"\\(?:begin|newenvironment\*?)\{([^}]+)\}").unwrap(),
        bibitem: Regex::new(r"\\bibitem(?:\[[^\]]*\])?\{([^}]+)\}").unwrap(),
        package: Regex::new(r"\\(?:usepackage|RequirePackage)(?:\[[^\]]*\])?\{([^}]+)\}").unwrap(),
        bib_entry: Regex::new(r"@[a-zA-Z]+\s*[{(]\s*([^,\s]+)\s*,").unwrap(),
    })
}

fn collect(re: &Regex, content: &str, into: &mut IndexSet<String>) {
    for caps in re.captures_iter(content) {
        if let Some(m) = caps.get(1) {
            into.insert(m.as_str().trim().to_string());
        }
    }
}

/// Regex-based extraction covering the common definition commands
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexElementExtractor;

impl ElementExtractor for RegexElementExtractor {
    fn extract(&self, path: &Path, content: &str) -> Elements {
        let patterns = patterns();
        let mut elements = Elements::default();

        if path.extension().is_some_and(|e| e == "bib") {
            collect(&patterns.bib_entry, content, &mut elements.bibitems);
            return elements;
        }

        collect(&patterns.label, content, &mut elements.labels);
        collect(&patterns.command, content, &mut elements.commands);
        collect(&patterns.environment, content, &mut elements.environments);
        collect(&patterns.bibitem, content, &mut elements.bibitems);
        for caps in patterns.package.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                for name in m.as_str().split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    elements.packages.insert(name.to_string());
                }
            }
        }
        elements
    }
}
