//! Line counter backed by `cloc`.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;

use crate::model::LineStats;

use super::{CountError, LineCounter, run_stdout};

/// Search-language tags and the names `cloc` reports them under.
const LANGUAGES: &[(&str, &str)] = &[
    ("python", "Python"),
    ("javascript", "JavaScript"),
    ("typescript", "TypeScript"),
    ("java", "Java"),
    ("c", "C"),
    ("c++", "C++"),
    ("cpp", "C++"),
    ("c#", "C#"),
    ("csharp", "C#"),
    ("go", "Go"),
    ("rust", "Rust"),
    ("ruby", "Ruby"),
    ("php", "PHP"),
    ("kotlin", "Kotlin"),
    ("swift", "Swift"),
    ("scala", "Scala"),
    ("shell", "Bourne Shell"),
];

/// Map a search-language tag to the counter's language name.
///
/// Matching ignores case and surrounding whitespace.
pub fn counter_language(tag: &str) -> Option<&'static str> {
    let tag = tag.trim();
    LANGUAGES
        .iter()
        .find(|(t, _)| t.eq_ignore_ascii_case(tag))
        .map(|&(_, name)| name)
}

/// Per-language entry in `cloc --json` output.
#[derive(Debug, Deserialize)]
struct ClocEntry {
    code: u64,
    comment: u64,
    blank: u64,
}

pub struct ClocCounter {
    program: String,
}

impl ClocCounter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ClocCounter {
    fn default() -> Self {
        Self::new("cloc")
    }
}

impl LineCounter for ClocCounter {
    fn count(&self, path: &Path, language: &str) -> Result<Option<LineStats>, CountError> {
        let stdout = run_stdout(
            Command::new(&self.program)
                .arg("--json")
                .arg("--quiet")
                .arg(format!("--include-lang={language}"))
                .arg(path),
        )?;
        Ok(parse_report(&stdout, language)?)
    }
}

/// Extract one language's counts from a `cloc --json` report.
///
/// `cloc` prints nothing at all when no file matched, which is `None`,
/// as is a report without an entry for `language`.
fn parse_report(stdout: &str, language: &str) -> Result<Option<LineStats>, serde_json::Error> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let report: serde_json::Map<String, Value> = serde_json::from_str(stdout)?;
    let Some(entry) = report.get(language) else {
        return Ok(None);
    };
    let entry = ClocEntry::deserialize(entry)?;
    Ok(Some(LineStats {
        code: entry.code,
        comment: entry.comment,
        blank: entry.blank,
    }))
}
