use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::model::{FileRecord, FileSet};

/// Characters that may not appear in a wildcard pattern.
const ILLEGAL_PATTERN_CHARS: &[char] = &['/', ':', '<', '>', '|', '"'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("wildcard pattern is empty")]
    Empty,
    #[error("wildcard pattern '{0}' contains an illegal character")]
    IllegalCharacter(String),
    #[error("pattern '{0}' could not be compiled: {1}")]
    Regex(String, String),
}

/// The `PathMatcher` trait is implemented by everything that can decide
/// whether a relative source path belongs to it.
pub trait PathMatcher {
    /// Checks a backslash-separated path relative to the project root.
    ///
    /// # Arguments
    /// * `path`: The path to test.
    ///
    /// # Returns
    /// `true` when the path matches.
    fn matches(&self, path: &str) -> bool;
}

#[derive(Debug, Clone)]
enum PatternKind {
    Substring,
    Wildcard(Regex),
}

/// A compiled path pattern.
///
/// Patterns without `*` or `?` match by substring containment. Patterns with
/// wildcards are translated into an expression anchored to the whole
/// relative path, so `*\obj\*.dll` scopes a match to a folder. When the
/// pattern ends in a three character extension and contains no `?`, any
/// trailing characters after that extension are tolerated, so `*.htm` also
/// matches `index.html`. A `?` or an extension of any other length makes
/// the match exact.
#[derive(Debug, Clone)]
pub struct PathPattern {
    /// The pattern as written in the configuration.
    pub pattern: String,
    /// Whether matching respects case.
    pub case_sensitive: bool,
    kind: PatternKind,
}

impl PathPattern {
    /// Compiles a pattern.
    ///
    /// # Arguments
    /// * `pattern`: The raw pattern text.
    /// * `case_sensitive`: Whether matching should respect case.
    ///
    /// # Returns
    /// The compiled `PathPattern`, or a `PatternError` for an empty wildcard
    /// pattern or one containing `/` or another character illegal in paths.
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self, PatternError> {
        let kind = if pattern.contains(['*', '?']) {
            PatternKind::Wildcard(wildcard_regex(pattern, case_sensitive)?)
        } else {
            PatternKind::Substring
        };

        Ok(Self {
            pattern: pattern.to_string(),
            case_sensitive,
            kind,
        })
    }
}

impl PathMatcher for PathPattern {
    fn matches(&self, path: &str) -> bool {
        match &self.kind {
            PatternKind::Wildcard(re) => re.is_match(path),
            PatternKind::Substring if self.case_sensitive => path.contains(&self.pattern),
            PatternKind::Substring => path
                .to_lowercase()
                .contains(&self.pattern.to_lowercase()),
        }
    }
}

/// Builds the anchored regex for a wildcard pattern.
fn wildcard_regex(pattern: &str, case_sensitive: bool) -> Result<Regex, PatternError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(PatternError::Empty);
    }
    if trimmed.contains(ILLEGAL_PATTERN_CHARS) {
        return Err(PatternError::IllegalCharacter(trimmed.to_string()));
    }

    let extension = trailing_extension(trimmed);

    let match_exact = trimmed.contains('?')
        || extension.as_ref().is_some_and(|ext| ext.len() != 3);

    let mut expr = String::from("^");
    expr.push_str(
        &regex::escape(trimmed)
            .replace(r"\*", ".*")
            .replace(r"\?", "."),
    );
    if !match_exact && extension.is_some() {
        expr.push_str("[^.]*");
    }
    expr.push('$');

    RegexBuilder::new(&expr)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| PatternError::Regex(pattern.to_string(), e.to_string()))
}

/// The text after the last dot, when there is something on both sides of it.
fn trailing_extension(pattern: &str) -> Option<&str> {
    let (stem, ext) = pattern.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// A group of "path contains" and "path ends with" predicates.
///
/// Matching is case-sensitive, mirroring how heuristic tables are written
/// against the exact casing of the source tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeuristicSet {
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub ends: Vec<String>,
}

impl HeuristicSet {
    pub fn is_empty(&self) -> bool {
        self.contains.is_empty() && self.ends.is_empty()
    }

    /// Substitutes `{0}` in every rule with `code`.
    pub fn templated(&self, code: &str) -> HeuristicSet {
        HeuristicSet {
            contains: self.contains.iter().map(|r| r.replace("{0}", code)).collect(),
            ends: self.ends.iter().map(|r| r.replace("{0}", code)).collect(),
        }
    }
}

impl PathMatcher for HeuristicSet {
    fn matches(&self, path: &str) -> bool {
        self.contains.iter().any(|rule| path.contains(rule.as_str()))
            || self.ends.iter().any(|rule| path.ends_with(rule.as_str()))
    }
}

/// Inclusion and exclusion rules for one classification category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHeuristics {
    #[serde(default)]
    pub include: HeuristicSet,
    #[serde(default)]
    pub exclude: HeuristicSet,
}

impl FileHeuristics {
    /// A path is included when it matches an inclusion rule and no exclusion
    /// rule. Exclusions are tested first.
    pub fn is_included(&self, path: &str) -> bool {
        if self.exclude.matches(path) {
            return false;
        }
        self.include.matches(path)
    }

    /// Instantiates language-templated rules for one language folder code.
    pub fn for_language(&self, code: &str) -> FileHeuristics {
        FileHeuristics {
            include: self.include.templated(code),
            exclude: self.exclude.templated(code),
        }
    }
}

impl PathMatcher for FileHeuristics {
    fn matches(&self, path: &str) -> bool {
        self.is_included(path)
    }
}

/// A compiled omission rule.
#[derive(Debug, Clone)]
pub struct Omission {
    pub pattern: PathPattern,
    pub reason: String,
}

/// Junk-removal filter applied to harvested file sets.
#[derive(Debug, Clone, Default)]
pub struct OmissionFilter {
    omissions: Vec<Omission>,
}

impl OmissionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule. An empty reason falls back to naming the pattern.
    pub fn add(
        &mut self,
        pattern: &str,
        reason: Option<&str>,
        case_sensitive: bool,
    ) -> Result<(), PatternError> {
        let reason = match reason {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => format!("omission pattern \"{pattern}\""),
        };
        self.omissions.push(Omission {
            pattern: PathPattern::new(pattern, case_sensitive)?,
            reason,
        });
        Ok(())
    }

    /// Reason of the first rule matching `path`.
    pub fn reason_for(&self, path: &str) -> Option<&str> {
        self.omissions
            .iter()
            .find(|o| o.pattern.matches(path))
            .map(|o| o.reason.as_str())
    }

    /// Removes omitted files from `files` and returns them with their
    /// removal reason filled in.
    pub fn apply(&self, files: &mut FileSet) -> Vec<FileRecord> {
        let omitted: Vec<String> = files
            .iter()
            .filter(|(_, rec)| self.reason_for(&rec.relative_source_path).is_some())
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::with_capacity(omitted.len());
        for key in omitted {
            if let Some(mut rec) = files.remove(&key) {
                if let Some(reason) = self.reason_for(&rec.relative_source_path) {
                    rec.reason_for_removal = reason.to_string();
                }
                log::debug!("Omitting {}: {}", rec.relative_source_path, rec.reason_for_removal);
                removed.push(rec);
            }
        }
        removed
    }
}
