use anyhow::{Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// How serious a reported issue is.
///
/// Errors would break binary patching or ship files nobody can select; the
/// report is then a release-blocking artifact. Warnings are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// A library component is no longer defined by any installer source.
    ComponentMissing,
    FeaturesAdded,
    FeaturesRemoved,
    MissingFeatureList,
    ContentChangedWithoutVersion,
    /// Only the fourth version segment changed, which the installer ignores.
    FourthSegmentOnly,
    VersionLowered,
    VersionRemoved,
    InvalidVersion,
    DateRegression,
    /// The file is assigned to features the installer does not declare.
    UndeclaredFeature,
    ContentConflict,
    MultipleFeatures,
    Unreferenced,
    SuspectFeature,
    UnversionedStaticFile,
    ZeroVersion,
    VcsUnavailable,
    IdenticalToOmitted,
    SimilarToOmitted,
    FileSkipped,
}

impl IssueKind {
    pub fn severity(self) -> Severity {
        match self {
            IssueKind::ComponentMissing
            | IssueKind::FeaturesAdded
            | IssueKind::FeaturesRemoved
            | IssueKind::MissingFeatureList
            | IssueKind::ContentChangedWithoutVersion
            | IssueKind::FourthSegmentOnly
            | IssueKind::VersionLowered
            | IssueKind::VersionRemoved
            | IssueKind::InvalidVersion
            | IssueKind::DateRegression
            | IssueKind::UndeclaredFeature => Severity::Error,
            IssueKind::ContentConflict
            | IssueKind::MultipleFeatures
            | IssueKind::Unreferenced
            | IssueKind::SuspectFeature
            | IssueKind::UnversionedStaticFile
            | IssueKind::ZeroVersion
            | IssueKind::VcsUnavailable
            | IssueKind::IdenticalToOmitted
            | IssueKind::SimilarToOmitted
            | IssueKind::FileSkipped => Severity::Warning,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::ComponentMissing => "component-missing",
            IssueKind::FeaturesAdded => "features-added",
            IssueKind::FeaturesRemoved => "features-removed",
            IssueKind::MissingFeatureList => "missing-feature-list",
            IssueKind::ContentChangedWithoutVersion => "content-changed-without-version",
            IssueKind::FourthSegmentOnly => "fourth-segment-only",
            IssueKind::VersionLowered => "version-lowered",
            IssueKind::VersionRemoved => "version-removed",
            IssueKind::InvalidVersion => "invalid-version",
            IssueKind::DateRegression => "date-regression",
            IssueKind::UndeclaredFeature => "undeclared-feature",
            IssueKind::ContentConflict => "content-conflict",
            IssueKind::MultipleFeatures => "multiple-features",
            IssueKind::Unreferenced => "unreferenced",
            IssueKind::SuspectFeature => "suspect-feature",
            IssueKind::UnversionedStaticFile => "unversioned-static-file",
            IssueKind::ZeroVersion => "zero-version",
            IssueKind::VcsUnavailable => "vcs-unavailable",
            IssueKind::IdenticalToOmitted => "identical-to-omitted",
            IssueKind::SimilarToOmitted => "similar-to-omitted",
            IssueKind::FileSkipped => "file-skipped",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub detail: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {}: {}", self.kind, path, self.detail),
            None => write!(f, "[{}] {}", self.kind, self.detail),
        }
    }
}

/// Everything a run has to tell its operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    pub general: Vec<String>,
    pub issues: Vec<Issue>,
    pub new_files: Vec<String>,
    pub deleted_files: Vec<String>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_general(&mut self, line: impl Into<String>) {
        self.general.push(line.into());
    }

    pub fn add_issue(&mut self, kind: IssueKind, path: Option<&str>, detail: impl Into<String>) {
        let issue = Issue {
            kind,
            severity: kind.severity(),
            path: path.map(str::to_string),
            detail: detail.into(),
        };
        log::debug!("{issue}");
        self.issues.push(issue);
    }

    pub fn add_new_file(&mut self, path: &str) {
        self.new_files.push(path.to_string());
    }

    pub fn add_deleted_file(&mut self, path: &str) {
        self.deleted_files.push(path.to_string());
    }

    pub fn issues_of(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn has_errors(&self) -> bool {
        self.issues_of(Severity::Error).next().is_some()
    }

    /// Renders the report as plain text.
    pub fn render(&self, preamble: &str, include_general: bool) -> String {
        let mut out = String::new();
        if !preamble.is_empty() {
            out.push_str(preamble);
            out.push_str("\n\n");
        }

        push_list(&mut out, "Added files", "No new files.", &self.new_files);
        push_list(&mut out, "Deleted files", "No deleted files.", &self.deleted_files);

        if self.issues.is_empty() {
            out.push_str("No serious issues.\n\n");
        } else {
            for (severity, title) in [(Severity::Error, "Errors"), (Severity::Warning, "Warnings")] {
                let lines: Vec<String> = self.issues_of(severity).map(Issue::to_string).collect();
                if !lines.is_empty() {
                    push_section(&mut out, title, &lines);
                }
            }
        }

        if include_general && !self.general.is_empty() {
            push_section(&mut out, "General Report", &self.general);
        }
        out
    }

    /// Serializes the report for other tools.
    pub fn export(&self, format: &str) -> Result<String> {
        match format {
            "json" => serde_json::to_string_pretty(self).context("Failed to serialize report to JSON"),
            "yaml" => serde_yaml::to_string(self).context("Failed to serialize report to YAML"),
            "toml" => toml::to_string_pretty(self).context("Failed to serialize report to TOML"),
            "text" => Ok(self.render("", true)),
            _ => anyhow::bail!("Unsupported report format: {format}"),
        }
    }
}

#[cfg(test)]
impl Report {
    /// True if the issue list names `path` under `kind`.
    pub fn mentions(&self, kind: IssueKind, path: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.kind == kind && i.path.as_deref() == Some(path))
    }
}

fn push_list(out: &mut String, title: &str, empty: &str, items: &[String]) {
    if items.is_empty() {
        out.push_str(empty);
        out.push_str("\n\n");
    } else {
        let lines: Vec<String> = items.iter().map(|i| format!("    {i}")).collect();
        push_section(out, title, &lines);
    }
}

fn push_section(out: &mut String, title: &str, lines: &[String]) {
    out.push_str(title);
    out.push('\n');
    out.push_str(&"=".repeat(title.chars().count()));
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
}

/// Destination for a finished report.
pub trait ReportSink {
    fn publish(&self, report: &Report, include_general: bool) -> Result<()>;
}

/// Prints a colored summary followed by every issue.
pub struct ConsoleReporter;

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }

    fn format_issue(&self, issue: &Issue) -> String {
        let icon = match issue.severity {
            Severity::Error => "🔴",
            Severity::Warning => "🟡",
        };
        format!("{icon} {issue}")
    }
}

impl ReportSink for ConsoleReporter {
    fn publish(&self, report: &Report, include_general: bool) -> Result<()> {
        println!("📊 Installer File Library Report");
        println!("================================");

        let errors = report.issues_of(Severity::Error).count();
        let warnings = report.issues_of(Severity::Warning).count();

        println!("New files:     {}", report.new_files.len());
        println!("Deleted files: {}", report.deleted_files.len());
        if errors > 0 {
            println!("{}", format!("Errors:        {errors}").red().bold());
        } else {
            println!("{}", "Errors:        0".green());
        }
        if warnings > 0 {
            println!("{}", format!("Warnings:      {warnings}").yellow());
        } else {
            println!("Warnings:      0");
        }

        for path in &report.new_files {
            println!("  + {path}");
        }
        for path in &report.deleted_files {
            println!("  - {path}");
        }

        if report.issues.is_empty() {
            println!("🟢 No serious issues.");
        }
        for issue in &report.issues {
            println!("{}", self.format_issue(issue));
        }

        if include_general {
            for line in &report.general {
                println!("{line}");
            }
        }
        Ok(())
    }
}

/// Writes the report to a file, as text or in one of the export formats.
pub struct FileReporter {
    path: PathBuf,
    preamble: String,
    format: String,
}

impl FileReporter {
    pub fn new(path: PathBuf, preamble: &str) -> Self {
        Self {
            path,
            preamble: preamble.to_string(),
            format: "text".to_string(),
        }
    }

    /// Switches to `json`, `yaml` or `toml` output. The preamble only
    /// appears in text reports.
    pub fn with_format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }
}

impl ReportSink for FileReporter {
    fn publish(&self, report: &Report, include_general: bool) -> Result<()> {
        let content = if self.format == "text" {
            report.render(&self.preamble, include_general)
        } else {
            report.export(&self.format)?
        };
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write report {}", self.path.display()))
    }
}
