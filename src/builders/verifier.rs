use anyhow::Result;
use chrono::{DateTime, Duration};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

use crate::builders::emission::InstallerDefinitions;
use crate::builders::patterns::{OmissionFilter, PathMatcher, PathPattern};
use crate::builders::reporter::{IssueKind, Report};
use crate::builders::storage::{LibraryDocument, LibraryEntry};
use crate::core::config::{InstallerConfig, compile_path_list};
use crate::core::git::GitClient;
use crate::core::model::{FileRecord, FileSet, SourceRoots, library_key, make_id, normalize_relative, relative_to, to_fs_path};
use crate::core::version::{is_zero_version, parse_version, significant_part};

/// Tolerance for timestamps that moved backwards, e.g. across time zones.
const DATE_TOLERANCE_HOURS: i64 = 24;

/// Cross-checks the ledger against the current run.
///
/// Nothing here fixes anything. Every finding lands in the report, and
/// patch-breaking findings are errors.
pub struct IntegrityVerifier<'a> {
    config: &'a InstallerConfig,
    project_root: &'a Path,
    roots: SourceRoots,
    zero_allowed: Vec<PathPattern>,
    non_versioned: Vec<PathPattern>,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(config: &'a InstallerConfig, project_root: &'a Path) -> Result<Self> {
        Ok(Self {
            config,
            project_root,
            roots: config.source_roots(),
            zero_allowed: compile_path_list(&config.integrity.version_zero_allowed, "zero-version allowance")?,
            non_versioned: compile_path_list(&config.integrity.non_versioned_static, "non-versioned static file")?,
        })
    }

    /// Runs every check.
    ///
    /// `git` is `None` when no repository could be opened; the untracked
    /// file check is then replaced by a warning.
    pub fn verify(
        &self,
        library: &LibraryDocument,
        files: &FileSet,
        definitions: &InstallerDefinitions,
        omissions: &OmissionFilter,
        git: Option<&dyn GitClient>,
        report: &mut Report,
    ) {
        for entry in &library.files {
            self.check_entry(entry, find_current(files, &entry.path), definitions, report);
        }
        self.check_current_versions(files, report);
        self.check_untracked_static(git, omissions, report);
    }

    /// Compares one ledger entry with its component definition and its
    /// current record, if the file is still harvested.
    pub fn check_entry(
        &self,
        entry: &LibraryEntry,
        current: Option<&FileRecord>,
        definitions: &InstallerDefinitions,
        report: &mut Report,
    ) {
        let path = Some(entry.path.as_str());

        if entry.feature_list.is_empty() {
            report.add_issue(
                IssueKind::MissingFeatureList,
                path,
                "the library records no features for this file",
            );
        }

        match definitions.find_by_guid(&entry.component_guid) {
            None => {
                report.add_issue(
                    IssueKind::ComponentMissing,
                    path,
                    format!(
                        "component {} ({}) is not defined by any installer source. Add:\n{}",
                        entry.component_id,
                        entry.component_guid,
                        removal_snippet(entry, definitions)
                    ),
                );
            }
            Some(component) if !entry.feature_list.is_empty() => {
                let recorded: BTreeSet<String> = entry.feature_list.iter().cloned().collect();
                let now = definitions.features_of(&component.id);
                let added: Vec<&String> = now.difference(&recorded).collect();
                let removed: Vec<&String> = recorded.difference(&now).collect();
                if !added.is_empty() {
                    report.add_issue(
                        IssueKind::FeaturesAdded,
                        path,
                        format!("now also referenced by {}", join(&added)),
                    );
                }
                if !removed.is_empty() {
                    report.add_issue(
                        IssueKind::FeaturesRemoved,
                        path,
                        format!("no longer referenced by {}", join(&removed)),
                    );
                }
            }
            Some(_) => {}
        }

        if let Some(current) = current {
            self.check_date(entry, current, report);
            self.check_version(entry, current, report);
        }
    }

    fn check_date(&self, entry: &LibraryEntry, current: &FileRecord, report: &mut Report) {
        let (Ok(recorded), Ok(now)) = (
            DateTime::parse_from_rfc3339(&entry.date),
            DateTime::parse_from_rfc3339(&current.last_write),
        ) else {
            return;
        };
        if now < recorded - Duration::hours(DATE_TOLERANCE_HOURS) {
            report.add_issue(
                IssueKind::DateRegression,
                Some(entry.path.as_str()),
                format!("file date {} is earlier than recorded {}", current.last_write, entry.date),
            );
        }
    }

    fn check_version(&self, entry: &LibraryEntry, current: &FileRecord, report: &mut Report) {
        let path = Some(entry.path.as_str());
        let recorded = entry.version.trim();
        let now = current.file_version.trim();

        if recorded.is_empty() {
            return;
        }
        if now.is_empty() {
            report.add_issue(
                IssueKind::VersionRemoved,
                path,
                format!("recorded version {recorded} is gone"),
            );
            return;
        }

        let recorded_packed = match parse_version(recorded) {
            Ok(v) => v,
            Err(e) => {
                report.add_issue(IssueKind::InvalidVersion, path, format!("recorded version: {e}"));
                return;
            }
        };
        // An unparsable current version is reported with the current files.
        let Ok(now_packed) = parse_version(now) else {
            return;
        };

        if now_packed < recorded_packed {
            report.add_issue(
                IssueKind::VersionLowered,
                path,
                format!("version went from {recorded} to {now}"),
            );
            return;
        }

        let content_changed = !entry.hash.is_empty()
            && !current.content_hash.is_empty()
            && !entry.hash.eq_ignore_ascii_case(&current.content_hash);
        if !content_changed {
            return;
        }
        if now_packed == recorded_packed {
            report.add_issue(
                IssueKind::ContentChangedWithoutVersion,
                path,
                format!("content changed but version is still {now}"),
            );
        } else if significant_part(now_packed) == significant_part(recorded_packed) {
            report.add_issue(
                IssueKind::FourthSegmentOnly,
                path,
                format!("version went from {recorded} to {now}; the installer ignores the fourth segment"),
            );
        }
    }

    /// Version checks that need no history: unparsable and zero versions.
    fn check_current_versions(&self, files: &FileSet, report: &mut Report) {
        for record in files.values().filter(|r| r.is_emittable()) {
            let version = record.file_version.trim();
            if version.is_empty() {
                continue;
            }
            let path = Some(record.relative_source_path.as_str());
            if let Err(e) = parse_version(version) {
                report.add_issue(IssueKind::InvalidVersion, path, e.to_string());
            } else if is_zero_version(version)
                && !self.zero_allowed.iter().any(|p| p.matches(&record.relative_source_path))
            {
                report.add_issue(IssueKind::ZeroVersion, path, "version is 0.0.0.0");
            }
        }
    }

    /// Files in the static tree that version control does not know about
    /// would not be present on a clean build machine.
    pub fn check_untracked_static(
        &self,
        git: Option<&dyn GitClient>,
        omissions: &OmissionFilter,
        report: &mut Report,
    ) {
        let Some(git) = git else {
            report.add_issue(
                IssueKind::VcsUnavailable,
                None,
                "no repository found; untracked static files were not checked",
            );
            return;
        };

        let static_root = to_fs_path(self.project_root, &self.roots.static_files);
        let untracked = match git.get_untracked_files(&static_root) {
            Ok(paths) => paths,
            Err(e) => {
                report.add_issue(IssueKind::VcsUnavailable, None, format!("{e:#}"));
                return;
            }
        };

        let root = self
            .project_root
            .canonicalize()
            .unwrap_or_else(|_| self.project_root.to_path_buf());
        for path in untracked {
            let canonical = path.canonicalize().unwrap_or(path);
            let Some(relative) = relative_to(&root, &canonical) else {
                continue;
            };
            if self.non_versioned.iter().any(|p| p.matches(&relative))
                || omissions.reason_for(&relative).is_some()
            {
                continue;
            }
            report.add_issue(
                IssueKind::UnversionedStaticFile,
                Some(relative.as_str()),
                "not under version control",
            );
        }
    }

    /// Reports emitted files that look like copies of omitted ones.
    pub fn check_similar_files(&self, files: &FileSet, omitted: &[FileRecord], report: &mut Report) {
        for record in files.values().filter(|r| r.is_emittable()) {
            for other in omitted.iter().filter(|o| o.name_matches(record)) {
                if self.is_suppressed(&record.relative_source_path, &other.relative_source_path) {
                    continue;
                }
                let detail = format!("omitted {} ({})", other.relative_source_path, other.reason_for_removal);
                if !record.content_hash.is_empty() && record.content_hash == other.content_hash {
                    report.add_issue(
                        IssueKind::IdenticalToOmitted,
                        Some(record.relative_source_path.as_str()),
                        format!("identical to {detail}"),
                    );
                } else if record.size == other.size {
                    report.add_issue(
                        IssueKind::SimilarToOmitted,
                        Some(record.relative_source_path.as_str()),
                        format!("same size as {detail}"),
                    );
                }
            }
        }
    }

    fn is_suppressed(&self, a: &str, b: &str) -> bool {
        let same = |x: &str, y: &str| normalize_relative(x).eq_ignore_ascii_case(y);
        self.config.similar_files.iter().any(|pair| {
            pair.suppress_warning
                && ((same(&pair.path1, a) && same(&pair.path2, b))
                    || (same(&pair.path1, b) && same(&pair.path2, a)))
        })
    }
}

fn find_current<'f>(files: &'f FileSet, path: &str) -> Option<&'f FileRecord> {
    files
        .get(path)
        .or_else(|| {
            let key = library_key(path);
            files.values().find(|r| library_key(&r.library_path) == key)
        })
}

fn join(items: &[&String]) -> String {
    items.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

/// Installer source that retires a vanished component without breaking
/// patches: the component stays, transitive and never installed, and a
/// companion component deletes the stale file.
fn removal_snippet(entry: &LibraryEntry, definitions: &InstallerDefinitions) -> String {
    let mut snippet = String::new();
    let mut components = vec![entry.component_id.clone()];

    if entry.directory_id.is_empty() {
        let _ = writeln!(
            snippet,
            "<!-- Warning: no directory id recorded for {}; fill in the DirectoryRef. -->",
            entry.path
        );
    }
    let _ = writeln!(snippet, "<DirectoryRef Id=\"{}\">", entry.directory_id);
    let _ = writeln!(
        snippet,
        "  <Component Id=\"{}\" Guid=\"{}\" Transitive=\"yes\">",
        entry.component_id, entry.component_guid
    );
    let _ = writeln!(snippet, "    <Condition>FALSE</Condition>");
    let _ = writeln!(snippet, "  </Component>");

    if definitions
        .sourced_elsewhere(&entry.directory_id, &entry.name)
        .is_none()
    {
        let delete_id = make_id(&format!("Del{}", entry.name), &entry.component_id);
        let _ = writeln!(
            snippet,
            "  <Component Id=\"{delete_id}\" Guid=\"{}\">",
            Uuid::new_v4().to_string().to_uppercase()
        );
        let _ = writeln!(
            snippet,
            "    <RemoveFile Id=\"{delete_id}\" Name=\"{}\" On=\"install\" />",
            entry.name
        );
        let _ = writeln!(snippet, "  </Component>");
        components.push(delete_id);
    }
    let _ = writeln!(snippet, "</DirectoryRef>");

    for feature in &entry.feature_list {
        let _ = writeln!(snippet, "<FeatureRef Id=\"{feature}\">");
        for id in &components {
            let _ = writeln!(snippet, "  <ComponentRef Id=\"{id}\" />");
        }
        let _ = writeln!(snippet, "</FeatureRef>");
    }
    snippet
}
