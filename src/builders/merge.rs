use std::collections::{BTreeSet, HashMap};

use crate::builders::reporter::{IssueKind, Report};
use crate::core::model::{FileRecord, FileSet};

/// Result of merging two harvested file sets.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub merged: FileSet,
    pub rejected: FileSet,
}

/// Which of two same-named files should be shipped.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    KeepCandidate,
    KeepOther,
}

/// Duplicate arbitration between two same-named files with equal content.
///
/// The occurrence with the longer target path is closer to its final
/// install location and wins. Equal lengths keep the candidate, so the
/// outcome of an exact tie depends on which set was passed as preferred.
fn arbitrate(candidate: &FileRecord, other: &FileRecord) -> Verdict {
    if candidate.target_path == other.target_path
        || candidate.target_path.len() >= other.target_path.len()
    {
        Verdict::KeepCandidate
    } else {
        Verdict::KeepOther
    }
}

/// Merges `other` into `preferred`, shipping each true duplicate only once.
///
/// For every file in `preferred`, files in `other` with the same name
/// (ignoring case) are compared. Records with the same identity are not
/// conflicts. Different content is only a hazard when both would install to
/// the same target path: that is reported, and one of them is still dropped.
/// Equal content is arbitrated by target path and the winner's comment
/// names the file it was preferred over.
pub fn merge_file_sets(mut preferred: FileSet, mut other: FileSet, report: &mut Report) -> MergeOutcome {
    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    for (key, rec) in &other {
        by_name.entry(rec.name.to_lowercase()).or_default().push(key.clone());
    }

    let mut rejected_keys: BTreeSet<String> = BTreeSet::new();
    let candidate_keys: Vec<String> = preferred.keys().cloned().collect();

    'candidates: for candidate_key in candidate_keys {
        let Some(name) = preferred.get(&candidate_key).map(|c| c.name.to_lowercase()) else {
            continue;
        };
        let Some(matches) = by_name.get(&name) else {
            continue;
        };

        for other_key in matches {
            let (Some(candidate), Some(file)) =
                (preferred.get_mut(&candidate_key), other.get_mut(other_key))
            else {
                continue;
            };

            if candidate == file {
                continue;
            }

            if candidate.content_hash != file.content_hash {
                if !candidate.target_path.eq_ignore_ascii_case(&file.target_path) {
                    continue;
                }
                report.add_issue(
                    IssueKind::ContentConflict,
                    Some(candidate.relative_source_path.as_str()),
                    format!(
                        "{} and {} install to the same place but differ in content. Only one will be shipped.",
                        candidate.relative_source_path, file.relative_source_path
                    ),
                );
            }

            match arbitrate(candidate, file) {
                Verdict::KeepCandidate => {
                    candidate.append_comment(&format!(
                        "(preferred over {})",
                        file.relative_source_path
                    ));
                    rejected_keys.insert(other_key.clone());
                }
                Verdict::KeepOther => {
                    file.append_comment(&format!(
                        "(preferred over {})",
                        candidate.relative_source_path
                    ));
                    rejected_keys.insert(candidate_key.clone());
                    continue 'candidates;
                }
            }
        }
    }

    let mut outcome = MergeOutcome::default();
    for (key, rec) in other.into_iter().chain(preferred) {
        if rejected_keys.contains(&key) {
            outcome.rejected.insert(key, rec);
        } else {
            // Same identity in both sets: the preferred copy overwrites.
            outcome.merged.insert(key, rec);
        }
    }

    if !outcome.rejected.is_empty() {
        report.add_general(format!(
            "Found {} duplicate files across source trees:",
            outcome.rejected.len()
        ));
        for rec in outcome.rejected.values() {
            report.add_general(format!("    {}", rec.relative_source_path));
        }
    }

    outcome
}
