use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::builders::patterns::{FileHeuristics, PathMatcher, PathPattern};
use crate::builders::reporter::{IssueKind, Report};
use crate::core::config::{CabinetAssignment, CabinetConfig, InstallerConfig, Language};
use crate::core::model::{FileOrigin, FileRecord, FileSet};

/// How one feature's files are spread over cabinets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CabinetRule {
    Fixed(u32),
    /// `indexes[i]` holds names sorting before `divisions[i]`; the last
    /// index takes the rest.
    Divided { indexes: Vec<u32>, divisions: Vec<String> },
}

impl CabinetRule {
    pub fn from_assignment(assignment: &CabinetAssignment) -> Result<Self> {
        match assignment.index {
            Some(index) => {
                if !assignment.indexes.is_empty() || !assignment.divisions.is_empty() {
                    anyhow::bail!("a fixed index cannot be combined with indexes or divisions");
                }
                if index == 0 {
                    anyhow::bail!("cabinet index must be at least 1");
                }
                Ok(CabinetRule::Fixed(index))
            }
            None => {
                if assignment.indexes.is_empty() || assignment.divisions.is_empty() {
                    anyhow::bail!("either index, or both indexes and divisions, must be given");
                }
                if assignment.indexes.len() != assignment.divisions.len() + 1 {
                    anyhow::bail!(
                        "there must be exactly one more index than divisions ({} indexes, {} divisions)",
                        assignment.indexes.len(),
                        assignment.divisions.len()
                    );
                }
                Ok(CabinetRule::Divided {
                    indexes: assignment.indexes.clone(),
                    divisions: assignment.divisions.iter().map(|d| d.to_lowercase()).collect(),
                })
            }
        }
    }

    pub fn cabinet_for(&self, file_name: &str) -> u32 {
        match self {
            CabinetRule::Fixed(index) => *index,
            CabinetRule::Divided { indexes, divisions } => {
                let name = file_name.to_lowercase();
                divisions
                    .iter()
                    .position(|division| name.as_str() < division.as_str())
                    .and_then(|i| indexes.get(i))
                    .or_else(|| indexes.last())
                    .copied()
                    .unwrap_or(1)
            }
        }
    }
}

/// Feature to cabinet mapping with a mandatory default.
#[derive(Debug, Clone)]
pub struct CabinetMap {
    default: CabinetRule,
    by_feature: HashMap<String, CabinetRule>,
}

impl CabinetMap {
    pub fn from_config(config: &CabinetConfig) -> Result<Self> {
        let default = CabinetRule::from_assignment(&config.default)
            .context("Invalid default cabinet assignment")?;
        let mut by_feature = HashMap::new();
        for assignment in &config.assignments {
            let rule = CabinetRule::from_assignment(assignment).with_context(|| {
                format!("Invalid cabinet assignment for '{}'", assignment.feature)
            })?;
            by_feature.insert(assignment.feature.clone(), rule);
        }
        Ok(Self {
            default,
            by_feature,
        })
    }

    /// Disk id from the record's first feature.
    pub fn disk_id(&self, record: &FileRecord) -> u32 {
        record
            .features
            .first()
            .and_then(|f| self.by_feature.get(f))
            .unwrap_or(&self.default)
            .cabinet_for(&record.name)
    }
}

/// Target paths found in one variant build tree.
#[derive(Debug, Clone, Default)]
pub struct VariantEvidence {
    pub feature: String,
    target_paths: HashSet<String>,
}

impl VariantEvidence {
    pub fn new(feature: &str, files: &FileSet) -> Self {
        Self {
            feature: feature.to_string(),
            target_paths: files.values().map(|f| f.target_path.to_lowercase()).collect(),
        }
    }

    pub fn contains(&self, target_path: &str) -> bool {
        self.target_paths.contains(&target_path.to_lowercase())
    }
}

/// Feature membership after classification.
#[derive(Debug, Default)]
pub struct Classification {
    /// Feature name to library paths.
    pub feature_files: BTreeMap<String, Vec<String>>,
    /// Built files with no evidence that were added to the catch-all feature.
    pub orphans_added: Vec<String>,
    /// Declared features that received no files.
    pub unused_declared: Vec<String>,
}

struct SuspectRule {
    feature: String,
    names: Vec<Regex>,
    exceptions: Vec<String>,
}

/// Assigns harvested files to installer features.
pub struct FeatureClassifier<'a> {
    config: &'a InstallerConfig,
    localization: Vec<(Language, FileHeuristics)>,
    core_orphans: Vec<PathPattern>,
    overrides: Vec<(String, Vec<PathPattern>)>,
    suspects: Vec<SuspectRule>,
    cabinets: CabinetMap,
}

impl<'a> FeatureClassifier<'a> {
    pub fn new(config: &'a InstallerConfig) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<PathPattern>> {
            patterns
                .iter()
                .map(|p| PathPattern::new(p, false).with_context(|| format!("Invalid pattern '{p}'")))
                .collect()
        };

        let overrides = config
            .features
            .overrides
            .iter()
            .map(|o| Ok((o.feature.clone(), compile(&o.patterns)?)))
            .collect::<Result<Vec<_>>>()?;

        let suspects = config
            .features
            .suspect_names
            .iter()
            .map(|rule| {
                let names = rule
                    .name_patterns
                    .iter()
                    .map(|p| Regex::new(p).with_context(|| format!("Invalid name pattern '{p}'")))
                    .collect::<Result<Vec<_>>>()?;
                Ok(SuspectRule {
                    feature: rule.feature.clone(),
                    names,
                    exceptions: rule.exceptions.iter().map(|e| e.to_lowercase()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            localization: config.localization_heuristics(),
            core_orphans: compile(&config.features.core_orphans)?,
            overrides,
            suspects,
            cabinets: CabinetMap::from_config(&config.cabinets)?,
        })
    }

    /// Classifies every file in `files` in place.
    ///
    /// Forced assignments win over everything. Otherwise localization rules
    /// run first and a localized file gets no product feature. Product
    /// categories are then tested, where a matching narrower category
    /// suppresses its parent. Files that are still unassigned fall back to
    /// variant build evidence (built files) or the catch-all (static files).
    pub fn classify(
        &self,
        files: &mut FileSet,
        variants: &[VariantEvidence],
        add_orphans: bool,
        report: &mut Report,
    ) -> Classification {
        let mut classification = Classification::default();

        for record in files.values_mut() {
            self.assign(record, variants, add_orphans, &mut classification);
            self.check_membership(record, report);
            record.disk_id = self.cabinets.disk_id(record);
            self.check_suspect_name(record, report);

            for feature in &record.features {
                classification
                    .feature_files
                    .entry(feature.clone())
                    .or_default()
                    .push(record.library_path.clone());
            }
        }

        classification.unused_declared = self
            .config
            .features
            .declared
            .iter()
            .filter(|f| !classification.feature_files.contains_key(*f))
            .cloned()
            .collect();

        for feature in &classification.unused_declared {
            report.add_general(format!("Declared feature {feature} has no files."));
        }
        if !classification.orphans_added.is_empty() {
            report.add_general(format!(
                "Added {} orphan files to {}:",
                classification.orphans_added.len(),
                self.config.features.catch_all
            ));
            for path in &classification.orphans_added {
                report.add_general(format!("    {path}"));
            }
        }

        classification
    }

    fn assign(
        &self,
        record: &mut FileRecord,
        variants: &[VariantEvidence],
        add_orphans: bool,
        classification: &mut Classification,
    ) {
        let path = record.relative_source_path.clone();
        let catch_all = &self.config.features.catch_all;

        if self.core_orphans.iter().any(|p| p.matches(&path)) {
            record.add_feature(catch_all);
            record.append_comment(&format!("(forced into {catch_all})"));
            return;
        }
        if let Some((feature, _)) = self
            .overrides
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.matches(&path)))
        {
            record.add_feature(feature);
            record.append_comment(&format!("(forced into {feature})"));
            return;
        }

        let mut localized = false;
        for (language, heuristics) in &self.localization {
            if heuristics.is_included(&path) {
                record.add_feature(&language.name);
                localized = true;
            }
        }
        if localized {
            return;
        }

        let matched: Vec<_> = self
            .config
            .features
            .categories
            .iter()
            .filter(|c| c.heuristics().is_included(&path))
            .collect();
        for category in &matched {
            let carved_out = matched
                .iter()
                .any(|m| m.parent.as_deref() == Some(category.name.as_str()));
            if !carved_out {
                record.add_feature(&category.name);
            }
        }
        if !record.features.is_empty() {
            return;
        }

        match &record.origin {
            FileOrigin::Static => {
                record.add_feature(catch_all);
            }
            FileOrigin::Variant(name) => {
                let name = name.clone();
                record.add_feature(&name);
            }
            FileOrigin::Built if variants.is_empty() => {
                record.add_feature(catch_all);
            }
            FileOrigin::Built => {
                let hits: Vec<&VariantEvidence> = variants
                    .iter()
                    .filter(|v| v.contains(&record.target_path))
                    .collect();
                match hits.as_slice() {
                    [] if add_orphans => {
                        record.add_feature(catch_all);
                        record.append_comment("(orphan)");
                        classification.orphans_added.push(record.relative_source_path.clone());
                    }
                    [] => {}
                    [only] => {
                        record.add_feature(&only.feature);
                    }
                    _ => {
                        record.add_feature(catch_all);
                    }
                }
            }
        }
    }

    fn check_membership(&self, record: &mut FileRecord, report: &mut Report) {
        if record.features.is_empty() {
            report.add_issue(
                IssueKind::Unreferenced,
                Some(record.relative_source_path.as_str()),
                "not referenced in any feature",
            );
            return;
        }

        let undeclared: Vec<&str> = record
            .features
            .iter()
            .filter(|f| !self.config.is_declared(f))
            .map(String::as_str)
            .collect();
        if !undeclared.is_empty() {
            record.only_in_unused_features = true;
            report.add_issue(
                IssueKind::UndeclaredFeature,
                Some(record.relative_source_path.as_str()),
                format!(
                    "assigned to undeclared feature(s) {}; left out of the installer",
                    undeclared.join(", ")
                ),
            );
        }

        let languages = record
            .features
            .iter()
            .filter(|f| self.config.is_language(f))
            .count();
        let products = record.features.len() - languages;
        if languages > 1 || products > 1 {
            report.add_issue(
                IssueKind::MultipleFeatures,
                Some(record.relative_source_path.as_str()),
                format!("referenced by more than one feature: {}", record.features.join(", ")),
            );
        }
    }

    fn check_suspect_name(&self, record: &FileRecord, report: &mut Report) {
        if !record.is_emittable() {
            return;
        }
        let lowered = record.relative_source_path.to_lowercase();
        for rule in &self.suspects {
            if record.has_feature(&rule.feature)
                || rule.exceptions.iter().any(|e| lowered.contains(e.as_str()))
            {
                continue;
            }
            if rule.names.iter().any(|re| re.is_match(&record.name)) {
                report.add_issue(
                    IssueKind::SuspectFeature,
                    Some(record.relative_source_path.as_str()),
                    format!(
                        "name suggests feature {} but it is in {}",
                        rule.feature,
                        record.features.join(", ")
                    ),
                );
            }
        }
    }
}
