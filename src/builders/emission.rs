use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::builders::patterns::{PathMatcher, PathPattern};
use crate::core::config::{InstallerConfig, compile_path_list};
use crate::core::model::FileSet;
use crate::core::walker::DirectoryNode;

/// A component as some installer source defines it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentDefinition {
    pub id: String,
    pub guid: String,
    pub directory_id: String,
    pub file_names: Vec<String>,
    pub sources: Vec<String>,
}

/// Components and feature references across all installer sources,
/// generated and hand-written alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallerDefinitions {
    pub components: Vec<ComponentDefinition>,
    /// Feature name to the ids of the components it references.
    pub feature_refs: BTreeMap<String, BTreeSet<String>>,
}

impl InstallerDefinitions {
    pub fn extend(&mut self, other: InstallerDefinitions) {
        self.components.extend(other.components);
        for (feature, ids) in other.feature_refs {
            self.feature_refs.entry(feature).or_default().extend(ids);
        }
    }

    /// Finds a component by GUID, ignoring case and braces.
    pub fn find_by_guid(&self, guid: &str) -> Option<&ComponentDefinition> {
        let wanted = normalize_guid(guid);
        self.components
            .iter()
            .find(|c| normalize_guid(&c.guid) == wanted)
    }

    /// Every feature referencing `component_id`.
    pub fn features_of(&self, component_id: &str) -> BTreeSet<String> {
        self.feature_refs
            .iter()
            .filter(|(_, ids)| ids.contains(component_id))
            .map(|(feature, _)| feature.clone())
            .collect()
    }

    /// Source of another component installing `file_name` into `directory_id`.
    pub fn sourced_elsewhere(&self, directory_id: &str, file_name: &str) -> Option<&str> {
        self.components
            .iter()
            .filter(|c| c.directory_id == directory_id)
            .find_map(|c| {
                c.file_names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case(file_name))
                    .map(|i| c.sources.get(i).map(String::as_str).unwrap_or(""))
            })
    }
}

pub fn normalize_guid(guid: &str) -> String {
    guid.trim().trim_matches(|c| c == '{' || c == '}').to_uppercase()
}

/// One generated component, holding exactly one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedComponent {
    pub id: String,
    pub guid: String,
    pub file_name: String,
    /// Relative source path with the build configuration parameterized.
    pub source: String,
    pub directory_id: String,
    pub disk_id: u32,
    pub patch_group: u32,
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub read_only: bool,
    pub never_overwrite: bool,
    pub force_overwrite: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedDirectory {
    pub id: String,
    pub name: String,
    pub target_path: String,
    pub is_reference: bool,
    pub components: Vec<String>,
    pub children: Vec<PlannedDirectory>,
}

/// Everything the external installer-source emitter needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionPlan {
    pub directories: Option<PlannedDirectory>,
    pub components: Vec<PlannedComponent>,
    pub feature_refs: BTreeMap<String, Vec<String>>,
}

/// The per-file flag lists, compiled once per plan.
struct FlagPatterns {
    writable: Vec<PathPattern>,
    force_overwrite: Vec<PathPattern>,
    never_overwrite: Vec<PathPattern>,
}

impl FlagPatterns {
    fn new(config: &InstallerConfig) -> Result<Self> {
        Ok(Self {
            writable: compile_path_list(&config.writable, "writable file")?,
            force_overwrite: compile_path_list(&config.force_overwrite, "force-overwrite file")?,
            never_overwrite: compile_path_list(&config.never_overwrite, "never-overwrite file")?,
        })
    }
}

fn listed(patterns: &[PathPattern], path: &str) -> bool {
    patterns.iter().any(|p| p.matches(path))
}

impl EmissionPlan {
    /// Plans components for every emittable file and marks the records
    /// that made it into a component and a feature reference.
    ///
    /// Fails on a malformed pattern in one of the flag lists.
    pub fn build(files: &mut FileSet, tree: &DirectoryNode, config: &InstallerConfig) -> Result<Self> {
        let flags = FlagPatterns::new(config)?;
        let mut components = Vec::new();
        let mut feature_refs: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for record in files.values_mut().filter(|r| r.is_emittable()) {
            let Some(guid) = record.component_guid.clone() else {
                log::warn!("{} has no component GUID, not emitted", record.relative_source_path);
                continue;
            };

            let path = record.relative_source_path.as_str();
            components.push(PlannedComponent {
                id: record.id.clone(),
                guid,
                file_name: record.name.clone(),
                source: record.library_path.clone(),
                directory_id: record.directory_id.clone(),
                disk_id: record.disk_id,
                patch_group: record.patch_group.unwrap_or_default(),
                features: record.features.clone(),
                condition: config.condition_for(path).map(str::to_string),
                read_only: !listed(&flags.writable, path),
                never_overwrite: listed(&flags.never_overwrite, path),
                force_overwrite: listed(&flags.force_overwrite, path),
                comment: record.comment.clone(),
            });
            record.used_in_component = true;

            for feature in &record.features {
                feature_refs
                    .entry(feature.clone())
                    .or_default()
                    .push(record.id.clone());
            }
            record.used_in_feature_ref = !record.features.is_empty();
        }

        let directories = plan_directory(tree, files);

        Ok(Self {
            directories,
            components,
            feature_refs,
        })
    }

    /// The plan seen as installer definitions, for integrity checking.
    pub fn definitions(&self) -> InstallerDefinitions {
        InstallerDefinitions {
            components: self
                .components
                .iter()
                .map(|c| ComponentDefinition {
                    id: c.id.clone(),
                    guid: c.guid.clone(),
                    directory_id: c.directory_id.clone(),
                    file_names: vec![c.file_name.clone()],
                    sources: vec![c.source.clone()],
                })
                .collect(),
            feature_refs: self
                .feature_refs
                .iter()
                .map(|(f, ids)| (f.clone(), ids.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self).context("Failed to serialize emission plan")?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write emission plan {}", path.display()))
    }
}

/// Mirrors the directory tree, keeping only branches with emitted files.
fn plan_directory(node: &DirectoryNode, files: &FileSet) -> Option<PlannedDirectory> {
    if !node.contains_used_files(files) {
        return None;
    }
    Some(PlannedDirectory {
        id: node.directory_id.clone(),
        name: node.name.clone(),
        target_path: node.target_path.clone(),
        is_reference: node.is_reference,
        components: node
            .files
            .iter()
            .filter_map(|key| files.get(key))
            .filter(|r| r.used_in_component)
            .map(|r| r.id.clone())
            .collect(),
        children: node
            .children
            .iter()
            .filter_map(|child| plan_directory(child, files))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FileCondition;
    use crate::core::model::{FileOrigin, FileRecord, SourceRoots};

    fn record(path: &str, feature: Option<&str>) -> FileRecord {
        let roots = SourceRoots::new("Output\\Release", "DistFiles", "Release");
        let mut rec = FileRecord::new(path, &roots, FileOrigin::Static);
        if let Some(f) = feature {
            rec.add_feature(f);
        }
        rec.component_guid = Some(format!("GUID-{}", rec.name));
        rec.patch_group = Some(1);
        rec
    }

    #[test]
    fn test_plan_marks_used_records() {
        let mut config = InstallerConfig::default();
        config.conditions.push(FileCondition {
            path: "DistFiles/a.txt".to_string(),
            condition: "INSTALL_A".to_string(),
        });
        config.writable.push("*.ini".to_string());

        let used = record("DistFiles\\a.txt", Some("Core"));
        let ini = record("DistFiles\\Sub\\b.ini", Some("Core"));
        let unused = record("DistFiles\\Other\\c.txt", None);

        let mut tree = DirectoryNode::root();
        tree.files.push(used.library_path.clone());
        let mut sub = DirectoryNode::root();
        sub.name = "Sub".into();
        sub.target_path = "Sub".into();
        sub.directory_id = "Sub.X".into();
        sub.files.push(ini.library_path.clone());
        let mut other = DirectoryNode::root();
        other.name = "Other".into();
        other.target_path = "Other".into();
        other.files.push(unused.library_path.clone());
        tree.children = vec![sub, other];

        let mut files: FileSet = [used, ini, unused]
            .into_iter()
            .map(|r| (r.library_path.clone(), r))
            .collect();

        let plan = EmissionPlan::build(&mut files, &tree, &config).unwrap();
        assert_eq!(plan.components.len(), 2);
        assert_eq!(plan.feature_refs["Core"].len(), 2);

        let a = plan.components.iter().find(|c| c.file_name == "a.txt").unwrap();
        assert_eq!(a.condition.as_deref(), Some("INSTALL_A"));
        assert!(a.read_only);
        let b = plan.components.iter().find(|c| c.file_name == "b.ini").unwrap();
        assert!(!b.read_only);

        let dirs = plan.directories.as_ref().unwrap();
        assert_eq!(dirs.components.len(), 1);
        assert_eq!(dirs.children.len(), 1);
        assert_eq!(dirs.children[0].name, "Sub");

        assert!(files["DistFiles\\a.txt"].used_in_component);
        assert!(files["DistFiles\\a.txt"].used_in_feature_ref);
        assert!(!files["DistFiles\\Other\\c.txt"].used_in_component);

        let defs = plan.definitions();
        assert!(defs.find_by_guid("{guid-a.txt}").is_some());
        assert_eq!(
            defs.features_of(&a.id).into_iter().collect::<Vec<_>>(),
            vec!["Core".to_string()]
        );
    }

    #[test]
    fn test_bad_flag_pattern_fails_the_plan() {
        let mut config = InstallerConfig::default();
        config.never_overwrite.push("Settings|*.xml".to_string());
        let mut files: FileSet = [record("DistFiles\\a.txt", Some("Core"))]
            .into_iter()
            .map(|r| (r.library_path.clone(), r))
            .collect();

        let err = EmissionPlan::build(&mut files, &DirectoryNode::root(), &config).unwrap_err();
        assert!(format!("{err:#}").contains("never-overwrite"));
        assert!(!files["DistFiles\\a.txt"].used_in_component);
    }

    #[test]
    fn test_force_and_never_overwrite_flags() {
        let mut config = InstallerConfig::default();
        config.force_overwrite.push("*\\Templates\\*.xml".to_string());
        config.never_overwrite.push("DistFiles/settings.ini".to_string());
        let mut files: FileSet = [
            record("DistFiles\\Templates\\a.xml", Some("Core")),
            record("DistFiles\\settings.ini", Some("Core")),
        ]
        .into_iter()
        .map(|r| (r.library_path.clone(), r))
        .collect();

        let plan = EmissionPlan::build(&mut files, &DirectoryNode::root(), &config).unwrap();
        let template = plan.components.iter().find(|c| c.file_name == "a.xml").unwrap();
        assert!(template.force_overwrite);
        assert!(!template.never_overwrite);
        let settings = plan.components.iter().find(|c| c.file_name == "settings.ini").unwrap();
        assert!(settings.never_overwrite);
        assert!(!settings.force_overwrite);
    }

    #[test]
    fn test_sourced_elsewhere() {
        let defs = InstallerDefinitions {
            components: vec![ComponentDefinition {
                id: "c1".into(),
                guid: "G".into(),
                directory_id: "Fonts".into(),
                file_names: vec!["a.ttf".into()],
                sources: vec!["DistFiles\\Fonts\\a.ttf".into()],
            }],
            feature_refs: BTreeMap::new(),
        };
        assert_eq!(defs.sourced_elsewhere("Fonts", "A.TTF"), Some("DistFiles\\Fonts\\a.ttf"));
        assert_eq!(defs.sourced_elsewhere("Other", "a.ttf"), None);
    }
}
