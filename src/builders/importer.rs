use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::builders::emission::{ComponentDefinition, InstallerDefinitions};
use crate::builders::patterns::{OmissionFilter, PatternError};
use crate::core::model::{file_name_of, normalize_relative, strip_prefix_ignore_case};

/// Prefix of sources that point into the versioned build drop.
const VERSIONED_BUILD_PREFIX: &str = "Builds\\$(var.Version)\\";

/// A file that a hand-written installer source installs by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualFile {
    /// Source path relative to the project root.
    pub source: String,
    pub component_id: String,
    /// File name of the installer source that installs it.
    pub fragment: String,
}

/// Everything read from the hand-written installer sources.
#[derive(Debug, Clone, Default)]
pub struct ManualSources {
    pub files: Vec<ManualFile>,
    pub definitions: InstallerDefinitions,
}

impl ManualSources {
    /// Registers each manually installed file as an omission, so the
    /// generator does not install it a second time.
    pub fn add_omissions(&self, filter: &mut OmissionFilter) -> Result<(), PatternError> {
        for file in &self.files {
            let reason = format!("already included in installer source {}", file.fragment);
            filter.add(&file.source, Some(reason.as_str()), false)?;
        }
        Ok(())
    }

    fn merge(&mut self, other: ManualSources) {
        self.files.extend(other.files);
        self.definitions.extend(other.definitions);
    }
}

/// Reads installer definitions from an external source.
pub trait DefinitionImporter {
    /// Imports one installer source file.
    ///
    /// # Arguments
    /// * `file_path`: The installer source to read.
    ///
    /// # Returns
    /// The files, components and feature references it defines.
    fn import_from_file(&mut self, file_path: &Path) -> Result<ManualSources>;
}

/// A tolerant tag scanner for hand-written installer XML fragments.
///
/// Only `Directory`, `DirectoryRef`, `Component`, `File`, `Feature`,
/// `FeatureRef` and `ComponentRef` elements matter; everything else is
/// walked over.
pub struct FragmentImporter {
    tag: Regex,
    attribute: Regex,
    comment: Regex,
}

impl DefinitionImporter for FragmentImporter {
    fn import_from_file(&mut self, file_path: &Path) -> Result<ManualSources> {
        let content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read installer source {}", file_path.display()))?;
        let fragment = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.parse(&content, &fragment))
    }
}

#[derive(Debug)]
struct OpenElement {
    tag: String,
    id: String,
}

impl FragmentImporter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            tag: Regex::new(r"<(/?)([A-Za-z][\w:.-]*)([^>]*?)(/?)>")?,
            attribute: Regex::new(r#"([\w:.-]+)\s*=\s*"([^"]*)""#)?,
            comment: Regex::new(r"(?s)<!--.*?-->")?,
        })
    }

    /// Imports every listed fragment, relative to `base_dir`. Missing
    /// fragments are logged and skipped.
    pub fn import_all(&mut self, base_dir: &Path, fragments: &[String]) -> Result<ManualSources> {
        let mut sources = ManualSources::default();
        for fragment in fragments {
            let path = base_dir.join(fragment);
            if !path.is_file() {
                log::warn!("Installer source {} not found", path.display());
                continue;
            }
            sources.merge(self.import_from_file(&path)?);
        }
        Ok(sources)
    }

    fn parse(&self, content: &str, fragment: &str) -> ManualSources {
        let content = self.comment.replace_all(content, "");
        let mut stack: Vec<OpenElement> = Vec::new();
        let mut sources = ManualSources::default();
        // Component id to its index in `definitions.components`.
        let mut component_index: HashMap<String, usize> = HashMap::new();

        for caps in self.tag.captures_iter(&content) {
            let closing = !caps[1].is_empty();
            let tag = local_name(&caps[2]).to_string();
            let self_closing = !caps[4].is_empty();

            if closing {
                if let Some(pos) = stack.iter().rposition(|e| e.tag == tag) {
                    stack.truncate(pos);
                }
                continue;
            }

            let attrs: HashMap<String, String> = self
                .attribute
                .captures_iter(&caps[3])
                .map(|a| (a[1].to_string(), a[2].to_string()))
                .collect();
            let id = attrs.get("Id").cloned().unwrap_or_default();

            match tag.as_str() {
                "Component" => {
                    let directory_id = attrs
                        .get("Directory")
                        .cloned()
                        .or_else(|| nearest(&stack, &["Directory", "DirectoryRef"]).map(str::to_string))
                        .unwrap_or_default();
                    component_index.insert(id.clone(), sources.definitions.components.len());
                    sources.definitions.components.push(ComponentDefinition {
                        id: id.clone(),
                        guid: attrs.get("Guid").cloned().unwrap_or_default(),
                        directory_id,
                        file_names: Vec::new(),
                        sources: Vec::new(),
                    });
                    // A component declared inside a feature is referenced by it.
                    if let Some(feature) = nearest(&stack, &["Feature", "FeatureRef"]) {
                        add_feature_ref(&mut sources.definitions, feature, &id);
                    }
                }
                "ComponentRef" => {
                    if let Some(feature) = nearest(&stack, &["Feature", "FeatureRef"]) {
                        add_feature_ref(&mut sources.definitions, feature, &id);
                    }
                }
                "File" => {
                    let Some(raw_source) = attrs.get("Source").or_else(|| attrs.get("src")) else {
                        continue;
                    };
                    let source = clean_source(raw_source);
                    let name = attrs
                        .get("Name")
                        .cloned()
                        .unwrap_or_else(|| file_name_of(&source).to_string());
                    let component_id = nearest(&stack, &["Component"]).unwrap_or_default().to_string();
                    if let Some(&index) = component_index.get(&component_id) {
                        let component = &mut sources.definitions.components[index];
                        component.file_names.push(name);
                        component.sources.push(source.clone());
                    }
                    sources.files.push(ManualFile {
                        source,
                        component_id,
                        fragment: fragment.to_string(),
                    });
                }
                _ => {}
            }

            if !self_closing {
                stack.push(OpenElement { tag, id });
            }
        }

        log::debug!(
            "{fragment}: {} files, {} components",
            sources.files.len(),
            sources.definitions.components.len()
        );
        sources
    }
}

fn local_name(tag: &str) -> &str {
    tag.rsplit(':').next().unwrap_or(tag)
}

/// Id of the innermost open element with one of `tags`.
fn nearest<'s>(stack: &'s [OpenElement], tags: &[&str]) -> Option<&'s str> {
    stack
        .iter()
        .rev()
        .find(|e| tags.contains(&e.tag.as_str()))
        .map(|e| e.id.as_str())
}

fn add_feature_ref(definitions: &mut InstallerDefinitions, feature: &str, component_id: &str) {
    definitions
        .feature_refs
        .entry(feature.to_string())
        .or_default()
        .insert(component_id.to_string());
}

/// Turns a fragment's `Source` attribute into a path relative to the project root.
fn clean_source(source: &str) -> String {
    let mut cleaned = normalize_relative(source);
    while let Some(rest) = cleaned.strip_prefix("..\\") {
        cleaned = rest.to_string();
    }
    if let Some(rest) = strip_prefix_ignore_case(&cleaned, VERSIONED_BUILD_PREFIX) {
        cleaned = rest.to_string();
    }
    cleaned
}
