use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::patterns::{FileHeuristics, HeuristicSet, OmissionFilter, PathPattern};
use crate::builders::validator::{ConfigValidator, StandardValidator};
use crate::core::model::{SourceRoots, normalize_relative};

pub const CONFIG_FILE_NAME: &str = "InstallerConfig.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VariantSource {
    /// Feature that files unique to this build belong to.
    pub name: String,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Output tree of the build, e.g. `Output\Release`.
    pub built: String,
    /// Tree of files shipped as-is, e.g. `DistFiles`.
    pub static_files: String,
    #[serde(default)]
    pub variants: Vec<VariantSource>,
    /// Hand-written installer fragments, relative to the installer folder.
    #[serde(default)]
    pub manual_fragments: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LibraryConfig {
    pub library: String,
    pub addenda: String,
    pub plan: String,
    pub report: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            library: "FileLibrary.json".to_string(),
            addenda: "FileLibraryAddenda.json".to_string(),
            plan: "AutoFiles.plan.json".to_string(),
            report: "InstallerReport.txt".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Language {
    pub name: String,
    /// Folder code substituted for `{0}` in localization heuristics.
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OmissionRule {
    pub pattern: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimilarFilePair {
    pub path1: String,
    pub path2: String,
    #[serde(default = "default_true")]
    pub suppress_warning: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeatureOverride {
    pub feature: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeatureCategory {
    pub name: String,
    /// A broader category this one is carved out of.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub include: HeuristicSet,
    #[serde(default)]
    pub exclude: HeuristicSet,
}

impl FeatureCategory {
    pub fn heuristics(&self) -> FileHeuristics {
        FileHeuristics {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SuspectNameRule {
    pub feature: String,
    /// Regular expressions tested against the file name.
    pub name_patterns: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeaturesConfig {
    pub declared: Vec<String>,
    pub catch_all: String,
    #[serde(default)]
    pub add_orphans: bool,
    /// Built files forced into the catch-all feature.
    #[serde(default)]
    pub core_orphans: Vec<String>,
    #[serde(default)]
    pub overrides: Vec<FeatureOverride>,
    #[serde(default)]
    pub categories: Vec<FeatureCategory>,
    /// Templated with each language's folder code.
    #[serde(default)]
    pub localization: FileHeuristics,
    #[serde(default)]
    pub suspect_names: Vec<SuspectNameRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CabinetAssignment {
    #[serde(default)]
    pub feature: String,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub indexes: Vec<u32>,
    #[serde(default)]
    pub divisions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CabinetConfig {
    pub default: CabinetAssignment,
    #[serde(default)]
    pub assignments: Vec<CabinetAssignment>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// Source folder relative to the project root.
    pub folder: String,
    /// Installer directory id the folder is installed into.
    pub installer_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileCondition {
    pub path: String,
    pub condition: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct IntegrityConfig {
    /// Static files allowed to be absent from version control.
    #[serde(default)]
    pub non_versioned_static: Vec<String>,
    /// Files allowed to carry version 0.0.0.0.
    #[serde(default)]
    pub version_zero_allowed: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstallerConfig {
    pub version: String,
    /// Project root relative to the installer folder.
    #[serde(default = "default_project_root")]
    pub project_root: String,
    #[serde(default = "default_build_config")]
    pub build_config: String,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub omissions: Vec<OmissionRule>,
    #[serde(default)]
    pub similar_files: Vec<SimilarFilePair>,
    pub features: FeaturesConfig,
    pub cabinets: CabinetConfig,
    #[serde(default)]
    pub redirections: Vec<Redirection>,
    #[serde(default)]
    pub conditions: Vec<FileCondition>,
    #[serde(default)]
    pub writable: Vec<String>,
    #[serde(default)]
    pub force_overwrite: Vec<String>,
    #[serde(default)]
    pub never_overwrite: Vec<String>,
    #[serde(default)]
    pub integrity: IntegrityConfig,
}

fn default_true() -> bool {
    true
}

fn default_project_root() -> String {
    "..".to_string()
}

fn default_build_config() -> String {
    "Release".to_string()
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            project_root: default_project_root(),
            build_config: default_build_config(),
            sources: SourcesConfig {
                built: "Output\\Release".to_string(),
                static_files: "DistFiles".to_string(),
                variants: Vec::new(),
                manual_fragments: Vec::new(),
            },
            library: LibraryConfig::default(),
            languages: Vec::new(),
            omissions: vec![
                OmissionRule {
                    pattern: "*.pdb".to_string(),
                    reason: Some("debug symbols are not shipped".to_string()),
                    case_sensitive: false,
                },
                OmissionRule {
                    pattern: "Thumbs.db".to_string(),
                    reason: None,
                    case_sensitive: false,
                },
            ],
            similar_files: Vec::new(),
            features: FeaturesConfig {
                declared: vec!["Core".to_string()],
                catch_all: "Core".to_string(),
                add_orphans: false,
                core_orphans: Vec::new(),
                overrides: Vec::new(),
                categories: Vec::new(),
                localization: FileHeuristics::default(),
                suspect_names: Vec::new(),
            },
            cabinets: CabinetConfig {
                default: CabinetAssignment {
                    index: Some(1),
                    ..CabinetAssignment::default()
                },
                assignments: Vec::new(),
            },
            redirections: Vec::new(),
            conditions: Vec::new(),
            writable: Vec::new(),
            force_overwrite: Vec::new(),
            never_overwrite: Vec::new(),
            integrity: IntegrityConfig::default(),
        }
    }
}

impl InstallerConfig {
    pub fn source_roots(&self) -> SourceRoots {
        self.sources.variants.iter().fold(
            SourceRoots::new(&self.sources.built, &self.sources.static_files, &self.build_config),
            |roots, variant| roots.with_variant(&variant.name, &variant.path),
        )
    }

    /// Compiles the configured omission rules.
    pub fn omission_filter(&self) -> Result<OmissionFilter> {
        let mut filter = OmissionFilter::new();
        for rule in &self.omissions {
            filter
                .add(&rule.pattern, rule.reason.as_deref(), rule.case_sensitive)
                .with_context(|| format!("Invalid omission pattern '{}'", rule.pattern))?;
        }
        Ok(filter)
    }

    /// Localization rules instantiated for every configured language.
    pub fn localization_heuristics(&self) -> Vec<(Language, FileHeuristics)> {
        self.languages
            .iter()
            .map(|lang| (lang.clone(), self.features.localization.for_language(&lang.code)))
            .collect()
    }

    pub fn is_declared(&self, feature: &str) -> bool {
        self.features.declared.iter().any(|f| f == feature)
    }

    pub fn is_language(&self, feature: &str) -> bool {
        self.languages.iter().any(|l| l.name == feature)
    }

    pub fn redirection_for(&self, folder: &str) -> Option<&Redirection> {
        self.redirections
            .iter()
            .find(|r| normalize_relative(&r.folder).eq_ignore_ascii_case(folder))
    }

    pub fn condition_for(&self, relative_path: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| normalize_relative(&c.path).eq_ignore_ascii_case(relative_path))
            .map(|c| c.condition.as_str())
    }

}

/// Compiles one of the configured path lists, such as `writable` or the
/// integrity allowances. Entries may use either separator and never
/// respect case.
pub fn compile_path_list(list: &[String], context: &str) -> Result<Vec<PathPattern>> {
    list.iter()
        .map(|p| {
            PathPattern::new(&normalize_relative(p), false)
                .with_context(|| format!("Invalid {context} pattern '{p}'"))
        })
        .collect()
}

pub struct ConfigManager {
    config_path: PathBuf,
    installer_dir: PathBuf,
}

impl ConfigManager {
    /// Looks for the configuration in the current directory and its parents,
    /// falling back to the current directory.
    pub fn new() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to read current directory")?;
        let installer_dir = find_config_dir(&current_dir).unwrap_or(current_dir);
        Ok(Self::new_at(installer_dir))
    }

    pub fn new_at(installer_dir: PathBuf) -> Self {
        Self {
            config_path: installer_dir.join(CONFIG_FILE_NAME),
            installer_dir,
        }
    }

    pub fn initialize(&self) -> Result<()> {
        if self.config_path.exists() {
            return Ok(());
        }

        let default_config = InstallerConfig::default();
        self.save_config(&default_config)?;
        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        let config = self.load_config()?;
        let validator = StandardValidator::new();
        let issues = validator.validate_config(&config)?;

        if issues.is_empty() {
            println!("✓ Configuration is valid.");
            Ok(())
        } else {
            println!("⚠️  Found issues in configuration:");
            for issue in issues {
                println!("  - {issue}");
            }
            anyhow::bail!("Configuration validation failed.");
        }
    }

    /// Loads the configuration and fails on the first report of issues.
    /// A missing file is a configuration error here, unlike `load_config`.
    pub fn load_validated(&self) -> Result<InstallerConfig> {
        if !self.config_path.exists() {
            anyhow::bail!(
                "Configuration file {} not found. Run 'init' first.",
                self.config_path.display()
            );
        }
        let config = self.load_config()?;
        let issues = StandardValidator::new().validate_config(&config)?;
        if !issues.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", issues.join("\n  - "));
        }
        Ok(config)
    }

    pub fn export_config(&self, file_path: &str, format: &str) -> Result<()> {
        let config = self.load_config()?;

        let content = match format {
            "json" => {
                serde_json::to_string_pretty(&config).context("Failed to serialize to JSON")?
            }
            "yaml" => serde_yaml::to_string(&config).context("Failed to serialize to YAML")?,
            _ => toml::to_string_pretty(&config).context("Failed to serialize to TOML")?,
        };

        fs::write(file_path, content).context("Failed to write export file")?;

        Ok(())
    }

    pub fn get_installer_dir(&self) -> &Path {
        &self.installer_dir
    }

    pub fn project_root(&self, config: &InstallerConfig) -> PathBuf {
        let root = self.installer_dir.join(&config.project_root);
        root.canonicalize().unwrap_or(root)
    }

    /// Resolves a file name from the `[library]` section against the installer folder.
    pub fn installer_file(&self, name: &str) -> PathBuf {
        self.installer_dir.join(name)
    }
}

pub trait ConfigProvider {
    fn load_config(&self) -> Result<InstallerConfig>;
    fn save_config(&self, config: &InstallerConfig) -> Result<()>;
    fn get_config_path(&self) -> Result<PathBuf>;
}

impl ConfigProvider for ConfigManager {
    fn load_config(&self) -> Result<InstallerConfig> {
        if !self.config_path.exists() {
            return Ok(InstallerConfig::default());
        }

        let content =
            fs::read_to_string(&self.config_path).context("Failed to read config file")?;

        toml::from_str(&content).context("Failed to parse config file")
    }

    fn save_config(&self, config: &InstallerConfig) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(&self.config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn get_config_path(&self) -> Result<PathBuf> {
        Ok(self.config_path.clone())
    }
}

fn find_config_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE_NAME).exists())
        .map(Path::to_path_buf)
}
