use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;

use crate::builders::classifier::CabinetRule;
use crate::builders::patterns::PathPattern;
use crate::core::config;
use crate::core::model::normalize_relative;

/// The `ConfigValidator` trait defines the public interface for validating the
/// installer configuration.
///
/// Validation never stops at the first problem: every issue found is
/// returned so that a broken configuration can be fixed in one pass.
pub trait ConfigValidator {
    /// Performs a full validation of the `InstallerConfig` and returns
    /// a list of issues found.
    ///
    /// # Arguments
    /// * `config`: The `InstallerConfig` to be validated.
    ///
    /// # Returns
    /// A `Result<Vec<String>>` where each string describes one issue.
    /// An empty vector means the configuration is usable.
    fn validate_config(&self, config: &config::InstallerConfig) -> Result<Vec<String>>;

    /// Validates a single path pattern.
    ///
    /// # Arguments
    /// * `context`: Where the pattern came from, used in the issue text.
    /// * `pattern`: The raw pattern text.
    ///
    /// # Returns
    /// A vector of issues for this pattern.
    fn validate_pattern(&self, context: &str, pattern: &str) -> Vec<String>;
}

/// The `StandardValidator` is a concrete implementation of `ConfigValidator`.
///
/// It checks that every section the pipeline relies on is present and that
/// all patterns, regular expressions and cabinet assignments compile.
pub struct StandardValidator;

impl Default for StandardValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardValidator {
    /// Creates a new instance of `StandardValidator`.
    pub fn new() -> Self {
        Self
    }

    /// Checks the `[features]` section.
    ///
    /// Every feature named by an override, category, variant or suspect-name
    /// rule must be declared, as must the catch-all feature.
    fn check_features(&self, config: &config::InstallerConfig) -> Vec<String> {
        let mut issues = Vec::new();
        let features = &config.features;

        if features.declared.is_empty() {
            issues.push("No features are declared".to_string());
        }

        let mut seen = HashSet::new();
        for name in &features.declared {
            if !seen.insert(name.as_str()) {
                issues.push(format!("Feature '{name}' is declared more than once"));
            }
        }

        if features.catch_all.trim().is_empty() {
            issues.push("The catch-all feature is not set".to_string());
        } else if !config.is_declared(&features.catch_all) {
            issues.push(format!(
                "Catch-all feature '{}' is not declared",
                features.catch_all
            ));
        }

        for o in &features.overrides {
            if !config.is_declared(&o.feature) {
                issues.push(format!("Override feature '{}' is not declared", o.feature));
            }
            for pattern in &o.patterns {
                issues.extend(self.validate_pattern(&format!("override '{}'", o.feature), pattern));
            }
        }

        let category_names: HashSet<&str> =
            features.categories.iter().map(|c| c.name.as_str()).collect();
        for category in &features.categories {
            if category.include.is_empty() {
                issues.push(format!("Category '{}' has no inclusion rules", category.name));
            }
            if let Some(parent) = &category.parent
                && !category_names.contains(parent.as_str())
            {
                issues.push(format!(
                    "Category '{}' names unknown parent '{parent}'",
                    category.name
                ));
            }
        }

        for variant in &config.sources.variants {
            if !config.is_declared(&variant.name) {
                issues.push(format!("Variant feature '{}' is not declared", variant.name));
            }
        }

        for rule in &features.suspect_names {
            for pattern in &rule.name_patterns {
                if let Err(e) = Regex::new(pattern) {
                    issues.push(format!(
                        "Suspect-name pattern '{pattern}' for '{}' is invalid: {e}",
                        rule.feature
                    ));
                }
            }
        }

        issues
    }

    /// Path lists accept either separator; they are compiled normalized.
    fn check_path_list(&self, context: &str, list: &[String]) -> Vec<String> {
        list.iter()
            .flat_map(|pattern| self.validate_pattern(context, &normalize_relative(pattern)))
            .collect()
    }

    fn check_cabinets(&self, config: &config::InstallerConfig) -> Vec<String> {
        let mut issues = Vec::new();
        if let Err(e) = CabinetRule::from_assignment(&config.cabinets.default) {
            issues.push(format!("Default cabinet assignment is invalid: {e}"));
        }
        for assignment in &config.cabinets.assignments {
            if assignment.feature.trim().is_empty() {
                issues.push("A cabinet assignment has no feature".to_string());
            } else if !config.is_declared(&assignment.feature) {
                issues.push(format!(
                    "Cabinet assignment for undeclared feature '{}'",
                    assignment.feature
                ));
            }
            if let Err(e) = CabinetRule::from_assignment(assignment) {
                issues.push(format!(
                    "Cabinet assignment for '{}' is invalid: {e}",
                    assignment.feature
                ));
            }
        }
        issues
    }
}

impl ConfigValidator for StandardValidator {
    fn validate_config(&self, config: &config::InstallerConfig) -> Result<Vec<String>> {
        let mut issues = Vec::new();

        if config.version.trim().is_empty() {
            issues.push("Configuration version is missing".to_string());
        }
        if config.sources.built.trim().is_empty() {
            issues.push("Built files source root is missing".to_string());
        }
        if config.sources.static_files.trim().is_empty() {
            issues.push("Static files source root is missing".to_string());
        }

        for language in &config.languages {
            if language.name.trim().is_empty() || language.code.trim().is_empty() {
                issues.push(format!(
                    "Language '{}' needs both a name and a folder code",
                    language.name
                ));
            }
        }
        if !config.languages.is_empty() && config.features.localization.include.is_empty() {
            issues.push("Languages are configured but there are no localization rules".to_string());
        }

        for rule in &config.omissions {
            issues.extend(self.validate_pattern("omission", &rule.pattern));
        }
        for pattern in &config.features.core_orphans {
            issues.extend(self.validate_pattern("core orphan", pattern));
        }
        for (context, list) in [
            ("non-versioned static file", &config.integrity.non_versioned_static),
            ("zero-version allowance", &config.integrity.version_zero_allowed),
            ("writable file", &config.writable),
            ("force-overwrite file", &config.force_overwrite),
            ("never-overwrite file", &config.never_overwrite),
        ] {
            issues.extend(self.check_path_list(context, list));
        }

        for redirection in &config.redirections {
            if redirection.folder.trim().is_empty() || redirection.installer_dir.trim().is_empty() {
                issues.push("A folder redirection needs both a folder and an installer directory".to_string());
            }
        }

        issues.extend(self.check_features(config));
        issues.extend(self.check_cabinets(config));

        Ok(issues)
    }

    fn validate_pattern(&self, context: &str, pattern: &str) -> Vec<String> {
        if pattern.is_empty() {
            return vec![format!("Empty {context} pattern")];
        }
        match PathPattern::new(pattern, false) {
            Ok(_) => Vec::new(),
            Err(e) => vec![format!("Invalid {context} pattern: {e}")],
        }
    }
}
