use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Placeholder substituted for the build configuration folder in library paths.
pub const CONFIG_PLACEHOLDER: &str = "${config}";

/// Directory id of the installation root.
pub const INSTALL_DIR: &str = "INSTALLDIR";

const MAX_ID_LEN: usize = 56;

/// The source tree a file was harvested from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOrigin {
    Built,
    Static,
    Variant(String),
}

/// One file considered for the installer.
///
/// Two records describe the same file exactly when their `library_path`
/// (the relative source path with the build configuration parameterized)
/// is equal. Name equality is only used to detect cross-tree duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    /// Path relative to the project root, as found on disk.
    pub relative_source_path: String,
    /// `relative_source_path` with the build configuration replaced by `${config}`.
    pub library_path: String,
    /// Path relative to the installation root.
    pub target_path: String,
    pub origin: FileOrigin,
    pub size: u64,
    /// RFC 3339 timestamp of the last write.
    pub last_write: String,
    pub file_version: String,
    pub content_hash: String,
    pub comment: String,
    pub reason_for_removal: String,
    pub component_guid: Option<String>,
    pub patch_group: Option<u32>,
    pub disk_id: u32,
    pub directory_id: String,
    pub features: Vec<String>,
    pub only_in_unused_features: bool,
    pub used_in_component: bool,
    pub used_in_feature_ref: bool,
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.library_path == other.library_path
    }
}

impl Eq for FileRecord {}

impl FileRecord {
    pub fn new(relative_source_path: &str, roots: &SourceRoots, origin: FileOrigin) -> Self {
        let relative_source_path = normalize_relative(relative_source_path);
        let library_path = roots.parameterize(&relative_source_path);
        let name = file_name_of(&relative_source_path).to_string();
        Self {
            id: make_id(&name, &library_path),
            target_path: roots.target_path(&relative_source_path),
            name,
            relative_source_path,
            library_path,
            origin,
            size: 0,
            last_write: String::new(),
            file_version: String::new(),
            content_hash: String::new(),
            comment: String::new(),
            reason_for_removal: String::new(),
            component_guid: None,
            patch_group: None,
            disk_id: 0,
            directory_id: String::new(),
            features: Vec::new(),
            only_in_unused_features: false,
            used_in_component: false,
            used_in_feature_ref: false,
        }
    }

    /// Case-insensitive file name comparison used for duplicate detection.
    pub fn name_matches(&self, other: &FileRecord) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }

    /// Adds a feature once; returns false if it was already present.
    pub fn add_feature(&mut self, feature: &str) -> bool {
        if self.has_feature(feature) {
            return false;
        }
        self.features.push(feature.to_string());
        true
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn append_comment(&mut self, text: &str) {
        if !self.comment.is_empty() {
            self.comment.push(' ');
        }
        self.comment.push_str(text);
    }

    /// Files with no feature, or only undeclared ones, never reach the emitter.
    pub fn is_emittable(&self) -> bool {
        !self.features.is_empty() && !self.only_in_unused_features
    }
}

/// File records keyed by library path.
pub type FileSet = BTreeMap<String, FileRecord>;

/// The configured source roots, all relative to the project root.
#[derive(Debug, Clone)]
pub struct SourceRoots {
    pub built: String,
    pub static_files: String,
    pub variants: Vec<(String, String)>,
    pub build_config: String,
}

impl SourceRoots {
    pub fn new(built: &str, static_files: &str, build_config: &str) -> Self {
        Self {
            built: normalize_relative(built),
            static_files: normalize_relative(static_files),
            variants: Vec::new(),
            build_config: build_config.to_string(),
        }
    }

    pub fn with_variant(mut self, name: &str, path: &str) -> Self {
        self.variants.push((name.to_string(), normalize_relative(path)));
        self
    }

    /// Replaces the build configuration folder with the `${config}` placeholder.
    pub fn parameterize(&self, relative: &str) -> String {
        if self.build_config.is_empty() {
            return relative.to_string();
        }
        let segment = format!("\\{}\\", self.build_config);
        let placeholder = format!("\\{CONFIG_PLACEHOLDER}\\");
        relative.replace(&segment, &placeholder)
    }

    /// Inverse of `parameterize`.
    pub fn resolve(&self, library_path: &str) -> String {
        let placeholder = format!("\\{CONFIG_PLACEHOLDER}\\");
        let segment = format!("\\{}\\", self.build_config);
        library_path.replace(&placeholder, &segment)
    }

    /// Strips the owning source root from a relative source path.
    pub fn target_path(&self, relative: &str) -> String {
        let mut roots: Vec<&str> = vec![self.built.as_str(), self.static_files.as_str()];
        roots.extend(self.variants.iter().map(|(_, path)| path.as_str()));
        // Longest root first so nested roots are stripped correctly.
        roots.sort_by_key(|root| std::cmp::Reverse(root.len()));

        for root in roots {
            if root.is_empty() {
                continue;
            }
            if let Some(rest) = strip_prefix_ignore_case(relative, root)
                && (rest.is_empty() || rest.starts_with('\\'))
            {
                return rest.trim_start_matches('\\').to_string();
            }
        }
        relative.trim_start_matches('\\').to_string()
    }
}

/// Case-folded form under which library paths are compared.
pub fn library_key(path: &str) -> String {
    path.to_lowercase()
}

/// Normalizes a relative path to backslash separators without leading or
/// trailing separators.
pub fn normalize_relative(path: &str) -> String {
    let replaced = path.replace('/', "\\");
    let trimmed = replaced.trim_matches('\\');
    let trimmed = trimmed.strip_prefix(".\\").unwrap_or(trimmed);
    trimmed.to_string()
}

/// Joins a backslash-separated relative path onto a filesystem root.
pub fn to_fs_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Expresses `path` relative to `root` with backslash separators.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("\\"))
}

pub fn file_name_of(relative: &str) -> &str {
    relative.rsplit('\\').next().unwrap_or(relative)
}

pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Derives an installer identifier from a display name plus data that makes it unique.
///
/// Characters outside `[A-Za-z0-9_.]` become `_`, the id always starts with a
/// letter or underscore, and the uppercase MD5 of `unique_data` is appended
/// after a dot. The name part is truncated so the whole id fits in 56 characters.
pub fn make_id(name: &str, unique_data: &str) -> String {
    let mut id: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        id.insert(0, '_');
    }

    let hash = hex::encode_upper(md5::compute(unique_data.as_bytes()).0);
    let max_main = MAX_ID_LEN - hash.len() - 1;
    id.truncate(max_main);

    format!("{id}.{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> SourceRoots {
        SourceRoots::new("Output/Release", "DistFiles", "Release")
    }

    #[test]
    fn test_parameterize_round_trip() {
        let roots = roots();
        let lib = roots.parameterize("Output\\Release\\foo.dll");
        assert_eq!(lib, "Output\\${config}\\foo.dll");
        assert_eq!(roots.resolve(&lib), "Output\\Release\\foo.dll");
        assert_eq!(roots.parameterize("DistFiles\\foo.dll"), "DistFiles\\foo.dll");
    }

    #[test]
    fn test_target_path_strips_owning_root() {
        let roots = roots().with_variant("TE", "Output/TeOnly");
        assert_eq!(roots.target_path("Output\\Release\\Sub\\bar.dll"), "Sub\\bar.dll");
        assert_eq!(roots.target_path("distfiles\\Fonts\\a.ttf"), "Fonts\\a.ttf");
        assert_eq!(roots.target_path("Output\\TeOnly\\te.dll"), "te.dll");
        assert_eq!(roots.target_path("DistFilesExtra\\x.txt"), "DistFilesExtra\\x.txt");
    }

    #[test]
    fn test_make_id_sanitizes_and_limits_length() {
        let id = make_id("my-file name.dll", "DistFiles\\my-file name.dll");
        assert!(id.starts_with("my_file_name.dll."));
        assert_eq!(id.len(), "my_file_name.dll.".len() + 32);

        let numeric = make_id("7zip.exe", "x");
        assert!(numeric.starts_with("_7zip.exe."));

        let long = make_id(&"a".repeat(100), "x");
        assert_eq!(long.len(), 56);
    }

    #[test]
    fn test_make_id_is_stable_for_same_input() {
        assert_eq!(make_id("a.dll", "p"), make_id("a.dll", "p"));
        assert_ne!(make_id("a.dll", "p"), make_id("a.dll", "q"));
    }

    #[test]
    fn test_records_equal_by_library_path() {
        let roots = roots();
        let a = FileRecord::new("Output\\Release\\a.dll", &roots, FileOrigin::Built);
        let mut b = FileRecord::new("Output/Release/a.dll", &roots, FileOrigin::Static);
        b.size = 99;
        assert_eq!(a, b);
        assert_eq!(a.target_path, "a.dll");
    }

    #[test]
    fn test_add_feature_deduplicates() {
        let mut rec = FileRecord::new("DistFiles\\a.txt", &roots(), FileOrigin::Static);
        assert!(rec.add_feature("Core"));
        assert!(!rec.add_feature("Core"));
        assert_eq!(rec.features, vec!["Core"]);
        assert!(rec.is_emittable());
    }
}
