use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::core::config::{InstallerConfig, Redirection};
use crate::core::model::{
    FileOrigin, FileRecord, FileSet, INSTALL_DIR, SourceRoots, make_id, relative_to, to_fs_path,
};
use crate::core::version;

/// Version-control metadata folders that are never harvested.
const VCS_DIRS: &[&str] = &[".svn", ".git"];

/// A node of the installer's target directory tree.
///
/// Sibling nodes have case-insensitively unique target paths; walks of
/// different source roots that land on the same target path share a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub target_path: String,
    pub directory_id: String,
    /// The subtree is installed into a different installer directory.
    pub is_redirected: bool,
    /// Emitted as a reference to a directory defined elsewhere.
    pub is_reference: bool,
    pub children: Vec<DirectoryNode>,
    /// Library paths of the files installed directly into this node.
    pub files: Vec<String>,
}

impl DirectoryNode {
    pub fn root() -> Self {
        Self {
            name: INSTALL_DIR.to_string(),
            target_path: String::new(),
            directory_id: INSTALL_DIR.to_string(),
            is_redirected: false,
            is_reference: true,
            children: Vec::new(),
            files: Vec::new(),
        }
    }

    fn child(name: &str, target_path: &str, redirection: Option<&Redirection>) -> Self {
        match redirection {
            Some(r) => Self {
                name: r.installer_dir.clone(),
                target_path: target_path.to_string(),
                directory_id: r.installer_dir.clone(),
                is_redirected: true,
                is_reference: true,
                children: Vec::new(),
                files: Vec::new(),
            },
            None => Self {
                name: name.to_string(),
                target_path: target_path.to_string(),
                directory_id: make_id(name, target_path),
                is_redirected: false,
                is_reference: false,
                children: Vec::new(),
                files: Vec::new(),
            },
        }
    }

    /// Returns the child with `target_path`, creating it if needed.
    fn child_mut(
        &mut self,
        name: &str,
        target_path: &str,
        redirection: Option<&Redirection>,
    ) -> &mut DirectoryNode {
        let position = self
            .children
            .iter()
            .position(|c| c.target_path.eq_ignore_ascii_case(target_path));
        let index = match position {
            Some(index) => index,
            None => {
                self.children.push(Self::child(name, target_path, redirection));
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    /// Folds another tree into this one, reusing nodes with equal target paths.
    pub fn merge(&mut self, other: DirectoryNode) {
        for file in other.files {
            if !self.files.contains(&file) {
                self.files.push(file);
            }
        }
        self.is_redirected |= other.is_redirected;

        for child in other.children {
            match self
                .children
                .iter_mut()
                .find(|c| c.target_path.eq_ignore_ascii_case(&child.target_path))
            {
                Some(existing) => existing.merge(child),
                None => self.children.push(child),
            }
        }
    }

    /// Points every file held by the tree at the node that holds it.
    ///
    /// Run after merging, so records walked from different roots agree on
    /// the id of a shared folder.
    pub fn assign_directory_ids(&self, files: &mut FileSet) {
        for key in &self.files {
            if let Some(record) = files.get_mut(key) {
                record.directory_id = self.directory_id.clone();
            }
        }
        for child in &self.children {
            child.assign_directory_ids(files);
        }
    }

    /// Drops file references that are no longer in `files`.
    pub fn retain_files(&mut self, files: &FileSet) {
        self.files.retain(|key| files.contains_key(key));
        for child in &mut self.children {
            child.retain_files(files);
        }
    }

    /// True if this node or any descendant holds a file that will be emitted.
    pub fn contains_used_files(&self, files: &FileSet) -> bool {
        self.files
            .iter()
            .filter_map(|key| files.get(key))
            .any(FileRecord::is_emittable)
            || self.children.iter().any(|c| c.contains_used_files(files))
    }

    pub fn file_count(&self) -> usize {
        self.files.len() + self.children.iter().map(DirectoryNode::file_count).sum::<usize>()
    }
}

/// Everything a single root walk produced.
#[derive(Debug)]
pub struct WalkResult {
    pub files: FileSet,
    pub tree: DirectoryNode,
    /// Paths that were enumerated but could not be read.
    pub skipped: Vec<PathBuf>,
}

impl WalkResult {
    fn empty() -> Self {
        Self {
            files: FileSet::new(),
            tree: DirectoryNode::root(),
            skipped: Vec::new(),
        }
    }
}

/// Harvests source roots into file records and a local directory tree.
pub struct Walker<'a> {
    project_root: &'a Path,
    config: &'a InstallerConfig,
    roots: SourceRoots,
}

impl<'a> Walker<'a> {
    pub fn new(project_root: &'a Path, config: &'a InstallerConfig) -> Self {
        Self {
            project_root,
            config,
            roots: config.source_roots(),
        }
    }

    /// Walks one source root, given relative to the project root.
    ///
    /// A missing root yields an empty result. Files are hashed in parallel;
    /// the directory tree is then built sequentially in path order so the
    /// result does not depend on thread scheduling.
    pub fn walk(&self, source_root: &str, origin: FileOrigin) -> WalkResult {
        let fs_root = to_fs_path(self.project_root, source_root);
        if !fs_root.is_dir() {
            log::info!("Source root {} does not exist, skipping", fs_root.display());
            return WalkResult::empty();
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&fs_root)
            .into_iter()
            .filter_entry(|e| !is_vcs_dir(e))
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .collect();
        paths.sort();

        let results: Vec<(PathBuf, Result<FileRecord>)> = paths
            .into_par_iter()
            .map(|path| {
                let record = self.read_record(&path, &origin);
                (path, record)
            })
            .collect();

        let mut result = WalkResult::empty();
        for (path, record) in results {
            match record {
                Ok(record) => self.insert(&mut result, record),
                Err(e) => {
                    log::warn!("Skipping {}: {e:#}", path.display());
                    result.skipped.push(path);
                }
            }
        }

        log::debug!(
            "Walked {}: {} files, {} skipped",
            source_root,
            result.files.len(),
            result.skipped.len()
        );
        result
    }

    fn read_record(&self, path: &Path, origin: &FileOrigin) -> Result<FileRecord> {
        let relative = relative_to(self.project_root, path)
            .with_context(|| format!("{} is outside the project root", path.display()))?;
        let mut record = FileRecord::new(&relative, &self.roots, origin.clone());

        let metadata = std::fs::metadata(path).context("Failed to read file metadata")?;
        record.size = metadata.len();
        let modified: DateTime<Utc> = metadata
            .modified()
            .context("Failed to read modification time")?
            .into();
        record.last_write = modified.to_rfc3339_opts(SecondsFormat::Secs, true);
        record.content_hash = hash_file(path)?;
        record.file_version = version::read_file_version(path)?;

        Ok(record)
    }

    /// Places a record into the local tree, creating directory nodes along
    /// its target path.
    fn insert(&self, result: &mut WalkResult, mut record: FileRecord) {
        let target_dirs: Vec<&str> = record
            .target_path
            .split('\\')
            .filter(|part| !part.is_empty())
            .collect();
        let dir_parts = &target_dirs[..target_dirs.len().saturating_sub(1)];

        // Source folder of each directory level, for redirection lookups.
        let source_prefix = record
            .relative_source_path
            .strip_suffix(&record.target_path)
            .unwrap_or("")
            .trim_end_matches('\\')
            .to_string();

        let mut node = &mut result.tree;
        let mut target_path = String::new();
        let mut source_folder = source_prefix;
        for part in dir_parts {
            if !target_path.is_empty() {
                target_path.push('\\');
            }
            target_path.push_str(part);
            if !source_folder.is_empty() {
                source_folder.push('\\');
            }
            source_folder.push_str(part);

            let redirection = self.config.redirection_for(&source_folder);
            node = node.child_mut(part, &target_path, redirection);
        }

        record.directory_id = node.directory_id.clone();
        node.files.push(record.library_path.clone());
        result.files.insert(record.library_path.clone(), record);
    }
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_DIRS.contains(&name))
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let count = reader.read(&mut buffer).context("Failed to read file")?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = to_fs_path(root, rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn find<'t>(node: &'t DirectoryNode, target_path: &str) -> Option<&'t DirectoryNode> {
        if node.target_path.eq_ignore_ascii_case(target_path) {
            return Some(node);
        }
        node.children.iter().find_map(|c| find(c, target_path))
    }

    fn roots() -> SourceRoots {
        SourceRoots::new("Output\\Release", "DistFiles", "Release")
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let config = InstallerConfig::default();
        let walker = Walker::new(dir.path(), &config);
        let result = walker.walk("DistFiles", FileOrigin::Static);
        assert!(result.files.is_empty());
        assert_eq!(result.tree.file_count(), 0);
    }

    #[test]
    fn test_walk_builds_records_and_tree() {
        let dir = tempdir().unwrap();
        write(dir.path(), "DistFiles\\readme.txt", "hello");
        write(dir.path(), "DistFiles\\Templates\\a.xml", "<a/>");
        write(dir.path(), "DistFiles\\.svn\\entries", "junk");
        write(dir.path(), "DistFiles\\Templates\\.git\\HEAD", "junk");

        let config = InstallerConfig::default();
        let walker = Walker::new(dir.path(), &config);
        let result = walker.walk("DistFiles", FileOrigin::Static);

        assert_eq!(result.files.len(), 2);
        let readme = &result.files["DistFiles\\readme.txt"];
        assert_eq!(readme.size, 5);
        assert_eq!(readme.target_path, "readme.txt");
        assert_eq!(readme.directory_id, INSTALL_DIR);
        assert_eq!(
            readme.content_hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(readme.file_version.is_empty());
        assert!(readme.last_write.ends_with('Z'));

        let template = &result.files["DistFiles\\Templates\\a.xml"];
        let node = find(&result.tree, "Templates").unwrap();
        assert_eq!(node.directory_id, template.directory_id);
        assert_eq!(node.files, vec!["DistFiles\\Templates\\a.xml".to_string()]);
    }

    #[test]
    fn test_redirected_folder() {
        let dir = tempdir().unwrap();
        write(dir.path(), "DistFiles\\Fonts\\a.ttf", "font");
        let mut config = InstallerConfig::default();
        config.redirections.push(Redirection {
            folder: "DistFiles/Fonts".to_string(),
            installer_dir: "FontsFolder".to_string(),
        });
        let walker = Walker::new(dir.path(), &config);
        let result = walker.walk("DistFiles", FileOrigin::Static);

        let node = find(&result.tree, "Fonts").unwrap();
        assert!(node.is_redirected);
        assert_eq!(node.name, "FontsFolder");
        assert_eq!(result.files["DistFiles\\Fonts\\a.ttf"].directory_id, "FontsFolder");
    }

    #[test]
    fn test_trees_from_two_roots_share_nodes() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Output\\Release\\Sub\\a.dll", "a");
        write(dir.path(), "DistFiles\\sub\\b.txt", "b");

        let config = InstallerConfig::default();
        let walker = Walker::new(dir.path(), &config);
        let built = walker.walk("Output\\Release", FileOrigin::Built);
        let statics = walker.walk("DistFiles", FileOrigin::Static);

        let mut files = built.files;
        files.extend(statics.files);
        assert_ne!(
            files["Output\\${config}\\Sub\\a.dll"].directory_id,
            files["DistFiles\\sub\\b.txt"].directory_id
        );

        let mut tree = DirectoryNode::root();
        tree.merge(built.tree);
        tree.merge(statics.tree);

        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].files.len(), 2);
        assert_eq!(tree.file_count(), 2);

        tree.assign_directory_ids(&mut files);
        let shared = &tree.children[0].directory_id;
        assert_eq!(&files["Output\\${config}\\Sub\\a.dll"].directory_id, shared);
        assert_eq!(&files["DistFiles\\sub\\b.txt"].directory_id, shared);
    }

    #[test]
    fn test_contains_used_files() {
        let roots = roots();
        let mut files = FileSet::new();
        let mut rec = FileRecord::new("DistFiles\\Sub\\a.txt", &roots, FileOrigin::Static);
        let mut tree = DirectoryNode::root();
        tree.child_mut("Sub", "Sub", None).files.push(rec.library_path.clone());
        files.insert(rec.library_path.clone(), rec.clone());
        assert!(!tree.contains_used_files(&files));

        rec.add_feature("Core");
        files.insert(rec.library_path.clone(), rec);
        assert!(tree.contains_used_files(&files));

        files.clear();
        tree.retain_files(&files);
        assert_eq!(tree.file_count(), 0);
    }
}
