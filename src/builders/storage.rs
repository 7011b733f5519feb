use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::model::library_key;

/// One row of the file library.
///
/// `component_guid` is bound to `path` for good: installer patches match
/// files across releases by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryEntry {
    /// Library path (relative source path with the build configuration parameterized).
    pub path: String,
    pub component_guid: String,
    pub component_id: String,
    pub name: String,
    pub directory_id: String,
    #[serde(default)]
    pub feature_list: Vec<String>,
    /// RFC 3339 timestamp at the last sync.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub patch_group: u32,
}

/// The ledger, or a pending addenda document, which has the same shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryDocument {
    #[serde(default)]
    pub files: Vec<LibraryEntry>,
}

impl LibraryDocument {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Case-insensitive lookup by library path.
    pub fn find(&self, path: &str) -> Option<&LibraryEntry> {
        let key = library_key(path);
        self.files.iter().find(|e| library_key(&e.path) == key)
    }

    pub fn max_patch_group(&self) -> u32 {
        self.files.iter().map(|e| e.patch_group).max().unwrap_or(0)
    }
}

/// Durable storage for the ledger and its pending addenda.
pub trait LibraryStore {
    /// Loads the ledger. A ledger that does not exist yet is empty.
    fn load_library(&self) -> Result<LibraryDocument>;
    fn save_library(&mut self, library: &LibraryDocument) -> Result<()>;
    /// Loads the pending addenda, if there is one.
    fn load_addenda(&self) -> Result<Option<LibraryDocument>>;
    fn save_addenda(&mut self, addenda: &LibraryDocument) -> Result<()>;
    fn remove_addenda(&mut self) -> Result<()>;
}

/// JSON documents on disk.
pub struct JsonFileStore {
    library_path: PathBuf,
    addenda_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(library_path: PathBuf, addenda_path: PathBuf) -> Self {
        Self {
            library_path,
            addenda_path,
        }
    }

    fn read(path: &Path) -> Result<Option<LibraryDocument>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let document = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(document))
    }

    fn write(path: &Path, document: &LibraryDocument) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(document).context("Failed to serialize library document")?;
        fs::write(path, serialized).with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl LibraryStore for JsonFileStore {
    fn load_library(&self) -> Result<LibraryDocument> {
        Ok(Self::read(&self.library_path)?.unwrap_or_default())
    }

    fn save_library(&mut self, library: &LibraryDocument) -> Result<()> {
        Self::write(&self.library_path, library)
    }

    fn load_addenda(&self) -> Result<Option<LibraryDocument>> {
        Self::read(&self.addenda_path)
    }

    fn save_addenda(&mut self, addenda: &LibraryDocument) -> Result<()> {
        Self::write(&self.addenda_path, addenda)
    }

    fn remove_addenda(&mut self) -> Result<()> {
        if self.addenda_path.exists() {
            fs::remove_file(&self.addenda_path).context("Failed to remove addenda file")?;
        }
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub library: LibraryDocument,
    pub addenda: Option<LibraryDocument>,
}

impl MemoryStore {
    pub fn new(library: LibraryDocument) -> Self {
        Self {
            library,
            addenda: None,
        }
    }
}

impl LibraryStore for MemoryStore {
    fn load_library(&self) -> Result<LibraryDocument> {
        Ok(self.library.clone())
    }

    fn save_library(&mut self, library: &LibraryDocument) -> Result<()> {
        self.library = library.clone();
        Ok(())
    }

    fn load_addenda(&self) -> Result<Option<LibraryDocument>> {
        Ok(self.addenda.clone())
    }

    fn save_addenda(&mut self, addenda: &LibraryDocument) -> Result<()> {
        self.addenda = Some(addenda.clone());
        Ok(())
    }

    fn remove_addenda(&mut self) -> Result<()> {
        self.addenda = None;
        Ok(())
    }
}
