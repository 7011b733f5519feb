use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::builders::reporter::Report;
use crate::builders::storage::{LibraryDocument, LibraryEntry};
use crate::core::model::{FileRecord, INSTALL_DIR, SourceRoots, library_key, to_fs_path};
use crate::core::version;
use crate::core::walker::hash_file;

/// What happened to a record during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The ledger already knew the file.
    Reused,
    /// Not in the ledger yet, but recorded by an earlier unmerged run.
    Carried,
    /// A new identity was minted.
    Minted,
}

/// Gives every file a stable component identity from the ledger.
///
/// The ledger is never modified here. New files are collected into an
/// addenda document, most recent first, for a later reviewed merge.
pub struct FileLibrarySynchronizer {
    known: HashMap<String, (String, u32)>,
    pending: HashMap<String, String>,
    next_patch_group: u32,
    addenda: Vec<LibraryEntry>,
}

impl FileLibrarySynchronizer {
    /// Fails when the ledger's highest patch group leaves no room for a new one.
    pub fn new(library: &LibraryDocument, previous_addenda: Option<&LibraryDocument>) -> Result<Self> {
        let next_patch_group = library
            .max_patch_group()
            .checked_add(1)
            .context("The file library has exhausted its patch group numbers")?;
        let known = library
            .files
            .iter()
            .map(|e| (library_key(&e.path), (e.component_guid.clone(), e.patch_group)))
            .collect();
        let pending = previous_addenda
            .map(|doc| {
                doc.files
                    .iter()
                    .map(|e| (library_key(&e.path), e.component_guid.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            known,
            pending,
            next_patch_group,
            addenda: Vec::new(),
        })
    }

    /// Patch group given to every file first seen in this run.
    pub fn next_patch_group(&self) -> u32 {
        self.next_patch_group
    }

    pub fn synchronize(&mut self, record: &mut FileRecord) -> SyncOutcome {
        let key = library_key(&record.library_path);

        if let Some((guid, group)) = self.known.get(&key) {
            record.component_guid = Some(guid.clone());
            record.patch_group = Some(*group);
            return SyncOutcome::Reused;
        }

        let (guid, outcome) = match self.pending.get(&key) {
            Some(guid) => (guid.clone(), SyncOutcome::Carried),
            None => (Uuid::new_v4().to_string().to_uppercase(), SyncOutcome::Minted),
        };
        record.component_guid = Some(guid);
        record.patch_group = Some(self.next_patch_group);
        log::debug!("{:?} identity for {}", outcome, record.library_path);

        self.addenda.insert(0, addendum_for(record, self.next_patch_group));
        outcome
    }

    pub fn into_addenda(self) -> LibraryDocument {
        LibraryDocument {
            files: self.addenda,
        }
    }
}

fn addendum_for(record: &FileRecord, patch_group: u32) -> LibraryEntry {
    LibraryEntry {
        path: record.library_path.clone(),
        component_guid: record.component_guid.clone().unwrap_or_default(),
        component_id: record.id.clone(),
        name: record.name.clone(),
        directory_id: if record.directory_id.is_empty() {
            INSTALL_DIR.to_string()
        } else {
            record.directory_id.clone()
        },
        feature_list: record.features.clone(),
        date: record.last_write.clone(),
        version: record.file_version.clone(),
        size: record.size,
        hash: record.content_hash.clone(),
        patch_group,
    }
}

/// Lists files that appeared in or disappeared from the addenda since the
/// previous run.
pub fn report_file_changes(
    addenda: &LibraryDocument,
    previous: Option<&LibraryDocument>,
    report: &mut Report,
) {
    let Some(previous) = previous else {
        for entry in &addenda.files {
            report.add_new_file(&entry.path);
        }
        return;
    };

    let old: HashSet<String> = previous.files.iter().map(|e| library_key(&e.path)).collect();
    let new: HashSet<String> = addenda.files.iter().map(|e| library_key(&e.path)).collect();

    for entry in &addenda.files {
        if !old.contains(&library_key(&entry.path)) {
            report.add_new_file(&entry.path);
        }
    }
    for entry in &previous.files {
        if !new.contains(&library_key(&entry.path)) {
            report.add_deleted_file(&entry.path);
        }
    }
}

/// Folds pending addenda into the ledger.
///
/// Addenda entries go in front of the existing entries in their own order.
/// An addendum whose path is already in the ledger is dropped, so an
/// existing component GUID is never replaced. Afterwards every entry whose
/// file still exists gets a fresh size, date, version and hash snapshot.
///
/// # Returns
/// The merged ledger and the number of entries that were added.
pub fn merge_addenda(
    library: &LibraryDocument,
    addenda: &LibraryDocument,
    project_root: &Path,
    roots: &SourceRoots,
) -> Result<(LibraryDocument, usize)> {
    let mut files: Vec<LibraryEntry> = addenda
        .files
        .iter()
        .filter(|e| library.find(&e.path).is_none())
        .cloned()
        .collect();
    let added = files.len();
    files.extend(library.files.iter().cloned());

    for entry in &mut files {
        refresh_entry(entry, project_root, roots)?;
    }

    Ok((LibraryDocument { files }, added))
}

/// Updates an entry's snapshot from disk. Returns false if the file is gone.
pub fn refresh_entry(entry: &mut LibraryEntry, project_root: &Path, roots: &SourceRoots) -> Result<bool> {
    let path = to_fs_path(project_root, &roots.resolve(&entry.path));
    if !path.is_file() {
        return Ok(false);
    }

    let metadata = std::fs::metadata(&path)
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .context("Failed to read modification time")?
        .into();

    entry.size = metadata.len();
    entry.date = modified.to_rfc3339_opts(SecondsFormat::Secs, true);
    entry.version = version::read_file_version(&path)?;
    entry.hash = hash_file(&path)?;
    Ok(true)
}
