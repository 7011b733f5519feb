use std::fs;
use std::path::Path;
use tempfile::TempDir;
use wix_file_library::builders::emission::InstallerDefinitions;
use wix_file_library::builders::merge::merge_file_sets;
use wix_file_library::builders::reporter::{IssueKind, Report, Severity};
use wix_file_library::builders::storage::{JsonFileStore, LibraryDocument, LibraryEntry, LibraryStore, MemoryStore};
use wix_file_library::builders::verifier::IntegrityVerifier;
use wix_file_library::core::config::{ConfigManager, InstallerConfig};
use wix_file_library::core::engine::{Generator, RunContext, RunOptions};
use wix_file_library::core::library::{FileLibrarySynchronizer, merge_addenda};
use wix_file_library::core::model::{FileOrigin, FileRecord, FileSet, SourceRoots};
use wix_file_library::core::walker::hash_file;

fn roots() -> SourceRoots {
    SourceRoots::new("Output\\Release", "DistFiles", "Release")
}

fn setup_project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (relative, content) in files {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    fs::create_dir_all(dir.path().join("Installer")).unwrap();
    dir
}

fn ledger_entry(path: &str, guid: &str, group: u32) -> LibraryEntry {
    LibraryEntry {
        path: path.to_string(),
        component_guid: guid.to_string(),
        component_id: "foo.dll.ID".to_string(),
        name: "foo.dll".to_string(),
        directory_id: "INSTALLDIR".to_string(),
        feature_list: vec!["Core".to_string()],
        date: String::new(),
        version: String::new(),
        size: 0,
        hash: String::new(),
        patch_group: group,
    }
}

fn single(record: FileRecord) -> FileSet {
    let mut set = FileSet::new();
    set.insert(record.library_path.clone(), record);
    set
}

#[test]
fn test_unchanged_file_reuses_its_ledger_identity() {
    let td = setup_project(&[("DistFiles/foo.dll", "foo contents")]);
    let root = td.path();

    let mut entry = ledger_entry("DistFiles\\foo.dll", "G1", 3);
    entry.hash = hash_file(&root.join("DistFiles").join("foo.dll")).unwrap();
    let store = MemoryStore::new(LibraryDocument { files: vec![entry] });

    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };
    let ctx = RunContext::new(
        InstallerConfig::default(),
        root.to_path_buf(),
        root.join("Installer"),
        options,
    )
    .unwrap();
    let outcome = Generator::new(ctx, Box::new(store)).run().unwrap();

    let foo = &outcome.files["DistFiles\\foo.dll"];
    assert_eq!(foo.component_guid.as_deref(), Some("G1"));
    assert_eq!(foo.patch_group, Some(3));
    assert!(outcome.addenda.is_empty());
}

#[test]
fn test_content_change_with_same_version_is_an_error() {
    let config = InstallerConfig::default();
    let verifier = IntegrityVerifier::new(&config, Path::new(".")).unwrap();

    let mut entry = ledger_entry("DistFiles\\foo.dll", "G1", 3);
    entry.version = "2.1.0.7".to_string();
    entry.hash = "0123".to_string();

    let mut current = FileRecord::new("DistFiles\\foo.dll", &roots(), FileOrigin::Static);
    current.add_feature("Core");
    current.file_version = "2.1.0.7".to_string();
    current.content_hash = "4567".to_string();
    current.component_guid = Some("G1".to_string());

    let mut report = Report::new();
    verifier.check_entry(&entry, Some(&current), &InstallerDefinitions::default(), &mut report);

    let errors: Vec<_> = report
        .issues_of(Severity::Error)
        .filter(|i| i.kind == IssueKind::ContentChangedWithoutVersion)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].path.as_deref().unwrap().ends_with("foo.dll"));
}

#[test]
fn test_deeper_duplicate_wins_regardless_of_order() {
    let shallow = || {
        let mut rec = FileRecord::new("Output\\Release\\bar.dll", &roots(), FileOrigin::Built);
        rec.content_hash = "same".to_string();
        rec
    };
    let deep = || {
        let mut rec = FileRecord::new("DistFiles\\Sub\\bar.dll", &roots(), FileOrigin::Static);
        rec.content_hash = "same".to_string();
        rec
    };

    for (preferred, other) in [(single(shallow()), single(deep())), (single(deep()), single(shallow()))] {
        let mut report = Report::new();
        let outcome = merge_file_sets(preferred, other, &mut report);

        assert_eq!(outcome.merged.len(), 1);
        let kept = &outcome.merged["DistFiles\\Sub\\bar.dll"];
        assert!(kept.comment.contains("Output\\Release\\bar.dll"));
        assert!(outcome.rejected.contains_key("Output\\${config}\\bar.dll"));
    }
}

#[test]
fn test_new_files_share_one_patch_group() {
    let library = LibraryDocument {
        files: vec![
            ledger_entry("DistFiles\\a.txt", "A", 2),
            ledger_entry("DistFiles\\b.txt", "B", 9),
            ledger_entry("DistFiles\\c.txt", "C", 4),
        ],
    };
    let mut sync = FileLibrarySynchronizer::new(&library, None).unwrap();

    let mut groups = Vec::new();
    for path in ["DistFiles\\x.txt", "DistFiles\\y.txt", "Output\\Release\\z.dll"] {
        let mut rec = FileRecord::new(path, &roots(), FileOrigin::Static);
        rec.add_feature("Core");
        sync.synchronize(&mut rec);
        groups.push(rec.patch_group);
    }
    assert_eq!(groups, vec![Some(10); 3]);

    let addenda = sync.into_addenda();
    assert_eq!(addenda.files[0].path, "Output\\${config}\\z.dll");
}

#[test]
fn test_generate_merge_and_regenerate() {
    let td = setup_project(&[
        ("Output/Release/App.exe", "app"),
        ("DistFiles/readme.txt", "read me"),
    ]);
    let installer = td.path().join("Installer");
    let config_manager = ConfigManager::new_at(installer.clone());
    config_manager.initialize().unwrap();

    let open_store = || {
        JsonFileStore::new(
            installer.join("FileLibrary.json"),
            installer.join("FileLibraryAddenda.json"),
        )
    };

    // 1. First run: everything is new and lands in the addenda file
    let ctx = RunContext::from_manager(&config_manager, RunOptions::default()).unwrap();
    let first = Generator::new(ctx, Box::new(open_store())).run().unwrap();
    assert_eq!(first.addenda.len(), 2);
    assert!(installer.join("FileLibraryAddenda.json").exists());
    assert!(installer.join("AutoFiles.plan.json").exists());

    // 2. Merge the reviewed addenda into the library
    let mut store = open_store();
    let addenda = store.load_addenda().unwrap().unwrap();
    let project_root = td.path().canonicalize().unwrap();
    let (merged, added) =
        merge_addenda(&store.load_library().unwrap(), &addenda, &project_root, &roots()).unwrap();
    assert_eq!(added, 2);
    assert!(merged.files.iter().all(|e| !e.hash.is_empty()));
    store.save_library(&merged).unwrap();
    store.remove_addenda().unwrap();

    // 3. Second run: nothing new, identities come from the library
    let ctx = RunContext::from_manager(&config_manager, RunOptions::default()).unwrap();
    let second = Generator::new(ctx, Box::new(open_store())).run().unwrap();
    assert!(second.addenda.is_empty());
    assert!(!installer.join("FileLibraryAddenda.json").exists());
    for (key, record) in &first.files {
        assert_eq!(record.component_guid, second.files[key].component_guid);
    }
    assert!(second.report.new_files.is_empty());
}
