#[cfg(test)]
mod tests {
    use crate::builders::emission::PlannedDirectory;
    use crate::builders::reporter::IssueKind;
    use crate::builders::storage::{LibraryDocument, LibraryEntry, MemoryStore};
    use crate::core::config::{
        CONFIG_FILE_NAME, ConfigManager, ConfigProvider, InstallerConfig, VariantSource,
    };
    use crate::core::engine::{Generator, RunContext, RunOptions, RunOutcome};
    use git2::Repository;
    use std::collections::HashSet;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::{TempDir, tempdir};

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// A project with a build output, a static tree and an installer folder.
    fn setup_project() -> (TempDir, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        write(&root, "Output/Release/App.exe", "app");
        write(&root, "Output/Release/App.pdb", "symbols");
        write(&root, "Output/Release/Plugins/Spell.dll", "spell");
        write(&root, "DistFiles/readme.txt", "read me");
        write(&root, "DistFiles/Templates/blank.xml", "<blank/>");
        let installer = root.join("Installer");
        fs::create_dir_all(&installer).unwrap();
        (dir, root, installer)
    }

    fn run(
        config: InstallerConfig,
        root: &Path,
        installer: &Path,
        store: MemoryStore,
        options: RunOptions,
    ) -> RunOutcome {
        let ctx = RunContext::new(config, root.to_path_buf(), installer.to_path_buf(), options).unwrap();
        Generator::new(ctx, Box::new(store)).run().unwrap()
    }

    fn ledger_entry(path: &str, guid: &str, group: u32) -> LibraryEntry {
        LibraryEntry {
            path: path.to_string(),
            component_guid: guid.to_string(),
            component_id: format!("{guid}.ID"),
            name: path.rsplit('\\').next().unwrap().to_string(),
            directory_id: "INSTALLDIR".to_string(),
            feature_list: vec!["Core".to_string()],
            date: String::new(),
            version: String::new(),
            size: 0,
            hash: String::new(),
            patch_group: group,
        }
    }

    #[test]
    fn test_initialization() {
        let dir = tempdir().unwrap();
        let config_manager = ConfigManager::new_at(dir.path().to_path_buf());
        config_manager.initialize().unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        let config = config_manager.load_validated().unwrap();
        assert_eq!(config.features.catch_all, "Core");
    }

    #[test]
    fn test_run_context_requires_source_roots() {
        let dir = tempdir().unwrap();
        let result = RunContext::new(
            InstallerConfig::default(),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            RunOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_context_from_config_file() {
        let (_dir, root, installer) = setup_project();
        let config_manager = ConfigManager::new_at(installer.clone());
        config_manager.initialize().unwrap();

        let ctx = RunContext::from_manager(&config_manager, RunOptions::default()).unwrap();
        assert_eq!(ctx.project_root(), root.canonicalize().unwrap().as_path());
        assert_eq!(
            ctx.installer_file("FileLibrary.json"),
            installer.join("FileLibrary.json")
        );
    }

    #[test]
    fn test_cold_start_mints_everything_into_group_one() {
        let (_dir, root, installer) = setup_project();
        let outcome = run(
            InstallerConfig::default(),
            &root,
            &installer,
            MemoryStore::default(),
            RunOptions::default(),
        );

        assert_eq!(outcome.files.len(), 4);
        assert_eq!(outcome.omitted.len(), 1);
        assert!(outcome.omitted[0].relative_source_path.ends_with("App.pdb"));

        assert_eq!(outcome.addenda.len(), 4);
        assert!(outcome.addenda.files.iter().all(|e| e.patch_group == 1));
        assert!(outcome.files.values().all(|r| r.has_feature("Core")));
        assert!(outcome.files.values().all(|r| r.used_in_component && r.disk_id == 1));
        assert_eq!(outcome.report.new_files.len(), 4);

        let key = "Output\\${config}\\Plugins\\Spell.dll";
        assert!(outcome.files.contains_key(key));
        assert!(installer.join("AutoFiles.plan.json").exists());
    }

    fn planned_directory_ids(dir: &PlannedDirectory, ids: &mut HashSet<String>) {
        ids.insert(dir.id.clone());
        for child in &dir.children {
            planned_directory_ids(child, ids);
        }
    }

    #[test]
    fn test_folders_differing_in_case_share_one_directory_id() {
        let (_dir, root, installer) = setup_project();
        write(&root, "Output/Release/Sub/a.dll", "a");
        write(&root, "DistFiles/sub/b.txt", "b");

        let outcome = run(
            InstallerConfig::default(),
            &root,
            &installer,
            MemoryStore::default(),
            RunOptions::default(),
        );

        let mut defined = HashSet::new();
        planned_directory_ids(outcome.plan.directories.as_ref().unwrap(), &mut defined);
        for component in &outcome.plan.components {
            assert!(
                defined.contains(&component.directory_id),
                "{} -> {}",
                component.file_name,
                component.directory_id
            );
        }
        for entry in &outcome.addenda.files {
            assert!(defined.contains(&entry.directory_id), "{}", entry.path);
        }

        let a = &outcome.files["Output\\${config}\\Sub\\a.dll"];
        let b = &outcome.files["DistFiles\\sub\\b.txt"];
        assert_eq!(a.directory_id, b.directory_id);
    }

    #[test]
    fn test_known_files_keep_their_identity() {
        let (_dir, root, installer) = setup_project();
        let library = LibraryDocument {
            files: vec![
                ledger_entry("DistFiles\\readme.txt", "G1", 3),
                ledger_entry("DistFiles\\old.txt", "G2", 5),
            ],
        };
        let outcome = run(
            InstallerConfig::default(),
            &root,
            &installer,
            MemoryStore::new(library),
            RunOptions::default(),
        );

        let readme = &outcome.files["DistFiles\\readme.txt"];
        assert_eq!(readme.component_guid.as_deref(), Some("G1"));
        assert_eq!(readme.patch_group, Some(3));

        assert_eq!(outcome.addenda.len(), 3);
        assert!(outcome.addenda.find("DistFiles\\readme.txt").is_none());
        assert!(outcome.addenda.files.iter().all(|e| e.patch_group == 6));
    }

    #[test]
    fn test_repeated_runs_are_idempotent() {
        let (_dir, root, installer) = setup_project();
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let first = run(InstallerConfig::default(), &root, &installer, MemoryStore::default(), options);

        let store = MemoryStore {
            library: LibraryDocument::default(),
            addenda: Some(first.addenda.clone()),
        };
        let second = run(InstallerConfig::default(), &root, &installer, store, options);

        for (key, record) in &first.files {
            assert_eq!(record.component_guid, second.files[key].component_guid);
        }
        assert_eq!(first.addenda, second.addenda);
        assert!(second.report.new_files.is_empty());
        assert!(second.report.deleted_files.is_empty());
        assert!(!installer.join("AutoFiles.plan.json").exists());
    }

    #[test]
    fn test_manual_fragment_files_are_omitted() {
        let (_dir, root, installer) = setup_project();
        write(
            &installer,
            "Manual.wxs",
            r#"<Wix><Fragment>
                 <DirectoryRef Id="INSTALLDIR">
                   <Component Id="Readme" Guid="AAAAAAAA-0000-0000-0000-000000000001">
                     <File Source="..\DistFiles\readme.txt" />
                   </Component>
                 </DirectoryRef>
               </Fragment></Wix>"#,
        );
        let mut config = InstallerConfig::default();
        config.sources.manual_fragments.push("Manual.wxs".to_string());

        let outcome = run(config, &root, &installer, MemoryStore::default(), RunOptions::default());
        assert!(!outcome.files.contains_key("DistFiles\\readme.txt"));
        let manual = outcome
            .omitted
            .iter()
            .find(|r| r.name == "readme.txt")
            .unwrap();
        assert_eq!(
            manual.reason_for_removal,
            "already included in installer source Manual.wxs"
        );
    }

    #[test]
    fn test_variant_evidence_assigns_features() {
        let (_dir, root, installer) = setup_project();
        write(&root, "Output/Editor/Plugins/Spell.dll", "spell");
        write(&root, "Output/Editor/EditorOnly.dll", "editor");

        let mut config = InstallerConfig::default();
        config.features.declared.push("Editor".to_string());
        config.sources.variants.push(VariantSource {
            name: "Editor".to_string(),
            path: "Output\\Editor".to_string(),
        });

        let outcome = run(config, &root, &installer, MemoryStore::default(), RunOptions::default());

        let spell = &outcome.files["Output\\${config}\\Plugins\\Spell.dll"];
        assert_eq!(spell.features, vec!["Editor".to_string()]);
        let editor_only = &outcome.files["Output\\Editor\\EditorOnly.dll"];
        assert_eq!(editor_only.features, vec!["Editor".to_string()]);

        // No variant build ships App.exe, so nothing vouches for it.
        let app = &outcome.files["Output\\${config}\\App.exe"];
        assert!(app.features.is_empty());
        assert!(!app.used_in_component);
        assert!(outcome
            .report
            .mentions(IssueKind::Unreferenced, "Output\\Release\\App.exe"));
    }

    #[test]
    fn test_add_orphans_option() {
        let (_dir, root, installer) = setup_project();
        write(&root, "Output/Editor/EditorOnly.dll", "editor");
        let mut config = InstallerConfig::default();
        config.features.declared.push("Editor".to_string());
        config.sources.variants.push(VariantSource {
            name: "Editor".to_string(),
            path: "Output\\Editor".to_string(),
        });

        let options = RunOptions {
            add_orphans: true,
            ..RunOptions::default()
        };
        let outcome = run(config, &root, &installer, MemoryStore::default(), options);
        let app = &outcome.files["Output\\${config}\\App.exe"];
        assert_eq!(app.features, vec!["Core".to_string()]);
        assert!(app.comment.contains("(orphan)"));
        assert_eq!(outcome.classification.orphans_added.len(), 2);
    }

    #[test]
    fn test_integrity_run_reports_vanished_and_untracked_files() {
        let (_dir, root, installer) = setup_project();
        let repo = Repository::init(&root).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("DistFiles/readme.txt")).unwrap();
        index.write().unwrap();

        let library = LibraryDocument {
            files: vec![
                ledger_entry("DistFiles\\readme.txt", "G1", 1),
                ledger_entry("DistFiles\\gone.txt", "G2", 1),
            ],
        };
        let options = RunOptions {
            test_integrity: true,
            dry_run: true,
            ..RunOptions::default()
        };
        let outcome = run(InstallerConfig::default(), &root, &installer, MemoryStore::new(library), options);
        let report = &outcome.report;

        assert!(report.mentions(IssueKind::ComponentMissing, "DistFiles\\gone.txt"));
        assert!(!report.mentions(IssueKind::ComponentMissing, "DistFiles\\readme.txt"));
        assert!(!report.mentions(IssueKind::FeaturesAdded, "DistFiles\\readme.txt"));
        assert!(report.mentions(
            IssueKind::UnversionedStaticFile,
            "DistFiles\\Templates\\blank.xml"
        ));
        assert!(!report.mentions(IssueKind::UnversionedStaticFile, "DistFiles\\readme.txt"));
        assert!(report.has_errors());
    }

    #[test]
    fn test_config_round_trip_through_manager() {
        let dir = tempdir().unwrap();
        let config_manager = ConfigManager::new_at(dir.path().to_path_buf());
        let mut config = InstallerConfig::default();
        config.build_config = "Debug".to_string();
        config_manager.save_config(&config).unwrap();

        let loaded = config_manager.load_config().unwrap();
        assert_eq!(loaded.build_config, "Debug");
        assert_eq!(loaded.source_roots().build_config, "Debug");
    }
}
