use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::builders::classifier::{Classification, FeatureClassifier, VariantEvidence};
use crate::builders::emission::EmissionPlan;
use crate::builders::importer::FragmentImporter;
use crate::builders::merge::merge_file_sets;
use crate::builders::reporter::{IssueKind, Report};
use crate::builders::storage::{LibraryDocument, LibraryStore};
use crate::builders::verifier::IntegrityVerifier;
use crate::core::config::{ConfigManager, InstallerConfig};
use crate::core::git::{Git2Client, GitClient};
use crate::core::library::{FileLibrarySynchronizer, SyncOutcome, report_file_changes};
use crate::core::model::{FileOrigin, FileRecord, FileSet, relative_to, to_fs_path};
use crate::core::walker::{DirectoryNode, WalkResult, Walker};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Put built files without feature evidence into the catch-all feature.
    pub add_orphans: bool,
    /// Include the general section when the report is rendered.
    pub include_general: bool,
    /// Run the integrity verifier after generation.
    pub test_integrity: bool,
    /// Leave the addenda and the emission plan untouched.
    pub dry_run: bool,
}

/// Everything one generator run needs, checked up front.
#[derive(Debug)]
pub struct RunContext {
    config: InstallerConfig,
    project_root: PathBuf,
    installer_dir: PathBuf,
    options: RunOptions,
}

impl RunContext {
    /// Fails when the built or static source root does not exist.
    pub fn new(
        config: InstallerConfig,
        project_root: PathBuf,
        installer_dir: PathBuf,
        options: RunOptions,
    ) -> Result<Self> {
        for (label, root) in [
            ("built files", &config.sources.built),
            ("static files", &config.sources.static_files),
        ] {
            let path = to_fs_path(&project_root, root);
            if !path.is_dir() {
                bail!("The {label} folder {} does not exist", path.display());
            }
        }

        Ok(Self {
            config,
            project_root,
            installer_dir,
            options,
        })
    }

    /// Builds a context from a validated configuration file.
    pub fn from_manager(manager: &ConfigManager, options: RunOptions) -> Result<Self> {
        let config = manager.load_validated()?;
        let project_root = manager.project_root(&config);
        Self::new(config, project_root, manager.get_installer_dir().to_path_buf(), options)
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn installer_file(&self, name: &str) -> PathBuf {
        self.installer_dir.join(name)
    }
}

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Every file that survived omission and merging, classified and synchronized.
    pub files: FileSet,
    pub omitted: Vec<FileRecord>,
    pub classification: Classification,
    pub plan: EmissionPlan,
    pub addenda: LibraryDocument,
    pub report: Report,
}

/// Runs the whole pipeline once: walk, filter, merge, classify,
/// synchronize, plan and optionally verify.
pub struct Generator {
    ctx: RunContext,
    store: Box<dyn LibraryStore>,
}

impl Generator {
    pub fn new(ctx: RunContext, store: Box<dyn LibraryStore>) -> Self {
        Self { ctx, store }
    }

    /// Consumes the generator, so a context drives exactly one run.
    pub fn run(self) -> Result<RunOutcome> {
        let Generator { ctx, mut store } = self;
        let RunContext {
            config,
            project_root,
            installer_dir,
            options,
        } = ctx;
        let mut report = Report::new();

        let library = store.load_library().context("Failed to load the file library")?;
        let previous_addenda = store.load_addenda().context("Failed to load the pending addenda")?;
        log::info!(
            "Loaded file library with {} entries{}",
            library.len(),
            if previous_addenda.is_some() { " and pending addenda" } else { "" }
        );

        let manual = FragmentImporter::new()?
            .import_all(&installer_dir, &config.sources.manual_fragments)?;
        let mut omissions = config.omission_filter()?;
        manual
            .add_omissions(&mut omissions)
            .context("Invalid file source in an installer fragment")?;

        // Walks
        let roots = config.source_roots();
        let walker = Walker::new(&project_root, &config);
        let (built, static_files) = rayon::join(
            || walker.walk(&roots.built, FileOrigin::Built),
            || walker.walk(&roots.static_files, FileOrigin::Static),
        );
        let variant_walks: Vec<(String, WalkResult)> = roots
            .variants
            .par_iter()
            .map(|(name, path)| (name.clone(), walker.walk(path, FileOrigin::Variant(name.clone()))))
            .collect();

        for walk in std::iter::once(&built)
            .chain(std::iter::once(&static_files))
            .chain(variant_walks.iter().map(|(_, w)| w))
        {
            for path in &walk.skipped {
                let shown = relative_to(&project_root, path).unwrap_or_else(|| path.display().to_string());
                report.add_issue(IssueKind::FileSkipped, Some(shown.as_str()), "could not be read");
            }
        }

        let evidence: Vec<VariantEvidence> = variant_walks
            .iter()
            .map(|(name, walk)| VariantEvidence::new(name, &walk.files))
            .collect();

        let mut tree = DirectoryNode::root();
        let WalkResult { files: mut built_files, tree: built_tree, .. } = built;
        let WalkResult { files: mut static_set, tree: static_tree, .. } = static_files;
        tree.merge(built_tree);
        tree.merge(static_tree);

        // Files found only in a variant build ship with that variant.
        let mut known_targets: HashSet<String> = built_files
            .values()
            .chain(static_set.values())
            .map(|r| r.target_path.to_lowercase())
            .collect();
        let mut variant_only = FileSet::new();
        for (_, walk) in variant_walks {
            for (key, record) in walk.files {
                if known_targets.insert(record.target_path.to_lowercase()) {
                    variant_only.insert(key, record);
                }
            }
            tree.merge(walk.tree);
        }

        let mut omitted = omissions.apply(&mut built_files);
        omitted.extend(omissions.apply(&mut static_set));
        omitted.extend(omissions.apply(&mut variant_only));
        report.add_general(format!("Omitted {} files.", omitted.len()));

        let merge = merge_file_sets(built_files, static_set, &mut report);
        let mut files = merge.merged;
        files.extend(variant_only);
        tree.retain_files(&files);
        tree.assign_directory_ids(&mut files);
        log::debug!("Directory tree holds {} files", tree.file_count());

        let classifier = FeatureClassifier::new(&config)?;
        let classification = classifier.classify(
            &mut files,
            &evidence,
            options.add_orphans || config.features.add_orphans,
            &mut report,
        );

        let mut synchronizer = FileLibrarySynchronizer::new(&library, previous_addenda.as_ref())?;
        log::debug!("New files go into patch group {}", synchronizer.next_patch_group());
        let (mut reused, mut carried, mut minted) = (0usize, 0usize, 0usize);
        for record in files.values_mut().filter(|r| r.is_emittable()) {
            match synchronizer.synchronize(record) {
                SyncOutcome::Reused => reused += 1,
                SyncOutcome::Carried => carried += 1,
                SyncOutcome::Minted => minted += 1,
            }
        }
        log::info!("Synchronized: {reused} known, {carried} pending, {minted} new");

        let plan = EmissionPlan::build(&mut files, &tree, &config)?;

        let verifier = IntegrityVerifier::new(&config, &project_root)?;
        verifier.check_similar_files(&files, &omitted, &mut report);

        let addenda = synchronizer.into_addenda();
        report_file_changes(&addenda, previous_addenda.as_ref(), &mut report);

        if options.dry_run {
            log::info!("Dry run: addenda and emission plan not written");
        } else {
            if addenda.is_empty() {
                store.remove_addenda()?;
            } else {
                store.save_addenda(&addenda)?;
            }
            plan.save(&installer_dir.join(&config.library.plan))?;
        }

        if options.test_integrity {
            let mut definitions = plan.definitions();
            definitions.extend(manual.definitions);
            let git = match Git2Client::discover(&project_root) {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("{e:#}");
                    None
                }
            };
            verifier.verify(
                &library,
                &files,
                &definitions,
                &omissions,
                git.as_ref().map(|g| g as &dyn GitClient),
                &mut report,
            );
        }

        Ok(RunOutcome {
            files,
            omitted,
            classification,
            plan,
            addenda,
            report,
        })
    }
}
