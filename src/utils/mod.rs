use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};

use crate::builders::reporter::{ConsoleReporter, FileReporter, ReportSink};
use crate::builders::storage::{JsonFileStore, LibraryStore};
use crate::core::config::ConfigManager;
use crate::core::engine::{Generator, RunContext, RunOptions};
use crate::core::library;

pub fn initialize_installer() -> Result<()> {
    let config_manager = get_config_manager()?;
    config_manager.initialize()?;
    println!(
        "✓ Initialized installer configuration in {}",
        config_manager.get_installer_dir().display()
    );
    println!("Edit the source roots and features, then run 'wix-file-library validate'");
    Ok(())
}

pub fn validate_config() -> Result<()> {
    get_config_manager()?.validate_config()
}

/// Runs the generator and publishes its report.
///
/// `report_format` is `text` or one of the export formats. A written
/// report takes the format as its extension; a dry run prints exported
/// reports to stdout. With `strict`, a report containing errors fails
/// the command.
pub fn generate(options: RunOptions, strict: bool, report_format: &str) -> Result<()> {
    let config_manager = get_config_manager()?;
    let ctx = RunContext::from_manager(&config_manager, options)?;
    let store = library_store(&config_manager, &ctx);
    let mut report_path = ctx.installer_file(&ctx.config().library.report);
    if report_format != "text" {
        report_path.set_extension(report_format);
    }

    let outcome = Generator::new(ctx, Box::new(store)).run()?;
    ConsoleReporter::new().publish(&outcome.report, options.include_general)?;

    if options.dry_run {
        if report_format != "text" {
            println!("{}", outcome.report.export(report_format)?);
        }
    } else {
        let preamble = format!(
            "Installer file library report, generated {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        FileReporter::new(report_path.clone(), &preamble)
            .with_format(report_format)
            .publish(&outcome.report, options.include_general)?;
        println!(
            "✓ {} components planned, {} new files, report written to {}",
            outcome.plan.components.len(),
            outcome.addenda.len(),
            report_path.display()
        );
    }

    if strict && outcome.report.has_errors() {
        bail!("The report contains errors");
    }
    Ok(())
}

/// A dry run with the integrity verifier. Nothing is written to disk.
pub fn verify(strict: bool, report_format: &str) -> Result<()> {
    generate(
        RunOptions {
            add_orphans: false,
            include_general: false,
            test_integrity: true,
            dry_run: true,
        },
        strict,
        report_format,
    )
}

/// Folds the reviewed addenda into the file library.
pub fn merge_addenda() -> Result<()> {
    let config_manager = get_config_manager()?;
    let ctx = RunContext::from_manager(&config_manager, RunOptions::default())?;
    let mut store = library_store(&config_manager, &ctx);

    let Some(addenda) = store.load_addenda()? else {
        println!("No pending addenda to merge.");
        return Ok(());
    };
    let current = store.load_library()?;
    let (merged, added) = library::merge_addenda(
        &current,
        &addenda,
        ctx.project_root(),
        &ctx.config().source_roots(),
    )?;

    store.save_library(&merged)?;
    store.remove_addenda()?;
    println!("✓ Merged {added} new entries; the library now has {} entries", merged.len());
    Ok(())
}

pub fn export_config(file: &str, format: &str) -> Result<()> {
    get_config_manager()?.export_config(file, format)?;
    println!("✓ Exported configuration to {file}");
    Ok(())
}

fn library_store(config_manager: &ConfigManager, ctx: &RunContext) -> JsonFileStore {
    let names = &ctx.config().library;
    JsonFileStore::new(
        config_manager.installer_file(&names.library),
        config_manager.installer_file(&names.addenda),
    )
}

// Helper function to create ConfigManager instance
fn get_config_manager() -> Result<ConfigManager> {
    ConfigManager::new()
}
