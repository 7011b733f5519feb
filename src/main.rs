//! Keeps the installer's file library in step with the build.
//!
//! Every file the installer ships needs a component GUID that never
//! changes between releases, or binary patches stop working. This tool
//! harvests the build output and the static distribution files, decides
//! which feature each file belongs to, binds it to its recorded identity,
//! and reports everything that would break a patch.
use anyhow::Result;
use clap::{Parser, Subcommand};
use wix_file_library::core::engine::RunOptions;
use wix_file_library::utils;

const REPORT_FORMATS: [&str; 4] = ["text", "json", "yaml", "toml"];

#[derive(Parser)]
#[command(name = "wix-file-library")]
#[command(about = "Maintains the installer file library and feature assignments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration into the current folder
    Init,
    /// Check the configuration for problems
    Validate,
    /// Harvest, classify and synchronize files, then write the addenda, plan and report
    Generate {
        /// Put built files without feature evidence into the catch-all feature
        #[arg(long)]
        add_orphans: bool,
        /// Include the general section in the report
        #[arg(long)]
        report: bool,
        /// Run the integrity checks as well
        #[arg(long)]
        test_integrity: bool,
        /// Do not write any file
        #[arg(long)]
        dry_run: bool,
        /// Exit with an error when the report has errors
        #[arg(long)]
        strict: bool,
        /// Report format
        #[arg(long, default_value = "text", value_parser = REPORT_FORMATS)]
        report_format: String,
    },
    /// Check the file library against the current build without writing anything
    Verify {
        #[arg(long)]
        strict: bool,
        /// Print the report in an export format as well
        #[arg(long, default_value = "text", value_parser = REPORT_FORMATS)]
        report_format: String,
    },
    /// Merge the reviewed addenda into the file library
    MergeAddenda,
    /// Export the configuration in another format
    ExportConfig {
        file: String,
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => utils::initialize_installer(),
        Commands::Validate => utils::validate_config(),
        Commands::Generate {
            add_orphans,
            report,
            test_integrity,
            dry_run,
            strict,
            report_format,
        } => utils::generate(
            RunOptions {
                add_orphans,
                include_general: report,
                test_integrity,
                dry_run,
            },
            strict,
            &report_format,
        ),
        Commands::Verify {
            strict,
            report_format,
        } => utils::verify(strict, &report_format),
        Commands::MergeAddenda => utils::merge_addenda(),
        Commands::ExportConfig { file, format } => utils::export_config(&file, &format),
    }
}
