// This file is the module declaration file for the `core` module.
// In Rust, a `mod.rs` file within a directory (e.g., `src/core/`)
// serves two main purposes:
//
// 1. It declares the submodules contained within that directory.
// 2. It exposes these submodules to the parent module (`src/` in this case),
//    making them accessible to the entire crate.

// `config` module:
// This module is responsible for managing the installer configuration.
// It defines the typed TOML document (`InstallerConfig`) with its source
// roots, languages, omissions, feature rules and cabinet assignments,
// provides a `ConfigProvider` trait for abstracting configuration access, and
// includes a `ConfigManager` to handle file I/O operations like loading,
// saving, validating and exporting the configuration.
pub mod config;

// `engine` module:
// The pipeline driver. `RunContext` bundles a validated configuration with
// the run options, and `Generator` consumes it to walk, filter, merge,
// classify, synchronize and plan in a single pass.
pub mod engine;

// `git` module:
// A thin `GitClient` abstraction over `git2`, used to find files in the
// static tree that are not under version control.
pub mod git;

// `library` module:
// The File Library synchronizer. It binds every harvested file to a stable
// component GUID and patch group from the ledger, collects new files into
// the pending addenda, reports new and deleted files, and merges a reviewed
// addenda back into the ledger.
pub mod library;

// `model` module:
// The `FileRecord` shared by every stage, the `FileSet` map keyed by library
// path, the configured `SourceRoots`, and path and identifier helpers.
pub mod model;

// `version` module:
// Parsing and comparison of four-part file versions, and extraction of the
// version resource from PE images.
pub mod version;

// `walker` module:
// Harvests a source root into file records and a local directory tree.
pub mod walker;
