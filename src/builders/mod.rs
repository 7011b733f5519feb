// This file is the module declaration file for the `builders` module.
// It declares and makes public all the sub-modules within the `src/builders`
// directory. Each one implements a stage of the pipeline or one of the
// artifacts the pipeline produces.

// `classifier` module:
// Assigns files to installer features from localization rules, overrides,
// category heuristics and variant build evidence, and maps features to
// cabinets. Membership problems are reported, never silently fixed.
pub mod classifier;

// `emission` module:
// The `EmissionPlan` handed to the external installer-source emitter, and
// `InstallerDefinitions`, the component and feature-reference view of all
// installer sources that the integrity verifier checks the ledger against.
pub mod emission;

// `importer` module:
// Reads hand-written installer fragments. The files they install become
// omissions for the generator and their components and feature references
// join the installer definitions.
pub mod importer;

// `merge` module:
// Cross-tree merge of the built and static file sets, including duplicate
// arbitration by target path.
pub mod merge;

// `patterns` module:
// The path pattern matcher, the declarative `HeuristicSet`/`FileHeuristics`
// rule tables, and the `OmissionFilter`.
pub mod patterns;

// `reporter` module:
// The run report (errors, warnings, new and deleted files, general notes),
// its text rendering and export, and the console and file reporters.
pub mod reporter;

// `storage` module:
// The ledger and addenda documents and the `LibraryStore` abstraction with
// a JSON file implementation and an in-memory one.
pub mod storage;

// `validator` module:
// This module is dedicated to ensuring the integrity and correctness of
// the configuration. It defines the `ConfigValidator` trait and a
// `StandardValidator` implementation that checks every pattern, feature
// reference and cabinet assignment before any file is processed.
pub mod validator;

// `verifier` module:
// The integrity verifier: cross-checks the ledger against the current run
// and the installer definitions for patch-breaking changes.
pub mod verifier;
