//! # File Storage
//!
//! Filesystem-backed storage for programming tasks and the submissions made
//! against them.
//!
//! This library provides:
//! - Task directories with a recoverable overwrite (snapshot, rebuild, roll back)
//! - Per-user submission numbering and write-once program outputs
//! - `.tar.gz` bundles of task files, input/output pairs and solution packages
//! - A thin HTTP API over all of the above
//!
//! ## Layout on disk
//!
//! ```text
//! <root>/tasks/task{ID}/src/{description.pdf, input/{n}.in, output/{n}.out}
//! <root>/tasks/task{ID}/submissions/user{UID}/submission{N}/{solution.ext, output/}
//! ```
//!
//! ## Modules
//! - `storage`: the blocking core (validation, backup, managers, bundles)
//! - `api`: axum routes that call into the core on the blocking pool
//! - `config`: environment configuration

pub mod api;
pub mod config;
pub mod storage;
pub mod util;

pub use config::Config;
pub use storage::TaskStore;
