//! Filesystem-backed task and submission storage.
//!
//! ```text
//! TaskStore
//!   ├── TaskDirectoryManager  create / overwrite (backup + rollback) / delete
//!   │     ├── FileSetValidator (validate)
//!   │     └── BackupVault (backup)
//!   ├── SubmissionManager     numbering, solution, write-once outputs
//!   └── ArchiveBuilder        .tar.gz bundles for download
//! ```
//!
//! Everything in here is blocking. Async callers should go through
//! `tokio::task::spawn_blocking`.

mod archive;
mod backup;
mod blob;
mod bundles;
mod error;
mod locks;
mod paths;
mod payload;
mod submissions;
mod tasks;
mod validate;

use std::fs;

use crate::config::Config;

pub use archive::{ArchiveError, ArchiveFormat};
pub use backup::{Backup, BackupVault};
pub use blob::{BlobWriter, LiveWriter, StoredFile};
pub use bundles::{ArchiveBuilder, Bundle};
pub use error::{ErrorClass, StorageError, StorageResult};
pub use locks::{KeyGuard, KeyedLocks};
pub use paths::{PathScheme, TaskId, UserId};
pub use payload::{
    outputs_from_archive, outputs_from_upload, task_files_from_archive, task_files_from_upload,
};
pub use submissions::{OutputFiles, StoredOutputs, SubmissionManager};
pub use tasks::{CreateOutcome, TaskDirectoryManager};
pub use validate::{validate_task_files, FixtureKind, TaskFiles, ValidationError};

#[cfg(test)]
pub(crate) use archive::tests as archive_fixtures;

/// The storage components wired to one root directory.
pub struct TaskStore {
    pub tasks: TaskDirectoryManager,
    pub submissions: SubmissionManager,
    pub bundles: ArchiveBuilder,
}

impl TaskStore {
    /// Create `root/tasks` (and the staging directory, if configured) and wire the managers.
    pub fn open(config: &Config) -> StorageResult<Self> {
        let paths = PathScheme::new(&config.root_directory);
        let mut dirs = vec![paths.tasks_root().to_path_buf()];
        dirs.extend(config.backup_directory.clone());
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|source| StorageError::InitFailed { path: dir, source })?;
        }

        tracing::info!(
            root = %paths.tasks_root().display(),
            allowed = ?config.allowed_file_types,
            "task store opened"
        );

        Ok(Self {
            tasks: TaskDirectoryManager::new(
                paths.clone(),
                BackupVault::new(config.backup_directory.clone()),
            ),
            submissions: SubmissionManager::new(paths.clone(), &config.allowed_file_types),
            bundles: ArchiveBuilder::new(paths, config.backup_directory.clone()),
        })
    }
}
