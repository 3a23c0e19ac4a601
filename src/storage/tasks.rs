//! Task directory lifecycle: create, recoverable overwrite, delete.
//!
//! An overwrite moves through `Idle -> Backed-up -> Torn-down -> Rebuilding` and ends
//! in one of:
//! - `Committed`: the new tree is in place and the backup is discarded
//! - `RolledBack`: the backup was restored and the original error is returned
//! - `Corrupt`: the restore itself failed; the backup is kept and
//!   [`StorageError::RestoreFailed`] names it
//!
//! Create, overwrite, and delete of the same task are serialized in-process.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use super::backup::{Backup, BackupVault};
use super::blob::{BlobWriter, LiveWriter, StoredFile};
use super::error::{StorageError, StorageResult};
use super::locks::KeyedLocks;
use super::paths::{PathScheme, TaskId, DESCRIPTION_FILE};
use super::validate::{validate_task_files, TaskFiles, ValidatedTask};

/// What a successful create/overwrite did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOutcome {
    /// An existing task directory was replaced.
    pub replaced: bool,
    /// The overwrite backup could not be discarded and is still on disk.
    pub stale_backup: Option<PathBuf>,
}

pub struct TaskDirectoryManager {
    paths: PathScheme,
    vault: BackupVault,
    writer: Arc<dyn BlobWriter>,
    locks: KeyedLocks<TaskId>,
}

impl TaskDirectoryManager {
    pub fn new(paths: PathScheme, vault: BackupVault) -> Self {
        Self {
            paths,
            vault,
            writer: Arc::new(LiveWriter),
            locks: KeyedLocks::new(),
        }
    }

    /// Route blob writes through `writer` instead of the filesystem directly.
    pub fn with_writer(mut self, writer: Arc<dyn BlobWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn paths(&self) -> &PathScheme {
        &self.paths
    }

    pub fn exists(&self, task: TaskId) -> bool {
        self.paths.task_dir(task).is_dir()
    }

    /// Create the task tree from `files`, replacing an existing one only when `overwrite`.
    ///
    /// `files` is validated before anything on disk is touched. Input and output files
    /// keep their uploaded base names, which validation guarantees are `{n}.in`/`{n}.out`.
    pub fn create_or_overwrite(
        &self,
        task: TaskId,
        files: &TaskFiles,
        overwrite: bool,
    ) -> StorageResult<CreateOutcome> {
        let _guard = self.locks.lock(task);
        let task_dir = self.paths.task_dir(task);
        let existed = task_dir.exists();

        if existed && !overwrite {
            return Err(StorageError::DirectoryAlreadyExists { task });
        }

        let validated = validate_task_files(files)?;

        let backup = if existed {
            let backup = self
                .vault
                .snapshot(&task_dir)
                .map_err(|source| StorageError::BackupFailed { task, source })?;
            tracing::debug!(task = %task, backup = %backup.path().display(), "task snapshot taken");

            if let Err(source) = fs::remove_dir_all(&task_dir) {
                return Err(self.roll_back(task, backup, StorageError::RemoveFailed { task, source }));
            }
            Some(backup)
        } else {
            None
        };

        if let Err(cause) = self.build(task, &validated) {
            return Err(match backup {
                Some(backup) => self.roll_back(task, backup, cause),
                None => {
                    self.remove_partial(task);
                    cause
                }
            });
        }

        let mut outcome = CreateOutcome {
            replaced: existed,
            stale_backup: None,
        };
        if let Some(backup) = backup {
            let path = backup.path().to_path_buf();
            if let Err(e) = backup.discard() {
                tracing::warn!(task = %task, backup = %path.display(), error = %e, "failed to discard task backup");
                outcome.stale_backup = Some(path);
            }
        }

        tracing::info!(
            task = %task,
            fixtures = validated.fixture_count(),
            replaced = existed,
            "task stored"
        );
        Ok(outcome)
    }

    /// Remove the whole task directory, submissions included. Not recoverable.
    pub fn delete(&self, task: TaskId) -> StorageResult<()> {
        let _guard = self.locks.lock(task);
        let task_dir = self.paths.task_dir(task);
        match fs::remove_dir_all(&task_dir) {
            Ok(()) => {
                tracing::info!(task = %task, "task deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::TaskNotFound { task }),
            Err(source) => Err(StorageError::DeleteFailed { task, source }),
        }
    }

    pub fn description(&self, task: TaskId) -> StorageResult<StoredFile> {
        if !self.exists(task) {
            return Err(StorageError::TaskNotFound { task });
        }
        let path = self.paths.description_file(task);
        match fs::read(&path) {
            Ok(contents) => Ok(StoredFile {
                name: DESCRIPTION_FILE.to_string(),
                contents,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::DescriptionNotFound { task })
            }
            Err(e) => Err(StorageError::read(path, e)),
        }
    }

    fn build(&self, task: TaskId, validated: &ValidatedTask<'_>) -> StorageResult<()> {
        let input_dir = self.paths.input_dir(task);
        let output_dir = self.paths.output_dir(task);
        for dir in [&input_dir, &output_dir] {
            fs::create_dir_all(dir).map_err(|e| StorageError::create(dir, e))?;
        }

        let description = self.paths.description_file(task);
        self.writer
            .write(&description, validated.description)
            .map_err(|e| StorageError::write(&description, e))?;

        let fixtures = validated
            .inputs
            .iter()
            .map(|f| (&input_dir, f))
            .chain(validated.outputs.iter().map(|f| (&output_dir, f)));
        for (dir, fixture) in fixtures {
            let path = dir.join(fixture.name);
            self.writer
                .write(&path, fixture.contents)
                .map_err(|e| StorageError::write(&path, e))?;
        }
        Ok(())
    }

    fn roll_back(&self, task: TaskId, backup: Backup, cause: StorageError) -> StorageError {
        let task_dir = self.paths.task_dir(task);
        match backup.restore(&task_dir) {
            Ok(()) => {
                tracing::warn!(task = %task, error = %cause, "task overwrite rolled back");
                let path = backup.path().to_path_buf();
                if let Err(e) = backup.discard() {
                    tracing::warn!(task = %task, backup = %path.display(), error = %e, "failed to discard task backup");
                }
                cause
            }
            Err(restore) => {
                let kept = backup.keep();
                tracing::error!(
                    task = %task,
                    backup = %kept.display(),
                    error = %restore,
                    cause = %cause,
                    "task restore failed, directory needs manual recovery"
                );
                StorageError::RestoreFailed {
                    task,
                    backup: kept,
                    restore,
                    cause: Box::new(cause),
                }
            }
        }
    }

    /// Fresh creation failed: drop the half-built tree so a retry is not a conflict.
    fn remove_partial(&self, task: TaskId) {
        let task_dir = self.paths.task_dir(task);
        if let Err(e) = fs::remove_dir_all(&task_dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(task = %task, error = %e, "failed to remove partially created task");
            }
        }
    }
}
