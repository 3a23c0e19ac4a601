//! Error taxonomy for the storage core.
//!
//! Every operation returns a [`StorageError`]. Each variant belongs to exactly one
//! [`ErrorClass`]:
//! - `Client`: the request is invalid or conflicts with what is on disk
//! - `Server`: the environment failed a valid request (I/O, archive construction)
//! - `Corrupt`: rolling back a failed overwrite itself failed; the task directory
//!   may be in neither its old nor its new state and needs an operator

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::archive::ArchiveError;
use super::paths::{TaskId, UserId};
use super::validate::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
    Corrupt,
}

#[derive(Debug, Error)]
pub enum StorageError {
    // ── client ──────────────────────────────────────────────────────────────
    #[error("the directory for task {task} already exists, overwrite not allowed")]
    DirectoryAlreadyExists { task: TaskId },

    #[error("task {task} does not exist")]
    TaskNotFound { task: TaskId },

    #[error("submission {submission} of user {user} does not exist for task {task}")]
    SubmissionNotFound {
        task: TaskId,
        user: UserId,
        submission: u32,
    },

    #[error("description file does not exist for task {task}")]
    DescriptionNotFound { task: TaskId },

    #[error("invalid task files: {0}")]
    Validation(#[from] ValidationError),

    #[error("file '{file_name}' has no extension")]
    MissingExtension { file_name: String },

    #[error("file extension '{extension}' is not allowed")]
    ExtensionNotAllowed { extension: String },

    #[error("output file '{file_name}' does not match {{number}}.out or {{number}}.err")]
    InvalidOutputFormat { file_name: String },

    #[error("duplicate output file number {number}")]
    DuplicateFileNumber { number: u32 },

    #[error("unexpected output file number {number}")]
    UnexpectedFileNumber { number: u32 },

    #[error("number of output files ({actual}) does not match the expected number ({expected})")]
    CountMismatch { expected: usize, actual: usize },

    #[error("no output files were provided")]
    NoOutputs,

    #[error("outputs are already stored for task {task}, user {user}, submission {submission}")]
    OutputsAlreadyStored {
        task: TaskId,
        user: UserId,
        submission: u32,
    },

    #[error("no solution file found in submission {submission} of user {user} for task {task}")]
    NoSolutionFound {
        task: TaskId,
        user: UserId,
        submission: u32,
    },

    #[error("multiple solution files found in submission {submission} of user {user} for task {task}")]
    MultipleSolutionsFound {
        task: TaskId,
        user: UserId,
        submission: u32,
    },

    #[error("file {name} does not exist for task {task}")]
    FileNotFound { task: TaskId, name: String },

    #[error("invalid archive: {0}")]
    InvalidArchive(#[source] ArchiveError),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    // ── server ──────────────────────────────────────────────────────────────
    #[error("failed to back up task {task}: {source}")]
    BackupFailed {
        task: TaskId,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove existing directory of task {task}: {source}")]
    RemoveFailed {
        task: TaskId,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete directory of task {task}: {source}")]
    DeleteFailed {
        task: TaskId,
        #[source]
        source: io::Error,
    },

    #[error("failed to build archive: {0}")]
    ArchiveFailed(#[source] ArchiveError),

    #[error("failed to initialize storage root {}: {source}", path.display())]
    InitFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // ── corrupt ─────────────────────────────────────────────────────────────
    #[error(
        "failed to restore task {task} from backup {}: {restore}; restoring because: {cause}",
        backup.display()
    )]
    RestoreFailed {
        task: TaskId,
        /// Kept on disk for manual recovery.
        backup: PathBuf,
        restore: io::Error,
        cause: Box<StorageError>,
    },
}

impl StorageError {
    pub fn class(&self) -> ErrorClass {
        use StorageError::*;
        match self {
            DirectoryAlreadyExists { .. }
            | TaskNotFound { .. }
            | SubmissionNotFound { .. }
            | DescriptionNotFound { .. }
            | Validation(_)
            | MissingExtension { .. }
            | ExtensionNotAllowed { .. }
            | InvalidOutputFormat { .. }
            | DuplicateFileNumber { .. }
            | UnexpectedFileNumber { .. }
            | CountMismatch { .. }
            | NoOutputs
            | OutputsAlreadyStored { .. }
            | NoSolutionFound { .. }
            | MultipleSolutionsFound { .. }
            | FileNotFound { .. }
            | MalformedArchive(_) => ErrorClass::Client,
            InvalidArchive(e) if e.is_io() => ErrorClass::Server,
            InvalidArchive(_) => ErrorClass::Client,
            BackupFailed { .. }
            | RemoveFailed { .. }
            | CreateFailed { .. }
            | WriteFailed { .. }
            | ReadFailed { .. }
            | DeleteFailed { .. }
            | ArchiveFailed(_)
            | InitFailed { .. } => ErrorClass::Server,
            RestoreFailed { .. } => ErrorClass::Corrupt,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.class() == ErrorClass::Client
    }

    /// The requested entity is absent (as opposed to malformed or conflicting).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::TaskNotFound { .. }
                | StorageError::SubmissionNotFound { .. }
                | StorageError::DescriptionNotFound { .. }
                | StorageError::NoSolutionFound { .. }
                | StorageError::FileNotFound { .. }
        )
    }

    /// The request conflicts with state that already exists on disk.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DirectoryAlreadyExists { .. } | StorageError::OutputsAlreadyStored { .. }
        )
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::WriteFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::ReadFailed {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::CreateFailed {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
