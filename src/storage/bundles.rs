//! Downloadable `.tar.gz` bundles of task and submission files.
//!
//! Each bundle is written to a temporary file that is deleted when the [`Bundle`]
//! drops, so every exit path cleans up after itself.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::archive::{entry_name, ArchiveError, TarGzWriter};
use super::error::{StorageError, StorageResult};
use super::paths::{input_name, output_name, PathScheme, TaskId, UserId};
use super::submissions::locate_solution;

const PACKAGE_ROOT: &str = "Task";
const PACKAGE_INPUTS: &str = "inputs";
const PACKAGE_OUTPUTS: &str = "outputs";

/// A finished archive on local disk plus the file name to offer for download.
#[derive(Debug)]
pub struct Bundle {
    file: NamedTempFile,
    download_name: String,
}

impl Bundle {
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open a fresh read handle. The handle stays valid after the bundle drops.
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

pub struct ArchiveBuilder {
    paths: PathScheme,
    staging: Option<PathBuf>,
}

impl ArchiveBuilder {
    pub fn new(paths: PathScheme, staging: Option<PathBuf>) -> Self {
        Self { paths, staging }
    }

    /// Everything under the task's `src/`, rooted at `task{ID}Files/src/...`.
    pub fn task_files(&self, task: TaskId) -> StorageResult<Bundle> {
        let src = self.paths.src_dir(task);
        if !src.is_dir() {
            return Err(StorageError::TaskNotFound { task });
        }

        let root = format!("task{}Files", task);
        let (file, mut writer) = self.start()?;
        let files = writer.append_tree(&src, &root).map_err(StorageError::ArchiveFailed)?;

        tracing::debug!(task = %task, files, "task bundle built");
        self.finish(file, writer, format!("{root}.tar.gz"))
    }

    /// `{k}.in` and `{k}.out`, flattened to their base names.
    pub fn input_output(&self, task: TaskId, k: u32) -> StorageResult<Bundle> {
        if !self.paths.task_dir(task).is_dir() {
            return Err(StorageError::TaskNotFound { task });
        }

        let pair = [
            (self.paths.input_file(task, k), input_name(k)),
            (self.paths.output_file(task, k), output_name(k)),
        ];
        for (path, name) in &pair {
            if !path.is_file() {
                return Err(StorageError::FileNotFound {
                    task,
                    name: name.clone(),
                });
            }
        }

        let (file, mut writer) = self.start()?;
        for (path, name) in &pair {
            writer
                .append_file(path, name)
                .map_err(StorageError::ArchiveFailed)?;
        }
        self.finish(file, writer, format!("Task{}InputOutput{}Files.tar.gz", task, k))
    }

    /// The task's fixtures and a submission's solution:
    /// `Task/inputs/*.in`, `Task/outputs/*.out`, `Task/solution.{ext}`.
    pub fn solution_package(
        &self,
        task: TaskId,
        user: UserId,
        submission: u32,
    ) -> StorageResult<Bundle> {
        let solution = locate_solution(&self.paths, task, user, submission)?;
        let inputs = list_with_extension(&self.paths.input_dir(task), "in")?;
        let outputs = list_with_extension(&self.paths.output_dir(task), "out")?;

        let (file, mut writer) = self.start()?;
        let mut add = |path: &Path, segments: &[&str]| -> StorageResult<()> {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut name: Vec<&str> = segments.to_vec();
            name.push(&file_name);
            writer
                .append_file(path, &entry_name(&name))
                .map_err(StorageError::ArchiveFailed)
        };
        for path in &inputs {
            add(path, &[PACKAGE_ROOT, PACKAGE_INPUTS])?;
        }
        for path in &outputs {
            add(path, &[PACKAGE_ROOT, PACKAGE_OUTPUTS])?;
        }
        add(&solution, &[PACKAGE_ROOT])?;

        tracing::debug!(
            task = %task,
            user = %user,
            submission,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "solution package built"
        );
        self.finish(
            file,
            writer,
            format!(
                "Task{}_User{}_Submission{}_Package.tar.gz",
                task, user, submission
            ),
        )
    }

    fn start(&self) -> StorageResult<(NamedTempFile, TarGzWriter<File>)> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bundle_").suffix(".tar.gz");
        let temp = match &self.staging {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let temp = temp.map_err(archive_io)?;
        let handle = temp.as_file().try_clone().map_err(archive_io)?;
        Ok((temp, TarGzWriter::new(handle)))
    }

    fn finish(
        &self,
        file: NamedTempFile,
        writer: TarGzWriter<File>,
        download_name: String,
    ) -> StorageResult<Bundle> {
        writer.finish().map_err(StorageError::ArchiveFailed)?;
        Ok(Bundle {
            file,
            download_name,
        })
    }
}

fn archive_io(e: io::Error) -> StorageError {
    StorageError::ArchiveFailed(ArchiveError::Io(e))
}

/// Files in `dir` with the given extension, sorted by fixture number then name.
fn list_with_extension(dir: &Path, extension: &str) -> StorageResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::read(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::read(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == extension) {
            files.push(path);
        }
    }
    files.sort_by_key(|p| {
        let stem = p
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok());
        (stem.unwrap_or(u32::MAX), p.clone())
    });
    Ok(files)
}
