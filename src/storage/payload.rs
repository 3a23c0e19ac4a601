//! Turns uploaded archives into the name -> bytes maps the managers consume.
//!
//! Task archives hold exactly one top-level folder with `description.pdf`, `input/`,
//! and `output/`. Output archives hold a `user-output/` folder.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use super::archive::{self, ArchiveError, ArchiveFormat};
use super::error::{StorageError, StorageResult};
use super::paths::{DESCRIPTION_FILE, INPUT_DIR, OUTPUT_DIR};
use super::submissions::OutputFiles;
use super::validate::TaskFiles;

pub const USER_OUTPUT_DIR: &str = "user-output";

/// Unpack an uploaded task archive and load its files.
pub fn task_files_from_upload(bytes: &[u8], file_name: Option<&str>) -> StorageResult<TaskFiles> {
    let scratch = unpack_upload(bytes, file_name)?;
    task_files_from_archive(scratch.path())
}

/// Unpack an uploaded outputs archive and load its files.
pub fn outputs_from_upload(bytes: &[u8], file_name: Option<&str>) -> StorageResult<OutputFiles> {
    let scratch = unpack_upload(bytes, file_name)?;
    outputs_from_archive(scratch.path())
}

fn unpack_upload(bytes: &[u8], file_name: Option<&str>) -> StorageResult<tempfile::TempDir> {
    let format = ArchiveFormat::detect(file_name, bytes).ok_or_else(|| {
        StorageError::InvalidArchive(ArchiveError::UnsupportedFormat(
            file_name.unwrap_or("upload").to_string(),
        ))
    })?;
    let scratch = tempfile::Builder::new()
        .prefix("upload_")
        .tempdir()
        .map_err(|e| StorageError::InvalidArchive(ArchiveError::Io(e)))?;
    archive::unpack(bytes, format, scratch.path()).map_err(StorageError::InvalidArchive)?;
    Ok(scratch)
}

/// Load an extracted task archive rooted at `dir`.
pub fn task_files_from_archive(dir: &Path) -> StorageResult<TaskFiles> {
    let top = single_top_level_dir(dir)?;
    let mut files = TaskFiles::new();

    let description = top.join(DESCRIPTION_FILE);
    if !description.is_file() {
        return Err(StorageError::MalformedArchive(format!(
            "{DESCRIPTION_FILE} is missing"
        )));
    }
    let contents = fs::read(&description).map_err(|e| StorageError::read(&description, e))?;
    files.insert(DESCRIPTION_FILE.to_string(), contents);

    for fixtures in [INPUT_DIR, OUTPUT_DIR] {
        let root = top.join(fixtures);
        if !root.is_dir() {
            return Err(StorageError::MalformedArchive(format!(
                "{fixtures}/ directory is missing"
            )));
        }
        for (rel, contents) in read_files(&root)? {
            files.insert(format!("{fixtures}/{rel}"), contents);
        }
    }
    Ok(files)
}

/// Load the `user-output/` folder of an extracted outputs archive.
pub fn outputs_from_archive(dir: &Path) -> StorageResult<OutputFiles> {
    let root = dir.join(USER_OUTPUT_DIR);
    if !root.is_dir() {
        return Err(StorageError::MalformedArchive(format!(
            "{USER_OUTPUT_DIR}/ directory is missing"
        )));
    }
    Ok(read_files(&root)?.into_iter().collect())
}

fn single_top_level_dir(dir: &Path) -> StorageResult<std::path::PathBuf> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::read(dir, e))?;
    let mut found = Vec::new();
    for entry in entries {
        found.push(entry.map_err(|e| StorageError::read(dir, e))?.path());
    }
    match found.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Err(StorageError::MalformedArchive(
            "task archive has to contain exactly 1 main folder".to_string(),
        )),
    }
}

/// Regular files under `root` as (`/`-separated relative path, contents).
fn read_files(root: &Path) -> StorageResult<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::read(root, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let contents = fs::read(entry.path()).map_err(|e| StorageError::read(entry.path(), e))?;
        out.push((rel, contents));
    }
    Ok(out)
}
