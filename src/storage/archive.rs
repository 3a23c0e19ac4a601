//! Archive codec: unpacks inbound `.tar.gz`/`.zip` uploads and writes outbound
//! gzip-compressed tar bundles.
//!
//! # Invariants
//! - Outbound entry names always use `/` separators.
//! - Inbound entries may only be directories or regular files, and their paths must
//!   stay inside the destination (no absolute paths, no `..`).
//! - Errors while decoding the archive stream are reported as [`ArchiveError::Corrupt`];
//!   errors while touching the local filesystem are [`ArchiveError::Io`].

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZIP_LOCAL_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const ZIP_EMPTY_MAGIC: [u8; 4] = [b'P', b'K', 0x05, 0x06];

// st_mode file type bits as stored in a zip entry's external attributes
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("archive is corrupt: {0}")]
    Corrupt(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported entry type for {0}")]
    UnsupportedEntry(String),

    #[error("entry path escapes the archive root: {0}")]
    UnsafePath(String),
}

impl ArchiveError {
    /// True when the failure came from the local filesystem rather than the archive.
    pub fn is_io(&self) -> bool {
        matches!(self, ArchiveError::Io(_) | ArchiveError::Walk(_))
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io) => ArchiveError::Corrupt(io.to_string()),
            other => ArchiveError::Corrupt(other.to_string()),
        }
    }
}

/// Inbound archive container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Detect by file name suffix (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".gz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    /// Detect by magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&GZIP_MAGIC) {
            Some(ArchiveFormat::TarGz)
        } else if bytes.starts_with(&ZIP_LOCAL_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    /// Name suffix wins; magic bytes are the fallback.
    pub fn detect(name: Option<&str>, bytes: &[u8]) -> Option<Self> {
        name.and_then(Self::from_name).or_else(|| Self::sniff(bytes))
    }
}

/// Unpack `bytes` into `dest`, creating it if needed.
pub fn unpack(bytes: &[u8], format: ArchiveFormat, dest: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::TarGz => unpack_tar_gz(bytes, dest),
        ArchiveFormat::Zip => unpack_zip(bytes, dest),
    }
}

fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        let raw = entry
            .path()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?
            .into_owned();
        let display = raw.display().to_string();

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                let rel = safe_relative(&raw)?;
                fs::create_dir_all(dest.join(rel))?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let rel = safe_relative(&raw)?;
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
                write_entry(dest, &rel, &contents)?;
            }
            // pax global headers carry metadata only
            tar::EntryType::XGlobalHeader => continue,
            _ => return Err(ArchiveError::UnsupportedEntry(display)),
        }
    }
    Ok(())
}

fn unpack_zip(bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        let rel = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafePath(name.clone()))?;
        let rel = safe_relative(&rel)?;

        if file.is_dir() {
            fs::create_dir_all(dest.join(rel))?;
            continue;
        }
        // symlinks, fifos and devices; entries without unix mode bits are plain files
        let kind = file.unix_mode().map_or(0, |mode| mode & S_IFMT);
        if kind != 0 && kind != S_IFREG {
            return Err(ArchiveError::UnsupportedEntry(name));
        }

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        write_entry(dest, &rel, &contents)?;
    }
    Ok(())
}

fn write_entry(dest: &Path, rel: &Path, contents: &[u8]) -> Result<(), ArchiveError> {
    let target = dest.join(rel);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, contents)?;
    Ok(())
}

/// Reject absolute paths and parent traversal; drop `.` components.
fn safe_relative(path: &Path) -> Result<PathBuf, ArchiveError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(path.display().to_string()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ArchiveError::UnsafePath(path.display().to_string()));
    }
    Ok(out)
}

/// Join archive name segments with `/`, independent of the host separator.
pub fn entry_name<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(|s| s.as_ref().trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Streaming writer for a gzip-compressed POSIX tar.
pub struct TarGzWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
}

impl<W: Write> TarGzWriter<W> {
    pub fn new(inner: W) -> Self {
        let mut builder = tar::Builder::new(GzEncoder::new(inner, Compression::default()));
        builder.follow_symlinks(false);
        Self { builder }
    }

    /// Add the regular file at `src` under `name`, keeping its mode and mtime.
    pub fn append_file(&mut self, src: &Path, name: &str) -> Result<(), ArchiveError> {
        self.builder.append_path_with_name(src, name)?;
        Ok(())
    }

    /// Add a directory header for `src` under `name`.
    pub fn append_dir(&mut self, src: &Path, name: &str) -> Result<(), ArchiveError> {
        self.builder.append_dir(name, src)?;
        Ok(())
    }

    /// Add `root` and everything below it, named `prefix/<path relative to root's parent>`.
    ///
    /// `root` itself appears as `prefix/<root name>`; entries are added in sorted order
    /// so bundles are reproducible.
    pub fn append_tree(&mut self, root: &Path, prefix: &str) -> Result<usize, ArchiveError> {
        let base = root.parent().unwrap_or(root);
        let mut added = 0;
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            let rel = entry.path().strip_prefix(base).unwrap_or(entry.path());
            let mut segments = vec![prefix.to_string()];
            segments.extend(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned()),
            );
            let name = entry_name(&segments);

            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.append_dir(entry.path(), &name)?;
            } else if file_type.is_file() {
                self.append_file(entry.path(), &name)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Write the tar trailer, flush the gzip stream and hand back the sink.
    pub fn finish(self) -> Result<W, ArchiveError> {
        let encoder = self.builder.into_inner()?;
        let mut inner = encoder.finish()?;
        inner.flush()?;
        Ok(inner)
    }
}
