//! Byte-blob writes and reads, behind a port so tests can inject mid-operation failures.

use std::fs;
use std::io;
use std::path::Path;

/// Writes whole files. Implementations must create or truncate `path`.
pub trait BlobWriter: Send + Sync {
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Writes straight to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveWriter;

impl BlobWriter for LiveWriter {
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }
}

/// A file read back out of storage, with the name it should be served under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub contents: Vec<u8>,
}
