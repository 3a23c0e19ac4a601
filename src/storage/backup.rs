//! Snapshot/restore of a directory subtree, used to make task overwrite recoverable.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

const BACKUP_PREFIX: &str = "task_backup_";

/// Creates snapshots in a staging directory (system temp dir by default).
#[derive(Debug, Clone, Default)]
pub struct BackupVault {
    staging: Option<PathBuf>,
}

impl BackupVault {
    pub fn new(staging: Option<PathBuf>) -> Self {
        Self { staging }
    }

    /// Copy the contents of `dir` (with file modes) into a fresh temporary directory.
    /// The source is never modified.
    pub fn snapshot(&self, dir: &Path) -> io::Result<Backup> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(BACKUP_PREFIX);
        let temp = match &self.staging {
            Some(staging) => {
                fs::create_dir_all(staging)?;
                builder.tempdir_in(staging)?
            }
            None => builder.tempdir()?,
        };
        copy_tree(dir, temp.path())?;
        Ok(Backup { temp })
    }
}

/// Handle to a snapshot. Dropping it deletes the snapshot; use [`Backup::keep`] to
/// leave it on disk.
#[derive(Debug)]
pub struct Backup {
    temp: TempDir,
}

impl Backup {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Delete `target` entirely, then copy the snapshot back into it.
    pub fn restore(&self, target: &Path) -> io::Result<()> {
        match fs::remove_dir_all(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        copy_tree(self.temp.path(), target)
    }

    /// Delete the snapshot, reporting failures instead of swallowing them like `Drop`.
    pub fn discard(self) -> io::Result<()> {
        self.temp.close()
    }

    /// Leave the snapshot on disk and return where it is.
    pub fn keep(self) -> PathBuf {
        self.temp.keep()
    }
}

/// Recursively copy the contents of `src` into `dst`, preserving permissions.
///
/// Directory permissions are applied after their contents are written, deepest first,
/// so read-only directories do not block the copy.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    let mut dir_modes = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_modes.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }

    for (dir, permissions) in dir_modes.into_iter().rev() {
        fs::set_permissions(dir, permissions)?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot copy symlink {}", src.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("src/input")).unwrap();
        fs::write(dir.join("src/description.pdf"), b"%PDF-1").unwrap();
        fs::write(dir.join("src/input/1.in"), b"1 2").unwrap();
    }

    #[test]
    fn snapshot_then_restore_recovers_tree() {
        let root = tempfile::tempdir().expect("tempdir");
        let task = root.path().join("task1");
        populate(&task);

        let vault = BackupVault::new(Some(root.path().join("staging")));
        let backup = vault.snapshot(&task).expect("snapshot");
        assert!(backup.path().starts_with(root.path().join("staging")));

        fs::remove_dir_all(&task).unwrap();
        fs::create_dir_all(task.join("src")).unwrap();
        fs::write(task.join("src/half-written"), b"junk").unwrap();

        backup.restore(&task).expect("restore");
        assert_eq!(fs::read(task.join("src/description.pdf")).unwrap(), b"%PDF-1");
        assert_eq!(fs::read(task.join("src/input/1.in")).unwrap(), b"1 2");
        assert!(!task.join("src/half-written").exists());
    }

    #[test]
    fn restore_works_when_target_is_gone() {
        let root = tempfile::tempdir().expect("tempdir");
        let task = root.path().join("task1");
        populate(&task);

        let backup = BackupVault::default().snapshot(&task).expect("snapshot");
        fs::remove_dir_all(&task).unwrap();
        backup.restore(&task).expect("restore");
        assert!(task.join("src/input/1.in").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn file_modes_survive_round_trip() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().expect("tempdir");
        let task = root.path().join("task1");
        populate(&task);
        let script = task.join("src/input/1.in");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o751)).unwrap();

        let backup = BackupVault::default().snapshot(&task).expect("snapshot");
        fs::remove_dir_all(&task).unwrap();
        backup.restore(&task).expect("restore");

        let mode = fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o751);
    }

    #[test]
    fn discard_and_keep() {
        let root = tempfile::tempdir().expect("tempdir");
        let task = root.path().join("task1");
        populate(&task);
        let vault = BackupVault::new(Some(root.path().join("staging")));

        let discarded = vault.snapshot(&task).expect("snapshot");
        let discarded_path = discarded.path().to_path_buf();
        discarded.discard().expect("discard");
        assert!(!discarded_path.exists());

        let kept = vault.snapshot(&task).expect("snapshot").keep();
        assert!(kept.join("src/description.pdf").is_file());
    }
}
