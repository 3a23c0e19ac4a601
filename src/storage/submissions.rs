//! Submission numbering, solution storage, and write-once program outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::blob::{BlobWriter, LiveWriter, StoredFile};
use super::error::{StorageError, StorageResult};
use super::locks::KeyedLocks;
use super::paths::{PathScheme, TaskId, UserId, COMPILE_ERROR_FILE, SOLUTION_STEM};
use super::validate::{fixture_number, FixtureKind};

/// Output file name -> contents, as produced by running a submission.
pub type OutputFiles = BTreeMap<String, Vec<u8>>;

static OUTPUT_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)\.(out|err)$").expect("static regex"));

const SUBMISSION_PREFIX: &str = "submission";

/// What [`SubmissionManager::store_outputs`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredOutputs {
    CompileError,
    Outputs { stdout: usize, stderr: usize },
}

pub struct SubmissionManager {
    paths: PathScheme,
    allowed_extensions: Vec<String>,
    writer: Arc<dyn BlobWriter>,
    allocation: KeyedLocks<(TaskId, UserId)>,
    outputs: KeyedLocks<(TaskId, UserId, u32)>,
}

impl SubmissionManager {
    /// `allowed_extensions` are matched case-insensitively and include the dot (`.py`).
    pub fn new(paths: PathScheme, allowed_extensions: &[String]) -> Self {
        Self {
            paths,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            writer: Arc::new(LiveWriter),
            allocation: KeyedLocks::new(),
            outputs: KeyedLocks::new(),
        }
    }

    pub fn with_writer(mut self, writer: Arc<dyn BlobWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Store `solution` as a new submission and return its number (1-based, per user).
    pub fn create_submission(
        &self,
        task: TaskId,
        user: UserId,
        solution: &[u8],
        file_name: &str,
    ) -> StorageResult<u32> {
        if !self.paths.task_dir(task).is_dir() {
            return Err(StorageError::TaskNotFound { task });
        }
        let extension = self.check_extension(file_name)?;

        let _guard = self.allocation.lock((task, user));
        let user_dir = self.paths.user_dir(task, user);
        let submission = next_submission_number(&user_dir)?;

        fs::create_dir_all(&user_dir).map_err(|e| StorageError::create(&user_dir, e))?;
        // never write into an existing submission directory
        let submission_dir = self.paths.submission_dir(task, user, submission);
        if let Err(e) = fs::create_dir(&submission_dir) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                tracing::error!(
                    task = %task,
                    user = %user,
                    submission,
                    "submission directory already exists, numbering has a gap"
                );
            }
            return Err(StorageError::create(&submission_dir, e));
        }
        let output_dir = self.paths.submission_output_dir(task, user, submission);
        fs::create_dir(&output_dir).map_err(|e| StorageError::create(&output_dir, e))?;

        let solution_path = self.paths.solution_file(task, user, submission, &extension);
        if let Err(e) = self.writer.write(&solution_path, solution) {
            if let Err(cleanup) = fs::remove_dir_all(&submission_dir) {
                tracing::warn!(path = %submission_dir.display(), error = %cleanup, "failed to remove incomplete submission");
            }
            return Err(StorageError::write(solution_path, e));
        }

        tracing::info!(task = %task, user = %user, submission, "submission stored");
        Ok(submission)
    }

    /// Numbers `{n}` of the task's `src/output/{n}.out` files.
    pub fn expected_outputs(&self, task: TaskId) -> StorageResult<BTreeSet<u32>> {
        if !self.paths.task_dir(task).is_dir() {
            return Err(StorageError::TaskNotFound { task });
        }
        let dir = self.paths.output_dir(task);
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::read(&dir, e))?;
        let mut expected = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::read(&dir, e))?;
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| fixture_number(FixtureKind::Output, name))
            {
                expected.insert(n);
            }
        }
        Ok(expected)
    }

    /// Validate and store a submission's outputs. Outputs are written once; a
    /// non-empty `output/` directory rejects further writes.
    pub fn store_outputs(
        &self,
        task: TaskId,
        user: UserId,
        submission: u32,
        outputs: &OutputFiles,
    ) -> StorageResult<StoredOutputs> {
        let expected = self.expected_outputs(task)?;

        let _guard = self.outputs.lock((task, user, submission));
        if !self.paths.submission_dir(task, user, submission).is_dir() {
            return Err(StorageError::SubmissionNotFound {
                task,
                user,
                submission,
            });
        }

        let output_dir = self.paths.submission_output_dir(task, user, submission);
        match fs::read_dir(&output_dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    return Err(StorageError::OutputsAlreadyStored {
                        task,
                        user,
                        submission,
                    });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&output_dir).map_err(|e| StorageError::create(&output_dir, e))?;
            }
            Err(e) => return Err(StorageError::read(&output_dir, e)),
        }

        if outputs.len() == 1 {
            if let Some(contents) = outputs.get(COMPILE_ERROR_FILE) {
                self.write_all(&output_dir, [(COMPILE_ERROR_FILE, contents.as_slice())])?;
                tracing::info!(task = %task, user = %user, submission, "compile error stored");
                return Ok(StoredOutputs::CompileError);
            }
        }

        if outputs.is_empty() {
            return Err(StorageError::NoOutputs);
        }
        let checked = check_outputs(outputs, &expected)?;
        self.write_all(
            &output_dir,
            checked.files.iter().map(|(name, contents)| (*name, *contents)),
        )?;

        tracing::info!(
            task = %task,
            user = %user,
            submission,
            stdout = checked.stdout,
            stderr = checked.stderr,
            "outputs stored"
        );
        Ok(StoredOutputs::Outputs {
            stdout: checked.stdout,
            stderr: checked.stderr,
        })
    }

    /// The submission's `solution.*` file.
    pub fn get_submission_solution(
        &self,
        task: TaskId,
        user: UserId,
        submission: u32,
    ) -> StorageResult<StoredFile> {
        let path = locate_solution(&self.paths, task, user, submission)?;
        let contents = fs::read(&path).map_err(|e| StorageError::read(&path, e))?;
        let name = path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or(SOLUTION_STEM)
            .to_string();
        Ok(StoredFile { name, contents })
    }

    fn check_extension(&self, file_name: &str) -> StorageResult<String> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(OsStr::to_str)
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .ok_or_else(|| StorageError::MissingExtension {
                file_name: file_name.to_string(),
            })?;
        if !self.allowed_extensions.contains(&extension) {
            return Err(StorageError::ExtensionNotAllowed { extension });
        }
        Ok(extension)
    }

    /// Write every file or none: on failure the files already written are removed.
    fn write_all<'a>(
        &self,
        dir: &Path,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> StorageResult<()> {
        let mut written = Vec::new();
        for (name, contents) in files {
            let path = dir.join(name);
            if let Err(e) = self.writer.write(&path, contents) {
                for done in written.iter().chain(std::iter::once(&path)) {
                    if let Err(cleanup) = fs::remove_file(done) {
                        if cleanup.kind() != io::ErrorKind::NotFound {
                            tracing::warn!(path = %done.display(), error = %cleanup, "failed to remove partial output");
                        }
                    }
                }
                return Err(StorageError::write(path, e));
            }
            written.push(path);
        }
        Ok(())
    }
}

/// Locate the single `solution*` file of a submission.
pub(crate) fn locate_solution(
    paths: &PathScheme,
    task: TaskId,
    user: UserId,
    submission: u32,
) -> StorageResult<PathBuf> {
    if !paths.task_dir(task).is_dir() {
        return Err(StorageError::TaskNotFound { task });
    }
    let dir = paths.submission_dir(task, user, submission);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StorageError::SubmissionNotFound {
                task,
                user,
                submission,
            })
        }
        Err(e) => return Err(StorageError::read(&dir, e)),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::read(&dir, e))?;
        let is_solution = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SOLUTION_STEM));
        if is_solution && entry.path().is_file() {
            found.push(entry.path());
        }
    }

    match found.len() {
        0 => Err(StorageError::NoSolutionFound {
            task,
            user,
            submission,
        }),
        1 => Ok(found.remove(0)),
        _ => Err(StorageError::MultipleSolutionsFound {
            task,
            user,
            submission,
        }),
    }
}

/// `1 + count(submission* directories)`; a missing user directory counts as zero.
fn next_submission_number(user_dir: &Path) -> StorageResult<u32> {
    let entries = match fs::read_dir(user_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(StorageError::read(user_dir, e)),
    };
    let mut count = 0u32;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::read(user_dir, e))?;
        let is_submission = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SUBMISSION_PREFIX));
        if is_submission && entry.path().is_dir() {
            count += 1;
        }
    }
    Ok(count + 1)
}

struct CheckedOutputs<'a> {
    files: Vec<(&'a str, &'a [u8])>,
    stdout: usize,
    stderr: usize,
}

/// Order of checks: name format, duplicates, unexpected numbers, `.out` count.
fn check_outputs<'a>(
    outputs: &'a OutputFiles,
    expected: &BTreeSet<u32>,
) -> StorageResult<CheckedOutputs<'a>> {
    let mut stdout = BTreeSet::new();
    let mut stderr = BTreeSet::new();
    let mut files = Vec::with_capacity(outputs.len());

    for (key, contents) in outputs {
        let name = key.rsplit('/').next().unwrap_or(key);
        let caps = OUTPUT_FILE
            .captures(name)
            .ok_or_else(|| StorageError::InvalidOutputFormat {
                file_name: key.clone(),
            })?;
        let number: u32 = caps[1]
            .parse()
            .map_err(|_| StorageError::InvalidOutputFormat {
                file_name: key.clone(),
            })?;
        let seen = if &caps[2] == "out" {
            &mut stdout
        } else {
            &mut stderr
        };
        if !seen.insert(number) {
            return Err(StorageError::DuplicateFileNumber { number });
        }
        files.push((name, contents.as_slice()));
    }

    if let Some(&number) = stdout
        .iter()
        .chain(stderr.iter())
        .find(|n| !expected.contains(n))
    {
        return Err(StorageError::UnexpectedFileNumber { number });
    }

    if stdout.len() != expected.len() {
        return Err(StorageError::CountMismatch {
            expected: expected.len(),
            actual: stdout.len(),
        });
    }

    Ok(CheckedOutputs {
        files,
        stdout: stdout.len(),
        stderr: stderr.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backup::BackupVault;
    use crate::storage::blob::testing::{read_tree, FailingWriter};
    use crate::storage::tasks::TaskDirectoryManager;
    use crate::storage::validate::TaskFiles;

    const TASK: TaskId = TaskId(1);
    const USER: UserId = UserId(9);

    fn setup(root: &Path) -> SubmissionManager {
        let mut files = TaskFiles::new();
        files.insert("description.pdf".into(), b"%PDF".to_vec());
        for i in 1..=2 {
            files.insert(format!("input/{i}.in"), format!("{i}").into_bytes());
            files.insert(format!("output/{i}.out"), format!("{}", i * 2).into_bytes());
        }
        TaskDirectoryManager::new(PathScheme::new(root), BackupVault::default())
            .create_or_overwrite(TASK, &files, false)
            .expect("task");
        SubmissionManager::new(PathScheme::new(root), &[".c".into(), ".py".into()])
    }

    fn outputs(entries: &[(&str, &str)]) -> OutputFiles {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn submissions_are_numbered_sequentially() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let numbers: Vec<_> = (0..3)
            .map(|_| subs.create_submission(TASK, USER, b"print(1)", "main.py").expect("submit"))
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        // numbering is per user
        assert_eq!(
            subs.create_submission(TASK, UserId(10), b"x", "main.c").unwrap(),
            1
        );

        let dir = PathScheme::new(root.path()).submission_dir(TASK, USER, 3);
        assert!(dir.join("solution.py").is_file());
        assert!(dir.join("output").is_dir());
    }

    #[test]
    fn solution_extension_rules() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        assert!(matches!(
            subs.create_submission(TASK, USER, b"x", "Makefile"),
            Err(StorageError::MissingExtension { .. })
        ));
        assert!(matches!(
            subs.create_submission(TASK, USER, b"x", "main.rs"),
            Err(StorageError::ExtensionNotAllowed { extension }) if extension == ".rs"
        ));
        // case-insensitive, stored lowercased
        assert_eq!(subs.create_submission(TASK, USER, b"x", "MAIN.PY").unwrap(), 1);
        let solution = subs.get_submission_solution(TASK, USER, 1).unwrap();
        assert_eq!(solution.name, "solution.py");
        assert_eq!(solution.contents, b"x");
    }

    #[test]
    fn submitting_to_missing_task_fails() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        assert!(matches!(
            subs.create_submission(TaskId(2), USER, b"x", "a.py"),
            Err(StorageError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn outputs_matching_expected_set() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        assert_eq!(subs.expected_outputs(TASK).unwrap(), BTreeSet::from([1, 2]));

        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();
        let stored = subs
            .store_outputs(TASK, USER, n, &outputs(&[("1.out", "2"), ("2.out", "4")]))
            .expect("store");
        assert_eq!(stored, StoredOutputs::Outputs { stdout: 2, stderr: 0 });

        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();
        assert!(matches!(
            subs.store_outputs(TASK, USER, n, &outputs(&[("1.out", "2")])),
            Err(StorageError::CountMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            subs.store_outputs(TASK, USER, n, &outputs(&[("3.out", "6")])),
            Err(StorageError::UnexpectedFileNumber { number: 3 })
        ));
    }

    #[test]
    fn output_name_checks() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();

        assert!(matches!(
            subs.store_outputs(TASK, USER, n, &outputs(&[("1.txt", "")])),
            Err(StorageError::InvalidOutputFormat { .. })
        ));
        assert!(matches!(
            subs.store_outputs(TASK, USER, n, &outputs(&[("01.out", ""), ("1.out", "")])),
            Err(StorageError::DuplicateFileNumber { number: 1 })
        ));
        assert!(matches!(
            subs.store_outputs(TASK, USER, n, &outputs(&[("1.out", ""), ("2.out", ""), ("5.err", "")])),
            Err(StorageError::UnexpectedFileNumber { number: 5 })
        ));

        // stderr files ride along and do not count towards the .out total
        let stored = subs
            .store_outputs(
                TASK,
                USER,
                n,
                &outputs(&[("1.out", "2"), ("1.err", "warn"), ("2.out", "4")]),
            )
            .expect("store");
        assert_eq!(stored, StoredOutputs::Outputs { stdout: 2, stderr: 1 });
    }

    #[test]
    fn outputs_are_write_once() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();
        let out_dir = PathScheme::new(root.path()).submission_output_dir(TASK, USER, n);

        subs.store_outputs(TASK, USER, n, &outputs(&[("1.out", "2"), ("2.out", "4")]))
            .expect("first");
        let before = read_tree(&out_dir);

        let err = subs
            .store_outputs(TASK, USER, n, &outputs(&[("1.out", "x"), ("2.out", "y")]))
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(read_tree(&out_dir), before);
    }

    #[test]
    fn compile_error_bypasses_numbering() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let n = subs.create_submission(TASK, USER, b"x", "a.c").unwrap();

        let stored = subs
            .store_outputs(TASK, USER, n, &outputs(&[("compile-error.err", "syntax error")]))
            .expect("store");
        assert_eq!(stored, StoredOutputs::CompileError);

        let tree = read_tree(&PathScheme::new(root.path()).submission_output_dir(TASK, USER, n));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree["compile-error.err"], b"syntax error");
    }

    #[test]
    fn empty_output_set_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let empty_task = TaskId(2);
        let mut files = TaskFiles::new();
        files.insert("description.pdf".into(), b"%PDF".to_vec());
        TaskDirectoryManager::new(PathScheme::new(root.path()), BackupVault::default())
            .create_or_overwrite(empty_task, &files, false)
            .expect("task without fixtures");
        assert!(subs.expected_outputs(empty_task).unwrap().is_empty());

        let n = subs.create_submission(empty_task, USER, b"x", "a.py").unwrap();
        for _ in 0..2 {
            let err = subs
                .store_outputs(empty_task, USER, n, &OutputFiles::new())
                .unwrap_err();
            assert!(matches!(err, StorageError::NoOutputs));
            assert!(err.is_client_error());
        }

        subs.store_outputs(empty_task, USER, n, &outputs(&[("compile-error.err", "e")]))
            .expect("compile error");
        assert!(subs
            .store_outputs(empty_task, USER, n, &OutputFiles::new())
            .unwrap_err()
            .is_conflict());
    }

    #[test]
    fn existing_submission_directory_is_not_reused() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let paths = PathScheme::new(root.path());
        for _ in 0..3 {
            subs.create_submission(TASK, USER, b"x", "a.py").unwrap();
        }
        fs::remove_dir_all(paths.submission_dir(TASK, USER, 2)).unwrap();

        // two directories left, so the next number collides with submission3
        let err = subs
            .create_submission(TASK, USER, b"y", "b.c")
            .unwrap_err();
        assert!(matches!(err, StorageError::CreateFailed { .. }));

        let third = read_tree(&paths.submission_dir(TASK, USER, 3));
        assert_eq!(third.len(), 1);
        assert_eq!(third["solution.py"], b"x");
    }

    #[test]
    fn unknown_submission_is_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        assert!(matches!(
            subs.store_outputs(TASK, USER, 4, &outputs(&[("1.out", "")])),
            Err(StorageError::SubmissionNotFound { submission: 4, .. })
        ));
        assert!(matches!(
            subs.get_submission_solution(TASK, USER, 4),
            Err(StorageError::SubmissionNotFound { .. })
        ));
    }

    #[test]
    fn failed_output_write_leaves_directory_empty() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path()).with_writer(Arc::new(FailingWriter::new("2.out")));
        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();

        let err = subs
            .store_outputs(TASK, USER, n, &outputs(&[("1.out", "2"), ("2.out", "4")]))
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed { .. }));

        let out_dir = PathScheme::new(root.path()).submission_output_dir(TASK, USER, n);
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn solution_lookup_detects_duplicates() {
        let root = tempfile::tempdir().expect("tempdir");
        let subs = setup(root.path());
        let n = subs.create_submission(TASK, USER, b"x", "a.py").unwrap();
        let dir = PathScheme::new(root.path()).submission_dir(TASK, USER, n);

        fs::write(dir.join("solution.c"), b"y").unwrap();
        assert!(matches!(
            subs.get_submission_solution(TASK, USER, n),
            Err(StorageError::MultipleSolutionsFound { .. })
        ));

        fs::remove_file(dir.join("solution.c")).unwrap();
        fs::remove_file(dir.join("solution.py")).unwrap();
        assert!(matches!(
            subs.get_submission_solution(TASK, USER, n),
            Err(StorageError::NoSolutionFound { .. })
        ));
    }
}
