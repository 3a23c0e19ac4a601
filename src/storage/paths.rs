//! Canonical on-disk layout for tasks and submissions.
//!
//! ```text
//! <root>/tasks/task{ID}/src/description.pdf
//! <root>/tasks/task{ID}/src/input/{n}.in
//! <root>/tasks/task{ID}/src/output/{n}.out
//! <root>/tasks/task{ID}/submissions/user{UID}/submission{N}/solution.{ext}
//! <root>/tasks/task{ID}/submissions/user{UID}/submission{N}/output/...
//! ```
//!
//! Everything here is pure path arithmetic; nothing touches the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const TASKS_DIR: &str = "tasks";
pub const SRC_DIR: &str = "src";
pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";
pub const SUBMISSIONS_DIR: &str = "submissions";
pub const DESCRIPTION_FILE: &str = "description.pdf";
pub const SOLUTION_STEM: &str = "solution";
pub const COMPILE_ERROR_FILE: &str = "compile-error.err";

/// Identifier of a task (positive integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user submitting against a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn input_name(n: u32) -> String {
    format!("{}.in", n)
}

pub fn output_name(n: u32) -> String {
    format!("{}.out", n)
}

/// Maps identities to paths under a storage root.
#[derive(Debug, Clone)]
pub struct PathScheme {
    tasks_root: PathBuf,
}

impl PathScheme {
    /// `root` is the configured storage root; tasks live in `root/tasks`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            tasks_root: root.as_ref().join(TASKS_DIR),
        }
    }

    pub fn tasks_root(&self) -> &Path {
        &self.tasks_root
    }

    pub fn task_dir(&self, task: TaskId) -> PathBuf {
        self.tasks_root.join(format!("task{}", task))
    }

    pub fn src_dir(&self, task: TaskId) -> PathBuf {
        self.task_dir(task).join(SRC_DIR)
    }

    pub fn input_dir(&self, task: TaskId) -> PathBuf {
        self.src_dir(task).join(INPUT_DIR)
    }

    pub fn output_dir(&self, task: TaskId) -> PathBuf {
        self.src_dir(task).join(OUTPUT_DIR)
    }

    pub fn description_file(&self, task: TaskId) -> PathBuf {
        self.src_dir(task).join(DESCRIPTION_FILE)
    }

    pub fn input_file(&self, task: TaskId, n: u32) -> PathBuf {
        self.input_dir(task).join(input_name(n))
    }

    pub fn output_file(&self, task: TaskId, n: u32) -> PathBuf {
        self.output_dir(task).join(output_name(n))
    }

    pub fn submissions_dir(&self, task: TaskId) -> PathBuf {
        self.task_dir(task).join(SUBMISSIONS_DIR)
    }

    pub fn user_dir(&self, task: TaskId, user: UserId) -> PathBuf {
        self.submissions_dir(task).join(format!("user{}", user))
    }

    pub fn submission_dir(&self, task: TaskId, user: UserId, submission: u32) -> PathBuf {
        self.user_dir(task, user)
            .join(format!("submission{}", submission))
    }

    /// Where a submission's program-generated outputs are stored.
    pub fn submission_output_dir(&self, task: TaskId, user: UserId, submission: u32) -> PathBuf {
        self.submission_dir(task, user, submission).join(OUTPUT_DIR)
    }

    pub fn solution_file(&self, task: TaskId, user: UserId, submission: u32, ext: &str) -> PathBuf {
        self.submission_dir(task, user, submission)
            .join(format!("{}{}", SOLUTION_STEM, ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_layout_nests_under_tasks_root() {
        let scheme = PathScheme::new("/data");
        let task = TaskId(7);
        assert_eq!(scheme.task_dir(task), PathBuf::from("/data/tasks/task7"));
        assert_eq!(
            scheme.description_file(task),
            PathBuf::from("/data/tasks/task7/src/description.pdf")
        );
        assert_eq!(
            scheme.input_file(task, 3),
            PathBuf::from("/data/tasks/task7/src/input/3.in")
        );
        assert_eq!(
            scheme.output_file(task, 3),
            PathBuf::from("/data/tasks/task7/src/output/3.out")
        );
    }

    #[test]
    fn submission_layout() {
        let scheme = PathScheme::new("/data");
        let (task, user) = (TaskId(1), UserId(42));
        assert_eq!(
            scheme.submission_output_dir(task, user, 2),
            PathBuf::from("/data/tasks/task1/submissions/user42/submission2/output")
        );
        assert_eq!(
            scheme.solution_file(task, user, 2, ".py"),
            PathBuf::from("/data/tasks/task1/submissions/user42/submission2/solution.py")
        );
    }
}
