//! Shape validation for a proposed task file set.
//!
//! A payload maps a relative path to its bytes. Paths use one of three prefixes:
//! `description.pdf`, `input/{name}`, `output/{name}`. Validation is pure: it never
//! touches the filesystem, so a rejected payload cannot trigger a backup/restore cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::paths::{DESCRIPTION_FILE, INPUT_DIR, OUTPUT_DIR};

/// Relative path -> file contents.
pub type TaskFiles = BTreeMap<String, Vec<u8>>;

static INPUT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9][0-9]*)\.in$").expect("static regex"));
static OUTPUT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-9][0-9]*)\.out$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKind {
    Input,
    Output,
}

impl fmt::Display for FixtureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureKind::Input => write!(f, "input"),
            FixtureKind::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unrecognized path '{0}'")]
    UnrecognizedPath(String),

    #[error("description file '{0}' must have a .pdf extension")]
    InvalidDescriptionExtension(String),

    #[error("description file is missing")]
    MissingDescription,

    #[error("more than one description file")]
    MultipleDescriptions,

    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("duplicate {kind} file number {number}")]
    DuplicateFileNumber { kind: FixtureKind, number: u32 },

    #[error("number of input files ({inputs}) does not match number of output files ({outputs})")]
    CountMismatch { inputs: usize, outputs: usize },

    #[error("{kind} files are not numbered 1..={count}: {missing} is missing")]
    NonSequentialNumbering {
        kind: FixtureKind,
        count: usize,
        missing: u32,
    },
}

/// One input or output fixture that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture<'a> {
    pub number: u32,
    /// Base name as uploaded, e.g. `3.in`.
    pub name: &'a str,
    pub contents: &'a [u8],
}

/// A payload that passed validation. Fixtures are sorted by number.
#[derive(Debug)]
pub struct ValidatedTask<'a> {
    pub description: &'a [u8],
    pub inputs: Vec<Fixture<'a>>,
    pub outputs: Vec<Fixture<'a>>,
}

impl ValidatedTask<'_> {
    pub fn fixture_count(&self) -> usize {
        self.inputs.len()
    }
}

enum Entry<'a> {
    Description,
    Fixture(FixtureKind, &'a str),
}

fn classify(path: &str) -> Result<Entry<'_>, ValidationError> {
    if let Some(rest) = strip_dir(path, INPUT_DIR) {
        return Ok(Entry::Fixture(FixtureKind::Input, base_name(rest)));
    }
    if let Some(rest) = strip_dir(path, OUTPUT_DIR) {
        return Ok(Entry::Fixture(FixtureKind::Output, base_name(rest)));
    }

    let (stem, _) = DESCRIPTION_FILE
        .rsplit_once('.')
        .unwrap_or((DESCRIPTION_FILE, ""));
    let top_level_stem = path.split('.').next().filter(|_| !path.contains('/'));
    if top_level_stem.is_some_and(|s| s.eq_ignore_ascii_case(stem)) {
        if path.eq_ignore_ascii_case(DESCRIPTION_FILE) {
            return Ok(Entry::Description);
        }
        return Err(ValidationError::InvalidDescriptionExtension(path.to_string()));
    }

    Err(ValidationError::UnrecognizedPath(path.to_string()))
}

/// `input/a/1.in` -> `a/1.in` for dir `input`; `None` when the prefix or the rest is absent.
fn strip_dir<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(dir)?.strip_prefix('/')?;
    if rest.is_empty() || rest.ends_with('/') {
        None
    } else {
        Some(rest)
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse `{n}.in` / `{n}.out` (positive, no leading zeros).
pub fn fixture_number(kind: FixtureKind, name: &str) -> Option<u32> {
    let re = match kind {
        FixtureKind::Input => &*INPUT_NAME,
        FixtureKind::Output => &*OUTPUT_NAME,
    };
    re.captures(name)?.get(1)?.as_str().parse().ok()
}

/// Validate `files` and return them grouped, or the first violation found.
pub fn validate_task_files(files: &TaskFiles) -> Result<ValidatedTask<'_>, ValidationError> {
    let mut description = None;
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut seen_inputs = BTreeSet::new();
    let mut seen_outputs = BTreeSet::new();

    for (path, contents) in files {
        match classify(path)? {
            Entry::Description => {
                if description.replace(contents.as_slice()).is_some() {
                    return Err(ValidationError::MultipleDescriptions);
                }
            }
            Entry::Fixture(kind, name) => {
                let number = fixture_number(kind, name)
                    .ok_or_else(|| ValidationError::InvalidFileName(path.clone()))?;
                let (seen, list) = match kind {
                    FixtureKind::Input => (&mut seen_inputs, &mut inputs),
                    FixtureKind::Output => (&mut seen_outputs, &mut outputs),
                };
                if !seen.insert(number) {
                    return Err(ValidationError::DuplicateFileNumber { kind, number });
                }
                list.push(Fixture {
                    number,
                    name,
                    contents: contents.as_slice(),
                });
            }
        }
    }

    let description = description.ok_or(ValidationError::MissingDescription)?;

    if inputs.len() != outputs.len() {
        return Err(ValidationError::CountMismatch {
            inputs: inputs.len(),
            outputs: outputs.len(),
        });
    }

    check_sequential(FixtureKind::Input, &seen_inputs)?;
    check_sequential(FixtureKind::Output, &seen_outputs)?;

    inputs.sort_by_key(|f| f.number);
    outputs.sort_by_key(|f| f.number);

    Ok(ValidatedTask {
        description,
        inputs,
        outputs,
    })
}

fn check_sequential(kind: FixtureKind, numbers: &BTreeSet<u32>) -> Result<(), ValidationError> {
    for (expected, actual) in (1u32..).zip(numbers.iter().copied()) {
        if expected != actual {
            return Err(ValidationError::NonSequentialNumbering {
                kind,
                count: numbers.len(),
                missing: expected,
            });
        }
    }
    Ok(())
}
