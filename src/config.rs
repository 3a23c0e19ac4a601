//! Configuration for the file storage service.
//!
//! Configuration is read from environment variables:
//! - `ROOT_DIRECTORY` - Optional. Storage root; tasks live in `ROOT_DIRECTORY/tasks`. Defaults to `storage`.
//! - `ALLOWED_FILE_TYPES` - Optional. Comma-separated solution extensions. Defaults to `.c,.cpp,.py`.
//! - `BACKUP_DIRECTORY` - Optional. Where overwrite snapshots and bundles are staged. Defaults to the system temp dir.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `APP_PORT` - Optional. Server port. Defaults to `8080`.
//! - `TASK_UPLOAD_LIMIT_MB` - Optional. Body limit for task uploads. Defaults to `50`.
//! - `SUBMISSION_UPLOAD_LIMIT_MB` - Optional. Body limit for submissions and outputs. Defaults to `10`.

use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_ALLOWED_FILE_TYPES: &str = ".c,.cpp,.py";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root directory
    pub root_directory: PathBuf,

    /// Allowed solution extensions, lowercased, each starting with `.`
    pub allowed_file_types: Vec<String>,

    /// Staging directory for backups and bundles (`None` = system temp dir)
    pub backup_directory: Option<PathBuf>,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Max body size of `/createTask`, in bytes
    pub task_upload_limit: usize,

    /// Max body size of `/submit` and `/storeOutputs`, in bytes
    pub submission_upload_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns `None` for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let root_directory = lookup("ROOT_DIRECTORY")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("storage"));

        let allowed_file_types = parse_file_types(
            &lookup("ALLOWED_FILE_TYPES").unwrap_or_else(|| DEFAULT_ALLOWED_FILE_TYPES.to_string()),
        )?;

        let backup_directory = lookup("BACKUP_DIRECTORY")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = parse_or(&lookup, "APP_PORT", 8080u16)?;
        let task_upload_limit = megabytes(parse_or(&lookup, "TASK_UPLOAD_LIMIT_MB", 50usize)?);
        let submission_upload_limit =
            megabytes(parse_or(&lookup, "SUBMISSION_UPLOAD_LIMIT_MB", 10usize)?);

        Ok(Self {
            root_directory,
            allowed_file_types,
            backup_directory,
            host,
            port,
            task_upload_limit,
            submission_upload_limit,
        })
    }

    /// Create a config rooted at `root` with default values (useful for testing).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root.into(),
            allowed_file_types: DEFAULT_ALLOWED_FILE_TYPES
                .split(',')
                .map(str::to_string)
                .collect(),
            backup_directory: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            task_upload_limit: megabytes(50),
            submission_upload_limit: megabytes(10),
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn parse_file_types(raw: &str) -> Result<Vec<String>, ConfigError> {
    let types: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    if let Some(bad) = types.iter().find(|t| !t.starts_with('.') || t.len() < 2) {
        return Err(ConfigError::InvalidValue(
            "ALLOWED_FILE_TYPES".to_string(),
            format!("'{}' must start with '.'", bad),
        ));
    }
    if types.is_empty() {
        return Err(ConfigError::InvalidValue(
            "ALLOWED_FILE_TYPES".to_string(),
            "no file types given".to_string(),
        ));
    }
    Ok(types)
}

fn megabytes(mb: usize) -> usize {
    mb.saturating_mul(1024 * 1024)
}
