use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid setting, or a provider that is not installed.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{tool} {}: {}", exit_label(.exit_code), stderr_label(.stderr))]
    ExternalTool {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("backup {} does not exist", .0.display())]
    BundleNotFound(PathBuf),

    #[error("backup {} is corrupt: {reason}", .path.display())]
    BundleCorrupt { path: PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated".to_string(),
    }
}

fn stderr_label(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        "no error output".to_string()
    } else {
        trimmed.to_string()
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Filesystem(err.to_string())
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        Self::Filesystem(err.to_string())
    }
}

impl From<zip::result::ZipError> for BackupError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<toml::de::Error> for BackupError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

/// Orchestrator stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateConfig,
    /// Creating the per-run scratch directory, shared by backup and restore.
    PrepareWorkspace,
    DumpDatabase,
    ArchiveFiles,
    BundleAndTimestamp,
    LocateBundle,
    Unpack,
    RestoreDatabase,
    RestoreFiles,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ValidateConfig => "validate config",
            Stage::PrepareWorkspace => "create workspace",
            Stage::DumpDatabase => "dump database",
            Stage::ArchiveFiles => "archive files",
            Stage::BundleAndTimestamp => "bundle",
            Stage::LocateBundle => "locate bundle",
            Stage::Unpack => "unpack bundle",
            Stage::RestoreDatabase => "restore database",
            Stage::RestoreFiles => "restore files",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("{stage} failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: BackupError,
}

pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for BackupResult<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}
