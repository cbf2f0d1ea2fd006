use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::fs;
use crate::error::{BackupError, BackupResult};
use crate::provider::Provider;

pub const DEFAULT_CONFIG_NAME: &str = "backup.yaml";

/// How text on a client's standard error is treated when it exits successfully.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StderrPolicy {
    /// Any output on standard error fails the invocation.
    #[default]
    Strict,
    /// Only the exit status decides; standard error is logged as a warning.
    Lenient,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub provider: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub bin_dir: Option<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub stderr_policy: StderrPolicy,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("provider", &self.provider)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bin_dir", &self.bin_dir)
            .field("timeout_secs", &self.timeout_secs)
            .field("stderr_policy", &self.stderr_policy)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct FilesConfig {
    pub upload_dir: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub database: DatabaseConfig,
    pub files: FilesConfig,
    pub backup_dir: String,
    /// Parent of the per-run scratch directory; the system temp dir when unset.
    pub workspace_dir: Option<String>,
}

/// Connection details handed to the dump and load strategies.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub provider: Provider,
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("provider", &self.provider)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Settings shared by every external client invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSettings {
    pub bin_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stderr_policy: StderrPolicy,
}

impl Config {
    pub async fn new(path: &Path) -> BackupResult<Config> {
        let config_str = fs::read_to_string(path).await.map_err(|e| {
            BackupError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let is_toml = path.extension().map_or(false, |ext| ext == "toml");
        let config = if is_toml {
            Config::from_toml(&config_str)?
        } else {
            Config::from_yaml(&config_str)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> BackupResult<Config> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml(contents: &str) -> BackupResult<Config> {
        Ok(toml::from_str(contents)?)
    }

    /// Rejects required settings that are present but empty.
    pub fn validate(&self) -> BackupResult<()> {
        let required = [
            ("database.provider", &self.database.provider),
            ("database.database", &self.database.database),
            ("database.user", &self.database.user),
            ("database.password", &self.database.password),
            ("files.upload-dir", &self.files.upload_dir),
            ("backup-dir", &self.backup_dir),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(BackupError::Configuration(format!("property {} does not exist", key)));
            }
        }
        self.database.provider.parse::<Provider>()?;
        Ok(())
    }

    pub fn credentials(&self) -> BackupResult<DatabaseCredentials> {
        Ok(DatabaseCredentials {
            provider: self.database.provider.parse()?,
            database: self.database.database.clone(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            host: self.database.host.clone(),
            port: self.database.port,
        })
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            bin_dir: self.database.bin_dir.as_ref().map(PathBuf::from),
            timeout: self.database.timeout_secs.map(Duration::from_secs),
            stderr_policy: self.database.stderr_policy,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.files.upload_dir)
    }

    pub fn backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.backup_dir)
    }

    pub fn workspace_dir(&self) -> Option<PathBuf> {
        self.workspace_dir.as_ref().map(PathBuf::from)
    }
}

/// `backup.yaml` next to the running executable, or in the working directory as a fallback.
pub fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME))
}
