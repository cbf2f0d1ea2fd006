pub mod mysql;
pub mod postgres;
pub mod process;
pub mod strategy;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::debug;
use crate::error::{BackupError, BackupResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Provider {
    Postgres,
    MySql,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Postgres, Provider::MySql];

    /// Identifier used in configuration files.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Postgres => "psql",
            Provider::MySql => "mysql",
        }
    }

    /// Interactive client whose presence marks the engine as installed.
    pub fn client_binary(&self) -> &'static str {
        match self {
            Provider::Postgres => "psql",
            Provider::MySql => "mysql",
        }
    }

    pub fn dump_binary(&self) -> &'static str {
        match self {
            Provider::Postgres => "pg_dump",
            Provider::MySql => "mysqldump",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "psql" | "postgres" | "postgresql" => Ok(Provider::Postgres),
            "mysql" | "mariadb" => Ok(Provider::MySql),
            other => Err(BackupError::Configuration(format!(
                "unknown database provider '{}', expected one of: psql, mysql",
                other
            ))),
        }
    }
}

/// Locate an engine binary, either inside `bin_dir` or on `PATH`.
pub fn resolve_binary(name: &str, bin_dir: Option<&Path>) -> Option<PathBuf> {
    let found = match bin_dir {
        Some(dir) => which::which_in(name, Some(dir), dir),
        None => which::which(name),
    };
    found.ok()
}

/// Engines whose client binary was found on this host during the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableProviders {
    providers: BTreeSet<Provider>,
}

impl AvailableProviders {
    pub fn validate(&self, provider: Provider) -> bool {
        self.providers.contains(&provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }

    /// Fails with a configuration error when `provider` was not detected.
    pub fn require(&self, provider: Provider) -> BackupResult<()> {
        if self.validate(provider) {
            return Ok(());
        }
        let installed = self.iter().map(Provider::id).collect::<Vec<_>>();
        let installed = if installed.is_empty() {
            "none".to_string()
        } else {
            installed.join(", ")
        };
        Err(BackupError::Configuration(format!(
            "provider {} not available (installed: {})",
            provider, installed
        )))
    }
}

impl FromIterator<Provider> for AvailableProviders {
    fn from_iter<I: IntoIterator<Item = Provider>>(iter: I) -> Self {
        AvailableProviders {
            providers: iter.into_iter().collect(),
        }
    }
}

pub fn list_available_providers(bin_dir: Option<&Path>) -> AvailableProviders {
    Provider::ALL
        .into_iter()
        .filter(|provider| match resolve_binary(provider.client_binary(), bin_dir) {
            Some(path) => {
                debug!("Found {} client at {}", provider, path.display());
                true
            }
            None => {
                debug!("No {} client found", provider);
                false
            }
        })
        .collect()
}
