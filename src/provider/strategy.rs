use std::path::Path;
use async_trait::async_trait;
use crate::config::{DatabaseCredentials, ToolSettings};
use crate::error::BackupResult;
use crate::provider::mysql::MySqlStrategy;
use crate::provider::postgres::PostgresStrategy;
use crate::provider::Provider;

#[async_trait]
pub trait DatabaseStrategy: Send + Sync {
    /// Write a plain, replayable SQL script for the database to `destination`,
    /// replacing whatever was there.
    async fn dump(&self, credentials: &DatabaseCredentials, destination: &Path) -> BackupResult<()>;

    /// Replay the SQL script at `source` against the database.
    async fn load(&self, credentials: &DatabaseCredentials, source: &Path) -> BackupResult<()>;
}

/// One variant per supported engine.
#[derive(Debug, Clone)]
pub enum Strategy {
    Postgres(PostgresStrategy),
    MySql(MySqlStrategy),
}

impl Strategy {
    pub fn for_provider(provider: Provider, settings: ToolSettings) -> Strategy {
        match provider {
            Provider::Postgres => Strategy::Postgres(PostgresStrategy::new(settings)),
            Provider::MySql => Strategy::MySql(MySqlStrategy::new(settings)),
        }
    }

    fn inner(&self) -> &dyn DatabaseStrategy {
        match self {
            Strategy::Postgres(strategy) => strategy as &dyn DatabaseStrategy,
            Strategy::MySql(strategy) => strategy as &dyn DatabaseStrategy,
        }
    }
}

#[async_trait]
impl DatabaseStrategy for Strategy {
    async fn dump(&self, credentials: &DatabaseCredentials, destination: &Path) -> BackupResult<()> {
        self.inner().dump(credentials, destination).await
    }

    async fn load(&self, credentials: &DatabaseCredentials, source: &Path) -> BackupResult<()> {
        self.inner().load(credentials, source).await
    }
}
