use std::path::Path;
use async_trait::async_trait;
use log::info;
use crate::config::{DatabaseCredentials, ToolSettings};
use crate::error::BackupResult;
use crate::provider::process::Invocation;
use crate::provider::strategy::DatabaseStrategy;
use crate::provider::Provider;

/// The clients always print this when given `-p<password>`; it is not a failure.
const PASSWORD_WARNING: &[&str] = &["Using a password on the command line interface can be insecure"];

#[derive(Debug, Clone, Default)]
pub struct MySqlStrategy {
    settings: ToolSettings,
}

impl MySqlStrategy {
    pub fn new(settings: ToolSettings) -> MySqlStrategy {
        MySqlStrategy { settings }
    }

    fn create_command(&self, tool: &'static str, credentials: &DatabaseCredentials) -> BackupResult<Invocation> {
        let mut cmd = Invocation::new(tool, &self.settings)?;
        cmd.arg("-u").arg(&credentials.user);
        cmd.arg(format!("-p{}", credentials.password));
        if let Some(host) = &credentials.host {
            cmd.arg("-h").arg(host);
        }
        if let Some(port) = credentials.port {
            cmd.arg("-P").arg(port.to_string());
        }
        cmd.benign_stderr(PASSWORD_WARNING);
        Ok(cmd)
    }
}

#[async_trait]
impl DatabaseStrategy for MySqlStrategy {
    async fn dump(&self, credentials: &DatabaseCredentials, destination: &Path) -> BackupResult<()> {
        info!("Dumping database: {}", credentials.database);
        let mut cmd = self.create_command(Provider::MySql.dump_binary(), credentials)?;
        cmd.arg("--add-drop-table");
        cmd.arg("--databases").arg(&credentials.database);
        cmd.arg(format!("--result-file={}", destination.display()));
        cmd.run(&self.settings).await
    }

    async fn load(&self, credentials: &DatabaseCredentials, source: &Path) -> BackupResult<()> {
        info!("Loading database: {}", credentials.database);
        let mut cmd = self.create_command(Provider::MySql.client_binary(), credentials)?;
        cmd.arg(&credentials.database);
        cmd.stdin_from(source);
        cmd.run(&self.settings).await
    }
}
