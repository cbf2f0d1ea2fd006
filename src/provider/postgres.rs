use std::fs::File;
use std::path::Path;
use async_trait::async_trait;
use log::info;
use crate::config::{DatabaseCredentials, ToolSettings};
use crate::error::{BackupError, BackupResult};
use crate::provider::process::Invocation;
use crate::provider::strategy::DatabaseStrategy;
use crate::provider::Provider;

/// Environment variable the libpq clients read the password from.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

#[derive(Debug, Clone, Default)]
pub struct PostgresStrategy {
    settings: ToolSettings,
}

impl PostgresStrategy {
    pub fn new(settings: ToolSettings) -> PostgresStrategy {
        PostgresStrategy { settings }
    }

    fn create_command(&self, tool: &'static str, credentials: &DatabaseCredentials) -> BackupResult<Invocation> {
        let mut cmd = Invocation::new(tool, &self.settings)?;
        cmd.env(PASSWORD_ENV, &credentials.password);
        cmd.arg("-U").arg(&credentials.user);
        if let Some(host) = &credentials.host {
            cmd.arg("-h").arg(host);
        }
        if let Some(port) = credentials.port {
            cmd.arg("-p").arg(port.to_string());
        }
        Ok(cmd)
    }
}

#[async_trait]
impl DatabaseStrategy for PostgresStrategy {
    async fn dump(&self, credentials: &DatabaseCredentials, destination: &Path) -> BackupResult<()> {
        info!("Dumping database: {}", credentials.database);
        let mut cmd = self.create_command(Provider::Postgres.dump_binary(), credentials)?;
        cmd.arg("--inserts").arg("--clean").arg(&credentials.database);

        let output = File::create(destination).map_err(|e| {
            BackupError::Filesystem(format!("cannot create {}: {}", destination.display(), e))
        })?;
        cmd.stdout(output);
        cmd.run(&self.settings).await
    }

    async fn load(&self, credentials: &DatabaseCredentials, source: &Path) -> BackupResult<()> {
        info!("Loading database: {}", credentials.database);
        let mut cmd = self.create_command(Provider::Postgres.client_binary(), credentials)?;
        cmd.arg("-d").arg(&credentials.database);
        cmd.stdin_from(source);
        cmd.run(&self.settings).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use crate::provider::test_support::write_script;

    fn credentials() -> DatabaseCredentials {
        DatabaseCredentials {
            provider: Provider::Postgres,
            database: "app".into(),
            user: "app_user".into(),
            password: "s3cret".into(),
            host: None,
            port: None,
        }
    }

    fn strategy(bin: &TempDir) -> PostgresStrategy {
        PostgresStrategy::new(ToolSettings {
            bin_dir: Some(bin.path().to_path_buf()),
            ..ToolSettings::default()
        })
    }

    #[tokio::test]
    async fn test_dump_writes_stdout_to_destination() {
        let bin = TempDir::new().unwrap();
        let args = bin.path().join("args");
        write_script(
            bin.path(),
            "pg_dump",
            &format!(
                "[ \"$PGPASSWORD\" = s3cret ] || exit 3\nprintf '%s\\n' \"$@\" > '{}'\necho 'DROP TABLE public.users;'\necho 'CREATE TABLE public.users (id integer);'",
                args.display()
            ),
        );
        let destination = bin.path().join("dump.sql");
        fs::write(&destination, "stale content that must disappear\n").unwrap();

        strategy(&bin).dump(&credentials(), &destination).await.unwrap();

        let dump = fs::read_to_string(&destination).unwrap();
        assert!(dump.starts_with("DROP TABLE"));
        assert!(!dump.contains("stale"));

        let args = fs::read_to_string(&args).unwrap();
        assert_eq!(args, "-U\napp_user\n--inserts\n--clean\napp\n");
        assert!(!args.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_dump_passes_host_and_port() {
        let bin = TempDir::new().unwrap();
        let args = bin.path().join("args");
        write_script(bin.path(), "pg_dump", &format!("printf '%s\\n' \"$@\" > '{}'", args.display()));

        let mut credentials = credentials();
        credentials.host = Some("db.internal".into());
        credentials.port = Some(5433);
        strategy(&bin).dump(&credentials, &bin.path().join("dump.sql")).await.unwrap();

        let args = fs::read_to_string(&args).unwrap();
        assert_eq!(args, "-U\napp_user\n-h\ndb.internal\n-p\n5433\n--inserts\n--clean\napp\n");
    }

    #[tokio::test]
    async fn test_dump_failure_surfaces_stderr() {
        let bin = TempDir::new().unwrap();
        write_script(bin.path(), "pg_dump", "echo 'pg_dump: error: connection refused' >&2; exit 1");

        let err = strategy(&bin)
            .dump(&credentials(), &bin.path().join("dump.sql"))
            .await
            .unwrap_err();
        match err {
            BackupError::ExternalTool { tool, exit_code, stderr } => {
                assert_eq!(tool, "pg_dump");
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("connection refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_streams_dump_to_psql() {
        let bin = TempDir::new().unwrap();
        let args = bin.path().join("args");
        let received = bin.path().join("received.sql");
        write_script(
            bin.path(),
            "psql",
            &format!(
                "[ \"$PGPASSWORD\" = s3cret ] || exit 3\nprintf '%s\\n' \"$@\" > '{}'\ncat > '{}'",
                args.display(),
                received.display()
            ),
        );
        let source = bin.path().join("dump.sql");
        fs::write(&source, "DROP TABLE public.users;\nCREATE TABLE public.users (id integer);\n").unwrap();

        strategy(&bin).load(&credentials(), &source).await.unwrap();

        assert_eq!(fs::read_to_string(&args).unwrap(), "-U\napp_user\n-d\napp\n");
        assert_eq!(fs::read_to_string(&received).unwrap(), fs::read_to_string(&source).unwrap());
    }
}
