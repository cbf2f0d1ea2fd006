use std::path::PathBuf;
use chrono::{Local, NaiveDateTime};
use log::{debug, info};
use tempfile::TempDir;
use crate::archive;
use crate::bundle::{self, DUMP_ENTRY, FILES_ENTRY};
use crate::config::{Config, DatabaseCredentials};
use crate::error::{BackupError, BackupResult, Stage, StageContext, StageError};
use crate::provider::list_available_providers;
use crate::provider::strategy::{DatabaseStrategy, Strategy};
use crate::utils::{format_size, get_size};

pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Orchestrator {
        Orchestrator { config }
    }

    /// Dump the database and archive the uploads into a new bundle under the
    /// backup directory. Nothing is published unless every stage succeeds.
    pub async fn backup(&self) -> Result<PathBuf, StageError> {
        self.backup_at(Local::now().naive_local()).await
    }

    pub async fn backup_at(&self, timestamp: NaiveDateTime) -> Result<PathBuf, StageError> {
        info!("Starting backup");
        let (credentials, strategy) = self.prepare().stage(Stage::ValidateConfig)?;
        let upload_dir = self.config.upload_dir();
        if !upload_dir.is_dir() {
            return Err(StageError {
                stage: Stage::ValidateConfig,
                error: BackupError::Configuration(format!(
                    "upload directory {} does not exist",
                    upload_dir.display()
                )),
            });
        }

        // Removed on every return path from here on.
        let workspace = self.workspace().stage(Stage::PrepareWorkspace)?;

        let dump = workspace.path().join(DUMP_ENTRY);
        strategy.dump(&credentials, &dump).await.stage(Stage::DumpDatabase)?;
        info!("-> Dumped!");

        let files = workspace.path().join(FILES_ENTRY);
        let entries = archive::snapshot(&upload_dir, &files).stage(Stage::ArchiveFiles)?;
        info!("-> Archived {} entries", entries);

        let file_name = bundle::bundle_file_name(timestamp);
        let published = bundle::write_bundle(&dump, &files, &self.config.backup_dir(), &file_name)
            .stage(Stage::BundleAndTimestamp)?;

        match get_size(&published) {
            Ok(size) => info!("Backup written to {} ({})", published.display(), format_size(size)),
            Err(_) => info!("Backup written to {}", published.display()),
        }
        if let Ok(bundles) = bundle::list_bundles(&self.config.backup_dir()) {
            debug!("{} bundles in {}", bundles.len(), self.config.backup_dir().display());
            if let Some(oldest) = bundles.last() {
                debug!(
                    "Oldest bundle {} from {} ({})",
                    oldest.file_name,
                    oldest.created_at,
                    format_size(oldest.size_bytes)
                );
            }
        }
        Ok(published)
    }

    /// Replay the named bundle: database first, then the uploaded files.
    ///
    /// If the database load fails the files are left alone; the two restores
    /// cannot be rolled back together.
    pub async fn restore(&self, bundle_name: &str) -> Result<(), StageError> {
        info!("Starting restore of {}", bundle_name);
        let (credentials, strategy) = self.prepare().stage(Stage::ValidateConfig)?;

        let bundle_path = bundle::locate_bundle(&self.config.backup_dir(), bundle_name)
            .stage(Stage::LocateBundle)?;

        let workspace = self.workspace().stage(Stage::PrepareWorkspace)?;
        let unpacked = bundle::unpack_bundle(&bundle_path, workspace.path()).stage(Stage::Unpack)?;
        debug!("Unpacked {} into {}", bundle_path.display(), workspace.path().display());

        strategy.load(&credentials, &unpacked.dump).await.stage(Stage::RestoreDatabase)?;
        info!("-> Database restored");

        archive::restore(&unpacked.files, &self.config.upload_dir(), workspace.path())
            .stage(Stage::RestoreFiles)?;
        info!("-> Files restored");
        Ok(())
    }

    fn prepare(&self) -> BackupResult<(DatabaseCredentials, Strategy)> {
        self.config.validate()?;
        let credentials = self.config.credentials()?;
        let settings = self.config.tool_settings();

        let available = list_available_providers(settings.bin_dir.as_deref());
        available.require(credentials.provider)?;

        let strategy = Strategy::for_provider(credentials.provider, settings);
        Ok((credentials, strategy))
    }

    fn workspace(&self) -> BackupResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("backup-workspace-");
        let workspace = match self.config.workspace_dir() {
            Some(parent) => {
                std::fs::create_dir_all(&parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("Workspace at {}", workspace.path().display());
        Ok(workspace)
    }
}
