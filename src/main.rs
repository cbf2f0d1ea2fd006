use std::error::Error;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use crate::config::{default_config_path, Config};
use crate::error::{Stage, StageContext};
use crate::orchestrator::Orchestrator;

mod archive;
mod bundle;
mod config;
mod error;
mod orchestrator;
mod provider;
mod utils;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Backup,
    Restore,
}

/// A utility for backing up data and uploaded files
#[derive(Parser, Debug)]
#[command(name = "backup", version)]
struct Cli {
    /// The action to carry out, i.e. a backup or restoration of data
    #[arg(short, long, value_enum)]
    action: Action,

    /// The path to the backup configuration file
    #[arg(short, long, env = "BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// The backup to restore
    #[arg(short, long, required_if_eq("action", "restore"))]
    backup: Option<String>,
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    info!("Using configuration {}", config_path.display());
    let config = Config::new(&config_path).await.stage(Stage::ValidateConfig)?;
    let orchestrator = Orchestrator::new(config);

    let action = async move {
        match cli.action {
            Action::Backup => {
                let bundle = orchestrator.backup().await?;
                println!("{}", bundle.display());
            }
            Action::Restore => {
                let backup = cli
                    .backup
                    .ok_or("if restore is specified, you must choose the backup to restore")?;
                orchestrator.restore(&backup).await?;
            }
        }
        Ok::<(), Box<dyn Error>>(())
    };
    until_interrupted(action, tokio::signal::ctrl_c()).await
}

/// Run `action` unless `interrupt` fires first. The abandoned action is dropped,
/// which removes its workspace and kills any running client.
async fn until_interrupted<A, I>(action: A, interrupt: I) -> Result<(), Box<dyn Error>>
where
    A: Future<Output = Result<(), Box<dyn Error>>>,
    I: Future<Output = io::Result<()>>,
{
    tokio::select! {
        result = action => result,
        Ok(()) = interrupt => {
            warn!("Interrupted, stopping");
            Err("interrupted before completion".into())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", error);
            ExitCode::FAILURE
        }
    }
}
