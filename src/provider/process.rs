use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use log::{debug, warn};
use tokio::fs::File;
use tokio::process::Command;
use tokio::time::timeout;
use crate::config::{StderrPolicy, ToolSettings};
use crate::error::{BackupError, BackupResult};
use crate::provider::resolve_binary;

/// One run of an engine's command-line client.
pub struct Invocation {
    tool: &'static str,
    command: Command,
    stdin: Option<PathBuf>,
    benign_stderr: &'static [&'static str],
}

impl Invocation {
    pub fn new(tool: &'static str, settings: &ToolSettings) -> BackupResult<Invocation> {
        let command_path = resolve_binary(tool, settings.bin_dir.as_deref()).ok_or_else(|| {
            BackupError::Configuration(format!("{} was not found on this host", tool))
        })?;
        debug!("Using {} at {}", tool, command_path.display());

        let mut command = Command::new(command_path);
        command.stdout(Stdio::null());
        Ok(Invocation {
            tool,
            command,
            stdin: None,
            benign_stderr: &[],
        })
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.command.arg(arg);
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, value: V) -> &mut Self {
        self.command.env(key, value);
        self
    }

    pub fn stdout<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.command.stdout(cfg);
        self
    }

    /// Stream `path` to the client's standard input, unmodified and in file order.
    pub fn stdin_from(&mut self, path: &Path) -> &mut Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    /// Standard error lines containing any of `patterns` never count as failure output.
    pub fn benign_stderr(&mut self, patterns: &'static [&'static str]) -> &mut Self {
        self.benign_stderr = patterns;
        self
    }

    pub async fn run(self, settings: &ToolSettings) -> BackupResult<()> {
        let Invocation { tool, mut command, stdin, benign_stderr } = self;

        let source = match &stdin {
            Some(path) => {
                let file = File::open(path).await.map_err(|e| {
                    BackupError::Filesystem(format!("cannot open {}: {}", path.display(), e))
                })?;
                command.stdin(Stdio::piped());
                Some(file)
            }
            None => {
                command.stdin(Stdio::null());
                None
            }
        };
        command.stderr(Stdio::piped()).kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| BackupError::ExternalTool {
            tool: tool.to_string(),
            exit_code: None,
            stderr: format!("failed to start: {}", e),
        })?;

        // Feed stdin on its own task so a chatty stderr cannot deadlock the pipe.
        let feeder = match (source, child.stdin.take()) {
            (Some(mut file), Some(mut pipe)) => Some(tokio::spawn(async move {
                let copied = tokio::io::copy(&mut file, &mut pipe).await;
                drop(pipe);
                copied
            })),
            _ => None,
        };

        let waited = match settings.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Some(feeder) = &feeder {
                        feeder.abort();
                    }
                    return Err(BackupError::ExternalTool {
                        tool: tool.to_string(),
                        exit_code: None,
                        stderr: format!("timed out after {:?}", limit),
                    });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(bytes)) => debug!("Streamed {} bytes to {}", bytes, tool),
                // The client quit early; its exit status tells the story.
                Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(BackupError::Filesystem(format!("streaming input to {}: {}", tool, e))),
                Err(e) => return Err(BackupError::Filesystem(format!("streaming input to {}: {}", tool, e))),
            }
        }

        let stderr = significant_stderr(&String::from_utf8_lossy(&output.stderr), benign_stderr);
        if !output.status.success() {
            return Err(BackupError::ExternalTool {
                tool: tool.to_string(),
                exit_code: output.status.code(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            match settings.stderr_policy {
                StderrPolicy::Strict => {
                    return Err(BackupError::ExternalTool {
                        tool: tool.to_string(),
                        exit_code: output.status.code(),
                        stderr,
                    });
                }
                StderrPolicy::Lenient => warn!("{} reported: {}", tool, stderr),
            }
        }
        Ok(())
    }
}

fn significant_stderr(stderr: &str, benign: &[&str]) -> String {
    stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !benign.iter().any(|pattern| line.contains(pattern)))
        .collect::<Vec<_>>()
        .join("\n")
}
