use crate::config::LogbenchConfig;
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::fs::OpenOptions;
use tokio::process::Command;
use tracing::{debug, info};

/// Control over the syslog receiver the pipeline writes into.
#[async_trait]
pub trait ReceiverControl: Send + Sync {
    /// Empties the receiver's destination log and restarts the service.
    async fn reset(&self) -> Result<()>;

    /// Executable name used to resolve the receiver's pid.
    fn process_name(&self) -> &str;
}

pub struct SyslogReceiver {
    log_file: PathBuf,
    restart_argv: Vec<String>,
    process_name: String,
}

impl SyslogReceiver {
    pub fn new(log_file: PathBuf, restart_argv: Vec<String>, process_name: String) -> Self {
        Self {
            log_file,
            restart_argv,
            process_name,
        }
    }

    pub fn from_config(config: &LogbenchConfig) -> Self {
        Self::new(
            config.receiver_log_file.clone(),
            config.receiver_restart_argv(),
            config.receiver_process.clone(),
        )
    }

    async fn truncate_log(&self) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.log_file)
            .await
            .map_err(|e| {
                BenchError::EnvironmentReset(format!(
                    "cannot truncate {}: {}",
                    self.log_file.display(),
                    e
                ))
            })?;

        debug!("Truncated {:?}", self.log_file);
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        let (program, args) = self.restart_argv.split_first().ok_or_else(|| {
            BenchError::EnvironmentReset("no receiver restart command configured".to_string())
        })?;

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                BenchError::EnvironmentReset(format!(
                    "cannot run '{}': {}",
                    self.restart_argv.join(" "),
                    e
                ))
            })?;

        if !status.success() {
            return Err(BenchError::EnvironmentReset(format!(
                "'{}' exited with {}",
                self.restart_argv.join(" "),
                status
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ReceiverControl for SyslogReceiver {
    async fn reset(&self) -> Result<()> {
        self.truncate_log().await?;
        self.restart().await?;
        info!("Receiver {} reset", self.process_name);
        Ok(())
    }

    fn process_name(&self) -> &str {
        &self.process_name
    }
}
