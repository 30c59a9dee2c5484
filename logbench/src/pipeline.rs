use crate::config::{BenchmarkConfig, LogbenchConfig};
use crate::error::{BenchError, Result};
use crate::process::{describe, ProcessHandle, SignalSender};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PRODUCER_STAGE: &str = "producer";
pub const AGENT_STAGE: &str = "agent";

/// Launches producer | agent pipelines.
pub struct PipelineSupervisor {
    producer_path: String,
    agent_path: String,
    config_dir: PathBuf,
    stop_grace: Duration,
    signals: Arc<dyn SignalSender>,
}

/// A running pipeline. Dropping it without `stop` removes the config file
/// and sends SIGTERM to the producer without waiting.
#[derive(Debug)]
pub struct PipelineState {
    producer: ProcessHandle,
    agent: ProcessHandle,
    config_artifact_path: PathBuf,
    stop_grace: Duration,
    stopped: bool,
}

/// Agent settings file, one `key=value` per line.
pub fn render_agent_config(config: &BenchmarkConfig) -> String {
    format!(
        "queuesize={}\ninputbuffersize={}\noutputtype=syslog\n",
        config.queue_size, config.input_buffer_size
    )
}

impl PipelineSupervisor {
    pub fn new(settings: &LogbenchConfig, signals: Arc<dyn SignalSender>) -> Self {
        Self {
            producer_path: settings.producer_path.clone(),
            agent_path: settings.agent_path.clone(),
            config_dir: settings.config_dir.clone(),
            stop_grace: settings.stop_grace(),
            signals,
        }
    }

    pub async fn start(&self, config: &BenchmarkConfig) -> Result<PipelineState> {
        let config_path = self.write_agent_config(config).await?;

        let producer_args = vec![
            config.message_length.to_string(),
            config.message_rate.to_string(),
        ];
        let producer_command = describe(&self.producer_path, &producer_args);

        let mut cmd = Command::new(&self.producer_path);
        cmd.args(&producer_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut producer = match ProcessHandle::spawn(
            PRODUCER_STAGE,
            cmd,
            producer_command.clone(),
            self.signals.clone(),
        ) {
            Ok(producer) => producer,
            Err(source) => {
                remove_config(&config_path).await;
                return Err(BenchError::Spawn {
                    stage: PRODUCER_STAGE.to_string(),
                    command: producer_command,
                    source,
                });
            }
        };

        let agent_args = vec![
            "-config".to_string(),
            config_path.to_string_lossy().into_owned(),
        ];
        let agent_command = describe(&self.agent_path, &agent_args);

        let agent = match self.spawn_agent(&mut producer, &agent_args, &agent_command) {
            Ok(agent) => agent,
            Err(source) => {
                if let Err(e) = producer.shutdown(self.stop_grace).await {
                    warn!("Failed to stop producer after agent failure: {}", e);
                }
                remove_config(&config_path).await;
                return Err(BenchError::PipelineSpawn {
                    stage: AGENT_STAGE.to_string(),
                    command: agent_command,
                    source,
                });
            }
        };

        info!(
            "Pipeline running: producer PID {}, agent PID {}",
            producer.pid(),
            agent.pid()
        );

        Ok(PipelineState {
            producer,
            agent,
            config_artifact_path: config_path,
            stop_grace: self.stop_grace,
            stopped: false,
        })
    }

    fn spawn_agent(
        &self,
        producer: &mut ProcessHandle,
        args: &[String],
        command: &str,
    ) -> std::io::Result<ProcessHandle> {
        let stdout = producer.take_stdout().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "producer stdout was not captured",
            )
        })?;
        let stdin: Stdio = stdout.try_into()?;

        let mut cmd = Command::new(&self.agent_path);
        cmd.args(args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        ProcessHandle::spawn(AGENT_STAGE, cmd, command.to_string(), self.signals.clone())
    }

    async fn write_agent_config(&self, config: &BenchmarkConfig) -> Result<PathBuf> {
        let path = self
            .config_dir
            .join(format!("logbench_agent_{}.conf", Uuid::new_v4()));
        let contents = render_agent_config(config);

        let write = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(contents.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await
        };

        if let Err(source) = write.await {
            remove_config(&path).await;
            return Err(BenchError::ConfigWrite { path, source });
        }

        debug!("Wrote agent config {:?}", path);
        Ok(path)
    }
}

impl PipelineState {
    pub fn producer_pid(&self) -> u32 {
        self.producer.pid()
    }

    pub fn agent_pid(&self) -> u32 {
        self.agent.pid()
    }

    pub fn config_artifact_path(&self) -> &Path {
        &self.config_artifact_path
    }

    /// Removes the config file and stops the producer. The agent is left to
    /// drain its input and exit on end-of-stream.
    pub async fn stop(mut self) -> Result<()> {
        remove_config(&self.config_artifact_path).await;

        self.producer.shutdown(self.stop_grace).await?;

        match tokio::time::timeout(self.stop_grace, self.agent.wait()).await {
            Ok(Ok(status)) => debug!("Agent exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for agent: {}", e),
            Err(_) => warn!(
                "Agent PID {} still running {:?} after producer stopped",
                self.agent.pid(),
                self.stop_grace
            ),
        }

        self.stopped = true;
        info!("Pipeline stopped");
        Ok(())
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }

        warn!(
            "Pipeline dropped without stop, terminating producer PID {}",
            self.producer.pid()
        );
        match std::fs::remove_file(&self.config_artifact_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove agent config {:?}: {}",
                self.config_artifact_path, e
            ),
        }
        if let Err(e) = self.producer.terminate() {
            warn!("Failed to terminate producer: {}", e);
        }
    }
}

async fn remove_config(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed agent config {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove agent config {:?}: {}", path, e),
    }
}
