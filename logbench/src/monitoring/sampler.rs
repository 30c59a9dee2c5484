use super::metrics::{CycleParser, MetricEvent, Parsed};
use crate::broadcast::EventSink;
use crate::config::LogbenchConfig;
use crate::error::{BenchError, Result};
use crate::process::{describe, ProcessHandle, SignalSender};
use serde::Serialize;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the resource sampler is invoked.
#[derive(Debug, Clone)]
pub struct SamplerCommand {
    pub program: String,
    pub interval: Duration,
    pub stop_grace: Duration,
}

impl SamplerCommand {
    pub fn from_config(config: &LogbenchConfig) -> Self {
        Self {
            program: config.sampler_path.clone(),
            interval: config.sample_interval(),
            stop_grace: config.stop_grace(),
        }
    }

    /// CPU (`-u`), memory (`-r`) and context switches (`-w`) on one line
    /// per sample (`-h`).
    pub fn args(&self, pid: u32) -> Vec<String> {
        vec![
            "-p".to_string(),
            pid.to_string(),
            "-h".to_string(),
            "-r".to_string(),
            "-u".to_string(),
            "-w".to_string(),
            self.interval.as_secs().max(1).to_string(),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    pub published: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SamplerStats {
        SamplerStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Background task turning sampler output for one process into events.
pub struct MetricsSampler {
    name: String,
    process: Option<ProcessHandle>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
    interval: Duration,
    stop_grace: Duration,
}

impl MetricsSampler {
    pub fn start(
        command: &SamplerCommand,
        name: &str,
        target_pid: u32,
        sink: Arc<dyn EventSink>,
        signals: Arc<dyn SignalSender>,
    ) -> Result<Self> {
        let stage = format!("sampler for {name}");
        let args = command.args(target_pid);
        let description = describe(&command.program, &args);

        let mut cmd = Command::new(&command.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut process = ProcessHandle::spawn(&stage, cmd, description.clone(), signals)
            .map_err(|source| BenchError::Spawn {
                stage: stage.clone(),
                command: description.clone(),
                source,
            })?;

        let Some(stdout) = process.take_stdout() else {
            let _ = process.terminate();
            return Err(BenchError::Spawn {
                stage,
                command: description,
                source: std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "sampler stdout was not captured",
                ),
            });
        };

        info!("Sampling {} (PID {}) every {:?}", name, target_pid, command.interval);

        let mut sampler = Self::from_reader(name, stdout, sink, command.interval);
        sampler.process = Some(process);
        sampler.stop_grace = command.stop_grace;
        Ok(sampler)
    }

    /// Runs the parsing loop over an arbitrary stream of sampler output.
    pub fn from_reader<R>(
        name: &str,
        reader: R,
        sink: Arc<dyn EventSink>,
        interval: Duration,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(sample_loop(
            name.to_string(),
            BufReader::new(reader),
            sink,
            cancel.clone(),
            counters.clone(),
        ));

        Self {
            name: name.to_string(),
            process: None,
            cancel,
            task: Some(task),
            counters,
            interval,
            stop_grace: interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// PID of the sampling subprocess, not of the sampled target.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    pub fn stats(&self) -> SamplerStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    /// Ends the loop, terminates the sampling subprocess and waits for both.
    /// Nothing is published once this returns.
    pub async fn stop(mut self) -> Result<SamplerStats> {
        debug!("Stopping sampler {}", self.name);
        self.cancel.cancel();

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(self.interval, &mut task).await.is_err() {
                warn!(
                    "Sampler {} loop did not finish within {:?}, aborting",
                    self.name, self.interval
                );
                task.abort();
                let _ = task.await;
            }
        }

        let result = match self.process.take() {
            Some(mut process) => process.shutdown(self.stop_grace).await,
            None => Ok(()),
        };

        let stats = self.counters.snapshot();
        info!(
            "Sampler {} stopped: {} samples published, {} dropped",
            self.name, stats.published, stats.dropped
        );

        result.map(|_| stats)
    }
}

impl Drop for MetricsSampler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(process) = self.process.as_mut() {
            let _ = process.terminate();
        }
    }
}

async fn sample_loop<R>(
    name: String,
    reader: R,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();
    let mut parser = CycleParser::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Sampler {} cancelled", name);
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("Sampler {} output closed", name);
                break;
            }
            Ok(_) => {
                // undecodable bytes become U+FFFD and fail the numeric checks
                let line = String::from_utf8_lossy(&buf);
                match parser.feed(line.trim_end_matches(&['\r', '\n'][..])) {
                    Parsed::Record(record) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        sink.publish_event(&MetricEvent::new(name.as_str(), record))
                            .await;
                        counters.published.fetch_add(1, Ordering::Relaxed);
                    }
                    Parsed::Anomaly(anomaly) => {
                        debug!("Sampler {} dropped sample: {}", name, anomaly);
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Parsed::Skipped => {}
                }
            }
            Err(e) => {
                debug!("Sampler {} read ended: {}", name, e);
                break;
            }
        }
    }
}
