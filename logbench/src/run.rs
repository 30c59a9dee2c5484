use crate::broadcast::{Broadcaster, EventSink};
use crate::config::{BenchmarkConfig, LogbenchConfig};
use crate::error::{BenchError, Result};
use crate::monitoring::{MetricsSampler, SamplerCommand};
use crate::pipeline::{PipelineState, PipelineSupervisor};
use crate::process::{ProcessLookup, SignalSender, SystemProcessLookup, UnixSignals};
use crate::receiver::{ReceiverControl, SyslogReceiver};
use crate::types::{RunResult, RunState, AGENT_SOURCE, PRODUCER_SOURCE, RECEIVER_SOURCE};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Collaborators shared by every run in a process.
#[derive(Clone)]
pub struct RunContext {
    pub settings: Arc<LogbenchConfig>,
    pub broadcaster: Arc<Broadcaster>,
    pub receiver: Arc<dyn ReceiverControl>,
    pub lookup: Arc<dyn ProcessLookup>,
    pub signals: Arc<dyn SignalSender>,
}

impl RunContext {
    /// Context backed by the real syslog service, sysinfo and kill(2).
    pub fn system(settings: Arc<LogbenchConfig>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            receiver: Arc::new(SyslogReceiver::from_config(&settings)),
            lookup: Arc::new(SystemProcessLookup::new()),
            signals: Arc::new(UnixSignals),
            settings,
            broadcaster,
        }
    }
}

/// One benchmark execution: reset the receiver, run the pipeline under
/// measurement for the configured duration, tear everything down.
pub struct BenchmarkRun {
    id: Uuid,
    config: BenchmarkConfig,
    ctx: RunContext,
    state: RunState,
    cancel: CancellationToken,
}

impl BenchmarkRun {
    pub fn new(config: BenchmarkConfig, ctx: RunContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            ctx,
            state: RunState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling `token` cuts the measurement window short; teardown
    /// still runs in full.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    pub async fn execute(&mut self) -> Result<RunResult> {
        if self.state != RunState::Idle {
            return Err(BenchError::InvalidConfig(format!(
                "run {} was already started ({})",
                self.id, self.state
            )));
        }
        self.config.validate()?;

        info!(
            "Run {} starting: message_length={} message_rate={} queue_size={} input_buffer_size={} test_length={}s",
            self.id,
            self.config.message_length,
            self.config.message_rate,
            self.config.queue_size,
            self.config.input_buffer_size,
            self.config.test_length
        );

        self.transition(RunState::Preparing);
        if let Err(e) = self.ctx.receiver.reset().await {
            error!("Run {}: {}", self.id, e);
            self.transition(RunState::Done);
            return Err(e);
        }

        self.transition(RunState::Running);
        let start_time = SystemTime::now();
        let started = Instant::now();

        let supervisor = PipelineSupervisor::new(&self.ctx.settings, self.ctx.signals.clone());
        let pipeline = match supervisor.start(&self.config).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("Run {}: {}", self.id, e);
                self.transition(RunState::Done);
                return Err(e);
            }
        };

        let mut samplers = Vec::with_capacity(3);
        if let Err(e) = self.start_samplers(&pipeline, &mut samplers).await {
            error!("Run {}: {}", self.id, e);
            self.transition(RunState::Stopping);
            if let Err(cleanup) = teardown(samplers, pipeline).await {
                warn!("Run {}: teardown after failure: {}", self.id, cleanup);
            }
            self.transition(RunState::Done);
            return Err(e);
        }

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(self.config.test_duration()) => false,
            _ = self.cancel.cancelled() => {
                info!("Run {} cancelled", self.id);
                true
            }
        };

        self.transition(RunState::Stopping);
        let stopped = teardown(samplers, pipeline).await;

        let end_time = SystemTime::now();
        let elapsed_seconds = started.elapsed().as_secs_f64();
        self.transition(RunState::Done);
        stopped?;

        info!("Run {} finished in {:.3}s", self.id, elapsed_seconds);

        Ok(RunResult {
            run_id: self.id,
            start_time,
            end_time,
            elapsed_seconds,
            cancelled,
        })
    }

    /// Samplers are pushed in the order they must be stopped in.
    async fn start_samplers(
        &self,
        pipeline: &PipelineState,
        samplers: &mut Vec<MetricsSampler>,
    ) -> Result<()> {
        let receiver_name = self.ctx.receiver.process_name();
        let receiver_pid = self
            .ctx
            .lookup
            .find_by_name(receiver_name)
            .await
            .ok_or_else(|| {
                BenchError::EnvironmentReset(format!("{receiver_name} is not running"))
            })?;

        let command = SamplerCommand::from_config(&self.ctx.settings);
        let sink: Arc<dyn EventSink> = self.ctx.broadcaster.clone();

        for (source, pid) in [
            (AGENT_SOURCE, pipeline.agent_pid()),
            (PRODUCER_SOURCE, pipeline.producer_pid()),
        ] {
            samplers.push(MetricsSampler::start(
                &command,
                source,
                pid,
                sink.clone(),
                self.ctx.signals.clone(),
            )?);
        }

        if !self.ctx.lookup.is_alive(receiver_pid).await {
            return Err(BenchError::TargetVanished {
                source_name: RECEIVER_SOURCE.to_string(),
                pid: receiver_pid,
            });
        }
        samplers.push(MetricsSampler::start(
            &command,
            RECEIVER_SOURCE,
            receiver_pid,
            sink,
            self.ctx.signals.clone(),
        )?);

        Ok(())
    }
}

/// Stops samplers in order, then the pipeline. Keeps going past failures
/// and reports the first one.
async fn teardown(samplers: Vec<MetricsSampler>, pipeline: PipelineState) -> Result<()> {
    let mut first_error = None;

    for sampler in samplers {
        let name = sampler.name().to_string();
        if let Err(e) = sampler.stop().await {
            warn!("Failed to stop sampler {}: {}", name, e);
            first_error.get_or_insert(e);
        }
    }

    if let Err(e) = pipeline.stop().await {
        warn!("Failed to stop pipeline: {}", e);
        first_error.get_or_insert(e);
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
