use crate::broadcast::Subscription;
use crate::monitoring::MetricEvent;
use crate::types::RunResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub sample_count: usize,
    pub avg_total_cpu: f64,
    pub peak_total_cpu: f64,
    pub peak_rss_kb: u64,
    pub peak_memory_percent: f64,
}

impl SourceSummary {
    pub fn from_samples(samples: &[&MetricEvent]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let count = samples.len() as f64;
        let avg_total_cpu = samples.iter().map(|s| s.stats.total_cpu()).sum::<f64>() / count;
        let peak_total_cpu = samples
            .iter()
            .map(|s| s.stats.total_cpu())
            .fold(0.0, f64::max);
        let peak_rss_kb = samples
            .iter()
            .map(|s| s.stats.rss_kb())
            .max()
            .unwrap_or(0);
        let peak_memory_percent = samples
            .iter()
            .map(|s| s.stats.memory())
            .fold(0.0, f64::max);

        Self {
            sample_count: samples.len(),
            avg_total_cpu,
            peak_total_cpu,
            peak_rss_kb,
            peak_memory_percent,
        }
    }
}

/// Per-source summary of everything observed during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunResult>,
    pub sources: BTreeMap<String, SourceSummary>,
}

impl RunReport {
    pub fn from_events(events: &[MetricEvent]) -> Self {
        let mut by_source: BTreeMap<&str, Vec<&MetricEvent>> = BTreeMap::new();
        for event in events {
            by_source.entry(event.name.as_str()).or_default().push(event);
        }

        let sources = by_source
            .into_iter()
            .map(|(name, samples)| (name.to_string(), SourceSummary::from_samples(&samples)))
            .collect();

        Self { run: None, sources }
    }

    pub fn with_run(mut self, run: RunResult) -> Self {
        self.run = Some(run);
        self
    }
}

/// Drains a subscription in the background until `finish` is called.
pub struct ReportCollector {
    stop: CancellationToken,
    task: JoinHandle<Vec<MetricEvent>>,
}

impl ReportCollector {
    pub fn start(mut subscription: Subscription) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let task = tokio::spawn(async move {
            let mut events = Vec::new();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    payload = subscription.recv() => match payload {
                        Some(payload) => collect(&mut events, &payload),
                        None => return events,
                    },
                }
            }
            while let Some(payload) = subscription.try_recv() {
                collect(&mut events, &payload);
            }
            events
        });

        Self { stop, task }
    }

    pub async fn finish(self) -> RunReport {
        self.stop.cancel();
        match self.task.await {
            Ok(events) => {
                debug!("Collected {} events", events.len());
                RunReport::from_events(&events)
            }
            Err(e) => {
                warn!("Report collector failed: {}", e);
                RunReport::default()
            }
        }
    }
}

fn collect(events: &mut Vec<MetricEvent>, payload: &str) {
    match serde_json::from_str::<MetricEvent>(payload) {
        Ok(event) => events.push(event),
        Err(e) => warn!("Skipping undecodable event: {}", e),
    }
}
