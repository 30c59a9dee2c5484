// Copyright (c) Abstract Machines

//! Logbench - benchmark driver for logging pipelines
//!
//! Runs a message producer piped into a log-shipping agent that forwards to a
//! local syslog receiver, samples per-process CPU and memory statistics of all
//! three while the pipeline runs, and fans the samples out to live subscribers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod pipeline;
pub mod process;
pub mod receiver;
pub mod report;
pub mod run;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use broadcast::{Broadcaster, EventSink, Subscription};
pub use config::{BenchmarkConfig, LogbenchConfig};
pub use error::{BenchError, Result};
pub use monitoring::{MetricEvent, MetricRecord};
pub use report::{ReportCollector, RunReport};
pub use run::{BenchmarkRun, RunContext};
pub use server::StreamServer;
pub use types::{RunResult, RunState};
