use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Parameters of a single benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub message_length: u64,
    /// Handed to the producer verbatim as its inter-message delay.
    pub message_rate: f64,
    pub queue_size: u64,
    pub input_buffer_size: u64,
    /// Seconds.
    pub test_length: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            message_length: 100,
            message_rate: 0.0005,
            queue_size: 100,
            input_buffer_size: 64,
            test_length: 10,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.message_length == 0 {
            return Err(BenchError::InvalidConfig(
                "message length must be positive".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(BenchError::InvalidConfig(
                "queue size must be positive".to_string(),
            ));
        }
        if self.input_buffer_size == 0 {
            return Err(BenchError::InvalidConfig(
                "input buffer size must be positive".to_string(),
            ));
        }
        if self.test_length == 0 {
            return Err(BenchError::InvalidConfig(
                "test length must be at least one second".to_string(),
            ));
        }
        if !self.message_rate.is_finite() || self.message_rate < 0.0 {
            return Err(BenchError::InvalidConfig(format!(
                "message rate must be a non-negative number, got {}",
                self.message_rate
            )));
        }
        Ok(())
    }

    /// Parses a streaming trigger such as
    /// `messageLength=100&messageRate=0.001&queueDepth=100&testLength=5&inputBufferSize=64`.
    ///
    /// Keys that are absent keep their defaults, unknown keys are ignored.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut config = Self::default();

        for pair in query.trim().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.trim();

            match key.trim() {
                "messageLength" => config.message_length = parse_param(key, value)?,
                "messageRate" => config.message_rate = parse_param(key, value)?,
                "queueDepth" => config.queue_size = parse_param(key, value)?,
                "testLength" => config.test_length = parse_param(key, value)?,
                "inputBufferSize" => config.input_buffer_size = parse_param(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn test_duration(&self) -> Duration {
        Duration::from_secs(self.test_length)
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| BenchError::InvalidConfig(format!("{key}: cannot parse '{value}'")))
}

/// Process-wide settings: where the external tools live and how the
/// receiver is managed.
#[derive(Debug, Clone)]
pub struct LogbenchConfig {
    pub log_level: String,
    pub producer_path: String,
    pub agent_path: String,
    pub sampler_path: String,
    pub sample_interval: u64,
    pub receiver_process: String,
    pub receiver_log_file: PathBuf,
    pub receiver_restart_command: String,
    pub config_dir: PathBuf,
    pub stop_grace_ms: u64,
    pub subscriber_capacity: usize,
    pub listen_address: String,
}

impl Default for LogbenchConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            producer_path: "producer".to_string(),
            agent_path: "logshifter".to_string(),
            sampler_path: "pidstat".to_string(),
            sample_interval: 1,
            receiver_process: "rsyslogd".to_string(),
            receiver_log_file: PathBuf::from("/var/log/messages"),
            receiver_restart_command: "systemctl restart rsyslog".to_string(),
            config_dir: env::temp_dir(),
            stop_grace_ms: 2000,
            subscriber_capacity: 256,
            listen_address: "127.0.0.1:9292".to_string(),
        }
    }
}

impl LogbenchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("LOGBENCH_LOG_LEVEL") {
            config.log_level = val;
        }

        if let Ok(val) = env::var("LOGBENCH_PRODUCER") {
            config.producer_path = val;
        }

        if let Ok(val) = env::var("LOGBENCH_AGENT") {
            config.agent_path = val;
        }

        if let Ok(val) = env::var("LOGBENCH_SAMPLER") {
            config.sampler_path = val;
        }

        if let Ok(val) = env::var("LOGBENCH_SAMPLE_INTERVAL") {
            if let Ok(interval) = val.parse::<u64>() {
                if interval > 0 {
                    config.sample_interval = interval;
                }
            }
        }

        if let Ok(val) = env::var("LOGBENCH_RECEIVER_PROCESS") {
            config.receiver_process = val;
        }

        if let Ok(val) = env::var("LOGBENCH_RECEIVER_LOG") {
            config.receiver_log_file = PathBuf::from(val);
        }

        if let Ok(val) = env::var("LOGBENCH_RECEIVER_RESTART") {
            config.receiver_restart_command = val;
        }

        if let Ok(val) = env::var("LOGBENCH_CONFIG_DIR") {
            config.config_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("LOGBENCH_STOP_GRACE_MS") {
            if let Ok(grace) = val.parse() {
                config.stop_grace_ms = grace;
            }
        }

        if let Ok(val) = env::var("LOGBENCH_SUBSCRIBER_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                if capacity > 0 {
                    config.subscriber_capacity = capacity;
                }
            }
        }

        if let Ok(val) = env::var("LOGBENCH_LISTEN_ADDRESS") {
            config.listen_address = val;
        }

        config
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Restart command split into program and arguments.
    pub fn receiver_restart_argv(&self) -> Vec<String> {
        self.receiver_restart_command
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}
