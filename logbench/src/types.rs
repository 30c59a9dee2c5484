use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

pub const PRODUCER_SOURCE: &str = "producer";
pub const AGENT_SOURCE: &str = "logshifter";
pub const RECEIVER_SOURCE: &str = "rsyslog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    Stopping,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Preparing => "preparing",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub elapsed_seconds: f64,
    /// The test-duration wait was cut short.
    pub cancelled: bool,
}
