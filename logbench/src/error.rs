use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to spawn {stage} ({command}): {source}")]
    Spawn {
        stage: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write agent config {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline stage {stage} failed to start ({command}): {source}")]
    PipelineSpawn {
        stage: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("receiver environment reset failed: {0}")]
    EnvironmentReset(String),

    #[error("{source_name} process {pid} is no longer running")]
    TargetVanished { source_name: String, pid: u32 },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Pipeline stage, sampler or service the error belongs to, when known.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Spawn { stage, .. } | Self::PipelineSpawn { stage, .. } => Some(stage),
            Self::ConfigWrite { .. } => Some("agent"),
            Self::EnvironmentReset(_) => Some("receiver"),
            Self::TargetVanished { source_name, .. } => Some(source_name),
            _ => None,
        }
    }
}
