// Copyright (c) Abstract Machines
// Integration tests for launching and stopping producer | agent pipelines

mod common;

use common::Fixture;
use logbench::pipeline::PipelineSupervisor;
use logbench::process::{ProcessLookup, SystemProcessLookup, UnixSignals};
use logbench::{BenchError, BenchmarkConfig};
use std::sync::Arc;
use std::time::Duration;

fn config() -> BenchmarkConfig {
    BenchmarkConfig {
        message_rate: 0.05,
        queue_size: 50,
        input_buffer_size: 32,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_yields_two_live_processes() {
    let fixture = Fixture::new();
    let supervisor = PipelineSupervisor::new(&fixture.settings, Arc::new(UnixSignals));
    let lookup = SystemProcessLookup::new();

    let pipeline = supervisor.start(&config()).await.unwrap();
    let producer = pipeline.producer_pid();
    let agent = pipeline.agent_pid();

    assert_ne!(producer, agent);
    assert!(pipeline.config_artifact_path().starts_with(&fixture.config_dir));

    let written = std::fs::read_to_string(pipeline.config_artifact_path()).unwrap();
    assert_eq!(written, "queuesize=50\ninputbuffersize=32\noutputtype=syslog\n");

    // the agent exits early if it cannot read its config
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(lookup.is_alive(producer).await);
    assert!(lookup.is_alive(agent).await);

    pipeline.stop().await.unwrap();

    assert_eq!(fixture.config_files(), 0);
    assert!(!lookup.is_alive(producer).await);
}

#[tokio::test]
async fn test_agent_spawn_failure_cleans_up_producer() {
    let mut fixture = Fixture::new();
    fixture.settings.agent_path = "/nonexistent/logshifter".to_string();
    let supervisor = PipelineSupervisor::new(&fixture.settings, Arc::new(UnixSignals));

    let err = supervisor.start(&config()).await.unwrap_err();

    match &err {
        BenchError::PipelineSpawn { stage, command, .. } => {
            assert_eq!(stage, "agent");
            assert!(command.starts_with("/nonexistent/logshifter -config "));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fixture.config_files(), 0);
}

#[tokio::test]
async fn test_missing_producer_is_a_spawn_error() {
    let mut fixture = Fixture::new();
    fixture.settings.producer_path = "/nonexistent/producer".to_string();
    let supervisor = PipelineSupervisor::new(&fixture.settings, Arc::new(UnixSignals));

    let err = supervisor.start(&config()).await.unwrap_err();

    assert!(matches!(err, BenchError::Spawn { .. }));
    assert_eq!(err.stage(), Some("producer"));
    assert_eq!(fixture.config_files(), 0);
}

#[tokio::test]
async fn test_pipelines_use_distinct_config_files() {
    let fixture = Fixture::new();
    let supervisor = PipelineSupervisor::new(&fixture.settings, Arc::new(UnixSignals));

    let first = supervisor.start(&config()).await.unwrap();
    let second = supervisor.start(&config()).await.unwrap();

    assert_ne!(first.config_artifact_path(), second.config_artifact_path());
    assert_eq!(fixture.config_files(), 2);

    first.stop().await.unwrap();
    second.stop().await.unwrap();
    assert_eq!(fixture.config_files(), 0);
}

#[tokio::test]
async fn test_dropped_pipeline_removes_config_and_terminates_producer() {
    let fixture = Fixture::new();
    let supervisor = PipelineSupervisor::new(&fixture.settings, Arc::new(UnixSignals));
    let lookup = SystemProcessLookup::new();

    let pipeline = supervisor.start(&config()).await.unwrap();
    let producer = pipeline.producer_pid();
    assert_eq!(fixture.config_files(), 1);

    drop(pipeline);
    assert_eq!(fixture.config_files(), 0);

    let mut alive = true;
    for _ in 0..50 {
        alive = lookup.is_alive(producer).await;
        if !alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alive, "producer {producer} survived the drop");
}
