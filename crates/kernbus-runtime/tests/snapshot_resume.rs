//! Integration tests for pause, persistence and resume.
//!
//! Snapshots go through a document-store persistor in a temp directory, and
//! resumes happen on a separate engine to model a process restart.

mod common;

use common::wait_until;
use kernbus_runtime::testing::RecordingHandler;
use kernbus_runtime::{
    BusConfig, Engine, ErrorCode, Event, KernelStatus, PersistorBackend, SnapshotId,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn document_config(dir: &TempDir) -> BusConfig {
    let mut config = BusConfig::default();
    config.persistor.backend = PersistorBackend::DocumentStore;
    config.persistor.connection = dir.path().display().to_string();
    config
}

#[tokio::test]
async fn resume_on_fresh_engine_restores_context_and_quotas() {
    let dir = tempfile::tempdir().unwrap();

    let first = Engine::builder(document_config(&dir)).build().unwrap();
    let execution = first.execution("acme", "job-1").unwrap();
    let kernel = execution.business();
    kernel.set_context("agent", "goal", json!("summarize")).unwrap();
    kernel.set_context("memory", "turns", json!(3)).unwrap();
    for _ in 0..4 {
        let event = Event::new("agent.step", "acme", json!({})).unwrap();
        execution.registry().emit(event).await.unwrap();
    }
    first.tick().await;

    let snapshot_id = execution.pause("operator checkpoint").await.unwrap();
    assert_eq!(kernel.status(), KernelStatus::Paused);
    let before = kernel.snapshot_state();
    first.shutdown().await;

    let second = Engine::builder(document_config(&dir)).build().unwrap();
    let restored = second.execution("acme", "job-1").unwrap();
    assert_eq!(restored.business().status(), KernelStatus::Idle);
    restored.resume(&snapshot_id).await.unwrap();

    let after = restored.business().snapshot_state();
    assert_eq!(restored.business().status(), KernelStatus::Running);
    assert_eq!(after.context, before.context);
    assert_eq!(after.quotas.consumed_events, 4);
    assert_eq!(after.quotas.consumed_events, before.quotas.consumed_events);
    assert_eq!(after.quotas.active_ms, before.quotas.active_ms);
    assert_eq!(after.quotas.started_at, before.quotas.started_at);
    assert_eq!(restored.business().last_snapshot(), Some(snapshot_id));
}

#[tokio::test]
async fn snapshots_are_listed_per_execution() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::builder(document_config(&dir)).build().unwrap();

    let a = engine.execution("acme", "job-1").unwrap();
    let b = engine.execution("acme", "job-2").unwrap();
    a.business().start().unwrap();
    a.business().set_context("agent", "step", json!(1)).unwrap();
    let first = a.pause("first").await.unwrap();
    a.resume(&first).await.unwrap();
    a.business().set_context("agent", "step", json!(2)).unwrap();
    let second = a.pause("second").await.unwrap();
    b.business().start().unwrap();
    b.pause("other job").await.unwrap();

    let mut listed: Vec<SnapshotId> = engine
        .snapshots(a.id())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.content_hash)
        .collect();
    listed.sort();
    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(listed, expected);
    assert_eq!(engine.snapshots(b.id()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn idle_execution_cannot_pause() {
    let engine = common::engine();
    let execution = engine.execution("acme", "job-1").unwrap();

    let err = execution.pause("nothing ran yet").await.unwrap_err();
    assert_eq!(err.code(), "KERNEL_INVALID_TRANSITION");
    assert_eq!(execution.business().status(), KernelStatus::Idle);
    assert!(engine.snapshots(execution.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_snapshot_fails_without_touching_state() {
    let engine = common::engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    execution
        .business()
        .set_context("agent", "goal", json!("keep"))
        .unwrap();

    let err = execution
        .resume(&SnapshotId::new("0".repeat(64)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "KERNEL_SNAPSHOT_NOT_FOUND");
    assert_eq!(execution.business().status(), KernelStatus::Idle);
    assert_eq!(
        execution.business().get_context("agent", "goal"),
        Some(json!("keep"))
    );
}

#[tokio::test]
async fn snapshot_of_another_job_is_rejected() {
    let engine = common::engine();
    let other = engine.execution("acme", "job-2").unwrap();
    other.business().start().unwrap();
    let snapshot_id = other.pause("checkpoint").await.unwrap();

    let execution = engine.execution("acme", "job-1").unwrap();
    let err = execution.resume(&snapshot_id).await.unwrap_err();
    assert_eq!(err.code(), "KERNEL_SNAPSHOT_MISMATCH");
}

#[tokio::test]
async fn events_queued_while_paused_run_after_resume() {
    let engine = common::engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("agent.step", recorder.clone());
    execution.business().start().unwrap();

    let snapshot_id = execution.pause("waiting for approval").await.unwrap();
    execution.emit("agent.step", json!({"n": 1})).await.unwrap();
    engine.tick().await;
    assert_eq!(recorder.count(), 0);
    assert_eq!(execution.business().queue().depth(), 1);

    execution.resume(&snapshot_id).await.unwrap();
    wait_until(|| recorder.count() == 1).await;
}
