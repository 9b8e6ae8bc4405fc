//! Integration tests for request/response over kernel queues.
//!
//! Covers:
//! - idempotent delivery of a repeated event id
//! - correlation under concurrency with out-of-order responses
//! - timeout precision and waiter cleanup
//! - independent resolution of concurrent requests
//! - fail-fast once a kernel trips its loop guard

mod common;

use common::{engine, engine_with, wait_until};
use kernbus_runtime::testing::{EchoResponder, RecordingHandler};
use kernbus_runtime::{
    handler_fn, BusConfig, DeadLetterReason, ErrorCode, Event, EventId, Execution,
    HandlerOutcome, KernelFault, KernelStatus, RequestError, KERNEL_FAILED_EVENT,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// =============================================================================
// Fixtures
// =============================================================================

fn spawn_request(
    execution: &Arc<Execution>,
    request_type: &'static str,
    data: Value,
    response_type: &'static str,
    timeout: Duration,
) -> JoinHandle<Result<Value, RequestError>> {
    let execution = Arc::clone(execution);
    tokio::spawn(async move {
        execution
            .request(request_type, data, response_type, Some(timeout))
            .await
    })
}

// =============================================================================
// Idempotent delivery
// =============================================================================

#[tokio::test]
async fn repeated_event_id_is_delivered_once() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("tool.invoke", recorder.clone());

    let id = EventId::new();
    let event = || {
        Event::builder("tool.invoke", "acme")
            .id(id)
            .data(json!({"attempt": 1}))
            .build()
            .unwrap()
    };

    assert!(execution.registry().emit(event()).await.unwrap().is_accepted());
    assert!(!execution.registry().emit(event()).await.unwrap().is_accepted());
    engine.tick().await;

    // still known after processing
    assert!(!execution.registry().emit(event()).await.unwrap().is_accepted());
    engine.tick().await;

    assert_eq!(recorder.count(), 1);
    let metrics = execution.business().metrics();
    assert_eq!(metrics.duplicates, 2);
    assert_eq!(metrics.processed, 1);
    // duplicates do not consume quota
    assert_eq!(execution.business().quotas().consumed_events, 1);
}

// =============================================================================
// Correlation
// =============================================================================

#[tokio::test]
async fn concurrent_requests_resolve_with_their_own_responses() {
    const N: usize = 20;
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("job.run", recorder.clone());

    let handles: Vec<_> = (0..N)
        .map(|n| {
            spawn_request(
                &execution,
                "job.run",
                json!({ "n": n }),
                "job.done",
                Duration::from_secs(30),
            )
        })
        .collect();
    wait_until(|| recorder.count() == N).await;

    // answer in a scrambled order
    let requests = recorder.events();
    for i in 0..N {
        let request = &requests[(i * 7) % N];
        let n = request.data()["n"].clone();
        let response = request.respond("job.done", Ok(json!({ "n": n }))).unwrap();
        execution.publish(response).await.unwrap();
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, json!({ "n": n }));
    }
    assert_eq!(execution.router().pending_count(), 0);
    assert_eq!(execution.registry().waiter_count(), 0);
}

#[tokio::test]
async fn echo_responder_round_trip() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let echo = Arc::new(EchoResponder::new("tool.response"));
    execution.on("tool.invoke", echo.clone());

    let reply = execution
        .request("tool.invoke", json!({"q": "ping"}), "tool.response", None)
        .await
        .unwrap();
    assert_eq!(reply, json!({"q": "ping"}));
    assert_eq!(echo.calls(), 1);
}

#[tokio::test]
async fn later_response_does_not_resolve_earlier_request() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("tool.run", recorder.clone());

    let a = spawn_request(
        &execution,
        "tool.run",
        json!({"tool": "A"}),
        "toolA.response",
        Duration::from_secs(30),
    );
    wait_until(|| recorder.count() == 1).await;
    let b = spawn_request(
        &execution,
        "tool.run",
        json!({"tool": "B"}),
        "toolB.response",
        Duration::from_secs(30),
    );
    wait_until(|| recorder.count() == 2).await;

    let requests = recorder.events();
    let (request_a, request_b) = (&requests[0], &requests[1]);
    assert_eq!(request_b.data()["tool"], "B");

    let response = request_b.respond("toolB.response", Ok(json!("b"))).unwrap();
    execution.publish(response).await.unwrap();
    assert_eq!(b.await.unwrap().unwrap(), json!("b"));

    assert!(!a.is_finished());
    assert_eq!(execution.router().pending_count(), 1);

    let response = request_a.respond("toolA.response", Ok(json!("a"))).unwrap();
    execution.publish(response).await.unwrap();
    assert_eq!(a.await.unwrap().unwrap(), json!("a"));
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_fires_at_deadline_and_leaks_nothing() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    execution.on("tool.invoke", Arc::new(RecordingHandler::new()));

    let started = Instant::now();
    let err = execution
        .request(
            "tool.invoke",
            json!({}),
            "tool.response",
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(120));

    for _ in 0..50 {
        let err = execution
            .request(
                "tool.invoke",
                json!({}),
                "tool.response",
                Some(Duration::from_millis(5)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REQUEST_TIMEOUT");
    }
    assert_eq!(execution.router().pending_count(), 0);
    assert_eq!(execution.registry().waiter_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_response_is_dead_lettered_not_delivered() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("tool.invoke", recorder.clone());

    let err = execution
        .request(
            "tool.invoke",
            json!({}),
            "tool.response",
            Some(Duration::from_millis(10)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let request = &recorder.events()[0];
    let late = request.respond("tool.response", Ok(json!("late"))).unwrap();
    execution.registry().emit(late).await.unwrap();
    engine.tick().await;

    let dead = execution.business().dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.event_type(), "tool.response");
    assert_eq!(dead[0].reason, DeadLetterReason::NoHandler);
}

// =============================================================================
// Fail-fast
// =============================================================================

#[tokio::test]
async fn runaway_cycle_trips_loop_guard_and_requests_fail_fast() {
    let mut config = BusConfig::default();
    config.kernel.loop_max_events = 5;
    config.kernel.loop_window_ms = 60_000;
    let engine = engine_with(config);
    let execution = engine.execution("acme", "job-1").unwrap();

    // every ping emits another ping
    execution.on(
        "agent.ping",
        handler_fn(|event, ctx| async move {
            let next = match Event::new("agent.ping", event.tenant_id().clone(), json!({})) {
                Ok(next) => next,
                Err(e) => return HandlerOutcome::fatal(e.to_string()),
            };
            match ctx.emit(next).await {
                Ok(_) => HandlerOutcome::Ack,
                Err(e) => HandlerOutcome::fatal(e.to_string()),
            }
        }),
    );
    let notices = Arc::new(RecordingHandler::new());
    execution.on(KERNEL_FAILED_EVENT, notices.clone());

    execution.emit("agent.ping", json!({})).await.unwrap();
    let status = tokio::time::timeout(
        Duration::from_secs(5),
        execution.business().terminated(),
    )
    .await
    .unwrap();
    assert_eq!(status, KernelStatus::Failed);
    assert!(matches!(
        execution.business().fault(),
        Some(KernelFault::LoopDetected { .. })
    ));

    let started = std::time::Instant::now();
    let err = execution
        .request(
            "tool.invoke",
            json!({}),
            "tool.response",
            Some(Duration::from_secs(30)),
        )
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(err.code(), "REQUEST_KERNEL_FAILED");
    assert!(matches!(err.fault(), Some(KernelFault::LoopDetected { .. })));

    wait_until(|| notices.count() == 1).await;
    let notice = &notices.events()[0];
    assert_eq!(notice.data()["kernel"], "business");
}

#[tokio::test]
async fn waiting_request_fails_fast_when_kernel_fails() {
    let engine = engine();
    let execution = engine.execution("acme", "job-1").unwrap();
    let recorder = Arc::new(RecordingHandler::new());
    execution.on("tool.invoke", recorder.clone());

    let waiting = spawn_request(
        &execution,
        "tool.invoke",
        json!({}),
        "tool.response",
        Duration::from_secs(60),
    );
    wait_until(|| recorder.count() == 1).await;

    execution.business().fail("operator stop");
    let err = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), "REQUEST_KERNEL_FAILED");
    assert_eq!(execution.router().pending_count(), 0);
}
