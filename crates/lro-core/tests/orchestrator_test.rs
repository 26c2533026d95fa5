//! End-to-end orchestrator behavior against scripted upstream doubles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use lro_core::{
    CacheConfig, Error, OperationStatus, OrchestratorConfig, PollPolicy, ResultView, SchemaSource,
    Submission, UpstreamResponse, WorkPayload,
};
use serde_json::json;

fn payload() -> WorkPayload {
    WorkPayload::new("invoice", "https://docs.example.com/invoice-001.pdf")
}

fn succeeded_body() -> serde_json::Value {
    json!({
        "status": "Succeeded",
        "result": {
            "analyzerId": "invoice",
            "contents": [{ "markdown": "# Invoice", "fields": { "Total": { "valueNumber": 42.0 } } }]
        }
    })
}

fn pending(submission: Submission) -> lro_core::Ticket {
    match submission {
        Submission::Pending(ticket) => ticket,
        Submission::Completed { .. } => panic!("expected a pending operation"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronous path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sync_result_gets_id_and_status() {
    let service = ScriptedService::new();
    service.on_analyze(Reply::ok(json!({ "contents": [{ "markdown": "hello" }] })));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let submission = orch.submit(payload()).await.unwrap();
    let (operation_id, result) = match submission {
        Submission::Completed {
            operation_id,
            result,
        } => (operation_id, result),
        Submission::Pending(_) => panic!("expected a synchronous result"),
    };

    assert!(!result.id.is_empty());
    assert_eq!(result.id, operation_id);
    assert_eq!(result.status, "succeeded");
    assert_eq!(result.content_items.len(), 1);
    assert_eq!(service.poll_count(), 0);
    assert_eq!(
        service.analyze_requests.lock().unwrap()[0],
        json!({ "url": "https://docs.example.com/invoice-001.pdf" })
    );
}

#[tokio::test(start_paused = true)]
async fn test_bare_empty_contents_is_valid() {
    let service = ScriptedService::new();
    service.on_analyze(Reply::ok(json!({ "contents": [] })));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let result = orch.submit_and_wait(payload()).await.unwrap();
    assert!(result.content_items.is_empty());
    assert_eq!(result.status, "succeeded");
    assert!(!result.id.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Long-running path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_polls_until_terminal_regardless_of_case() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "id": "upstream-1", "status": "notStarted" })))
        .on_poll(Reply::ok(json!({ "status": "RUNNING" })))
        .on_poll(Reply::ok(json!({ "status": "running" })))
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let ticket = pending(orch.submit(payload()).await.unwrap());
    assert_eq!(ticket.snapshot().status, OperationStatus::Polling);

    let result = ticket.wait().await.unwrap();
    assert_eq!(result.id, "upstream-1");
    assert_eq!(result.status, "succeeded");
    assert_eq!(result.content_items.len(), 1);
    assert_eq!(result.metadata["extraction_path"], "result.contents");
    assert_eq!(result.metadata["analyzerId"], "invoice");

    let op = orch.operation(ticket.operation_id()).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::Succeeded);
    assert_eq!(op.poll_count, 3);
    assert_eq!(op.last_upstream_status.as_deref(), Some("Succeeded"));
    assert!(
        service
            .polled_locations
            .lock()
            .unwrap()
            .iter()
            .all(|l| l == LOCATION)
    );
}

#[tokio::test(start_paused = true)]
async fn test_get_result_processing_then_completed() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running())
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let ticket = pending(orch.submit(payload()).await.unwrap());
    match orch.get_result(ticket.operation_id()).unwrap() {
        ResultView::Processing {
            status,
            retry_after,
            ..
        } => {
            assert_eq!(status, OperationStatus::Polling);
            assert_eq!(retry_after, Duration::from_millis(10));
        }
        ResultView::Completed(_) => panic!("should still be processing"),
    }

    ticket.wait().await.unwrap();
    assert!(matches!(
        orch.get_result(ticket.operation_id()).unwrap(),
        ResultView::Completed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_get_result_is_idempotent_after_terminal() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let ticket = pending(orch.submit(payload()).await.unwrap());
    ticket.wait().await.unwrap();
    let polls = service.poll_count();

    let first = match orch.get_result(ticket.operation_id()).unwrap() {
        ResultView::Completed(result) => result,
        other => panic!("unexpected: {other:?}"),
    };
    tokio::time::sleep(Duration::from_secs(5)).await;
    let second = match orch.get_result(ticket.operation_id()).unwrap() {
        ResultView::Completed(result) => result,
        other => panic!("unexpected: {other:?}"),
    };

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        serde_json::to_string(&*first).unwrap(),
        serde_json::to_string(&*second).unwrap()
    );
    assert_eq!(service.poll_count(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_status_keeps_polling() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::ok(json!({ "status": "Warming" })))
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let result = orch.submit_and_wait(payload()).await.unwrap();
    assert_eq!(result.status, "succeeded");
    assert_eq!(service.poll_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_error_is_retried() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::TransportError)
        .on_poll(Reply::status(503, json!({})))
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let ticket = pending(orch.submit(payload()).await.unwrap());
    ticket.wait().await.unwrap();
    assert_eq!(ticket.snapshot().poll_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_lengthens_first_poll_delay() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::Respond(
            UpstreamResponse::new(202, json!({ "status": "Running" }))
                .with_operation_location(LOCATION)
                .with_retry_after(Duration::from_secs(5)),
        ))
        .on_poll(Reply::ok(succeeded_body()));
    let policy = PollPolicy {
        initial_interval_ms: 10,
        max_interval_ms: 30_000,
        backoff_multiplier: 1.0,
        max_attempts: 5,
        ..Default::default()
    };
    let orch = orchestrator(
        &service,
        &MemoryBlobStore::new(),
        OrchestratorConfig::default().with_poll(policy),
    );

    let ticket = pending(orch.submit(payload()).await.unwrap());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.poll_count(), 0);

    ticket.wait().await.unwrap();
    assert_eq!(service.poll_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_concurrency_is_bounded() {
    const SECOND: &str = "https://cu.example.test/contentunderstanding/analyzerResults/r-2?api-version=2025-05-01-preview";

    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_analyze(Reply::Respond(
            UpstreamResponse::new(202, json!({ "status": "Running" })).with_operation_location(SECOND),
        ));
    for _ in 0..2 {
        service
            .on_poll(Reply::running())
            .on_poll(Reply::running())
            .on_poll(Reply::ok(succeeded_body()));
    }
    let config = OrchestratorConfig {
        max_concurrent_polls: 1,
        ..default_config()
    };
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let first = pending(orch.submit(payload()).await.unwrap());
    let second = pending(
        orch.submit(WorkPayload::new("invoice", "https://docs.example.com/invoice-002.pdf"))
            .await
            .unwrap(),
    );
    assert_ne!(first.operation_id(), second.operation_id());

    // The first operation holds the only permit; the second waits without polling
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert!(first.snapshot().poll_count >= 1);
    assert!(!first.snapshot().status.is_terminal());
    assert_eq!(second.snapshot().status, OperationStatus::Polling);
    assert_eq!(second.snapshot().poll_count, 0);

    first.wait().await.unwrap();
    second.wait().await.unwrap();

    let polled = service.polled_locations.lock().unwrap().clone();
    assert_eq!(polled.len(), 6);
    assert!(polled[..3].iter().all(|l| l == LOCATION));
    assert!(polled[3..].iter().all(|l| l == SECOND));
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_times_out_exactly_once_at_poll_ceiling() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running());
    let orch = orchestrator(
        &service,
        &MemoryBlobStore::new(),
        OrchestratorConfig::default().with_poll(fast_policy(3)),
    );

    let ticket = pending(orch.submit(payload()).await.unwrap());
    match ticket.wait().await {
        Err(Error::Timeout {
            operation_id,
            upstream_status,
            poll_count,
            ..
        }) => {
            assert_eq!(operation_id, ticket.operation_id());
            assert_eq!(upstream_status, "Running");
            assert_eq!(poll_count, 3);
        }
        other => panic!("unexpected: {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(service.poll_count(), 3);

    let op = orch.operation(ticket.operation_id()).unwrap().unwrap();
    assert_eq!(op.status, OperationStatus::TimedOut);
    assert!(matches!(
        orch.get_result(ticket.operation_id()),
        Err(Error::Timeout { .. })
    ));
    assert_eq!(orch.stats().unwrap().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_times_out_on_wall_clock_budget() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running());
    let policy = PollPolicy {
        initial_interval_ms: 100,
        max_interval_ms: 100,
        backoff_multiplier: 1.0,
        max_attempts: 1_000,
        max_duration_secs: 1,
        honor_retry_after: true,
    };
    let orch = orchestrator(
        &service,
        &MemoryBlobStore::new(),
        OrchestratorConfig::default().with_poll(policy),
    );

    let err = orch.submit_and_wait(payload()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(service.poll_count() > 0);
    assert!(service.poll_count() <= 10);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failure_is_reported_verbatim() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::ok(json!({
            "status": "Failed",
            "error": { "code": "InvalidContent", "message": "Document is encrypted" }
        })));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let err = orch.submit_and_wait(payload()).await.unwrap_err();
    match err {
        Error::UpstreamFailure {
            upstream_status,
            message,
            details,
            ..
        } => {
            assert_eq!(upstream_status, "Failed");
            assert_eq!(message, "InvalidContent: Document is encrypted");
            assert_eq!(details["code"], "InvalidContent");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::status(503, json!({ "error": { "message": "busy" } })))
        .on_analyze(Reply::ok(json!({ "contents": [] })));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let err = orch.submit(payload()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.upstream_status(), Some("503"));

    orch.submit_and_wait(payload()).await.unwrap();
    assert_eq!(service.analyze_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_submission_is_validation() {
    let service = ScriptedService::new();
    service.on_analyze(Reply::status(
        400,
        json!({ "error": { "code": "InvalidRequest", "message": "url is not reachable" } }),
    ));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    match orch.submit(payload()).await.unwrap_err() {
        Error::Validation {
            operation_id,
            upstream_status,
            message,
            ..
        } => {
            assert!(operation_id.is_some());
            assert_eq!(upstream_status.as_deref(), Some("400"));
            assert!(message.contains("url is not reachable"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_payload_never_reaches_upstream() {
    let service = ScriptedService::new();
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let err = orch
        .submit(WorkPayload::new("", "https://docs.example.com/a.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));

    let err = orch
        .submit(WorkPayload::new("invoice", "ftp://docs.example.com/a.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(service.analyze_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Schemas
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_blob_schema_is_fetched_and_shaped() {
    let service = ScriptedService::new();
    service
        .on_create(Reply::status(201, json!({ "analyzerId": "invoice" })))
        .on_analyze(Reply::ok(json!({ "contents": [{ "markdown": "x" }] })));
    let blobs = MemoryBlobStore::new();
    let schema_url = "https://blobs.example.com/schemas/invoice.json";
    blobs.put(
        schema_url,
        &json!({ "fields": [{ "name": "Total", "type": "number" }, { "name": "Vendor" }] }),
    );
    let orch = orchestrator(&service, &blobs, default_config());

    let payload = payload().with_schema(SchemaSource::Blob {
        url: schema_url.into(),
    });
    orch.submit_and_wait(payload).await.unwrap();

    assert_eq!(service.create_count(), 1);
    let definition = service.definitions.lock().unwrap()[0].clone();
    assert_eq!(definition["fieldSchema"]["fields"]["Total"]["type"], "number");
    assert_eq!(definition["fieldSchema"]["fields"]["Vendor"]["type"], "string");
    assert_eq!(service.analyze_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_schema_blob_is_validation() {
    let service = ScriptedService::new();
    let blobs = MemoryBlobStore::new();
    let orch = orchestrator(&service, &blobs, default_config());

    let payload = payload().with_schema(SchemaSource::Blob {
        url: "https://blobs.example.com/missing.json".into(),
    });
    let err = orch.submit(payload).await.unwrap_err();

    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(service.create_count(), 0);
    assert_eq!(service.analyze_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_analyzer_creation_lro_is_awaited() {
    let service = ScriptedService::new();
    service
        .on_create(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running())
        .on_poll(Reply::ok(json!({ "status": "Succeeded" })))
        .on_analyze(Reply::ok(json!({ "contents": [] })));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let payload = payload().with_schema(SchemaSource::Inline {
        definition: json!({ "fieldSchema": { "fields": { "Total": { "type": "number" } } } }),
    });
    orch.submit_and_wait(payload).await.unwrap();

    assert_eq!(service.poll_count(), 2);
    assert_eq!(service.analyze_count(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deduplication & lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_equal_fingerprints_submit_once() {
    let service = ScriptedService::new();
    service.delay_analyze(Duration::from_millis(50));
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running())
        .on_poll(Reply::ok(succeeded_body()));
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    let (a, b) = tokio::join!(
        orch.submit(payload().with_client_request_id("req-a")),
        orch.submit(payload().with_client_request_id("req-b")),
    );
    let a = pending(a.unwrap());
    let b = pending(b.unwrap());
    assert_eq!(a.operation_id(), b.operation_id());
    assert_eq!(a.fingerprint(), b.fingerprint());

    let (ra, rb) = tokio::join!(a.wait(), b.wait());
    assert!(Arc::ptr_eq(&ra.unwrap(), &rb.unwrap()));

    match orch.submit(payload().with_client_request_id("req-c")).await.unwrap() {
        Submission::Completed { operation_id, .. } => assert_eq!(operation_id, a.operation_id()),
        Submission::Pending(_) => panic!("expected a cached result"),
    }
    assert_eq!(service.analyze_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detached_operation_is_abandoned() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running());
    let config = default_config().with_detach_grace(Duration::ZERO);
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let ticket = pending(orch.submit(payload()).await.unwrap());
    let operation_id = ticket.operation_id().to_string();
    drop(ticket);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!orch.contains(&operation_id));
    let polls = service.poll_count();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.poll_count(), polls);

    assert!(matches!(
        orch.get_result(&operation_id),
        Err(Error::OperationNotFound(_))
    ));

    // A fresh submission starts over
    let ticket = pending(orch.submit(payload()).await.unwrap());
    assert_ne!(ticket.operation_id(), operation_id);
    assert_eq!(service.analyze_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_attached_caller_keeps_operation_alive() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::running())
        .on_poll(Reply::running())
        .on_poll(Reply::ok(succeeded_body()));
    let config = default_config().with_detach_grace(Duration::ZERO);
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let first = pending(orch.submit(payload()).await.unwrap());
    let second = orch.attach(first.operation_id()).unwrap();
    drop(first);

    let result = second.wait().await.unwrap();
    assert_eq!(result.status, "succeeded");
}

#[tokio::test(start_paused = true)]
async fn test_expired_results_are_evicted() {
    let service = ScriptedService::new();
    service.on_analyze(Reply::ok(json!({ "contents": [] })));
    let config = default_config().with_cache(CacheConfig {
        retention_secs: 60,
        max_entries: 16,
    });
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let submission = orch.submit(payload()).await.unwrap();
    let operation_id = submission.operation_id().to_string();
    assert_eq!(orch.stats().unwrap().cached_results, 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(orch.evict_expired().unwrap(), 1);
    assert!(!orch.contains(&operation_id));
    assert_eq!(orch.stats().unwrap().cached_results, 0);

    orch.submit_and_wait(payload()).await.unwrap();
    assert_eq!(service.analyze_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_operations_expire_on_the_same_clock() {
    let service = ScriptedService::new();
    service
        .on_analyze(Reply::accepted(json!({ "status": "Running" })))
        .on_poll(Reply::ok(json!({ "status": "Failed", "error": { "message": "corrupt" } })));
    let config = default_config().with_cache(CacheConfig {
        retention_secs: 60,
        max_entries: 16,
    });
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let ticket = pending(orch.submit(payload()).await.unwrap());
    let operation_id = ticket.operation_id().to_string();
    assert!(ticket.wait().await.is_err());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(orch.evict_expired().unwrap(), 0);
    assert!(orch.contains(&operation_id));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(orch.evict_expired().unwrap(), 1);
    assert!(matches!(
        orch.get_result(&operation_id),
        Err(Error::OperationNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cached_submission_id_always_resolves() {
    let service = ScriptedService::new();
    service.on_analyze(Reply::ok(json!({ "contents": [] })));
    let config = default_config().with_cache(CacheConfig {
        retention_secs: 60,
        max_entries: 16,
    });
    let orch = orchestrator(&service, &MemoryBlobStore::new(), config);

    let first = orch.submit(payload()).await.unwrap();
    let first_id = first.operation_id().to_string();

    // Within retention the cached answer points at a live operation
    tokio::time::advance(Duration::from_secs(59)).await;
    let cached = orch.submit(payload()).await.unwrap();
    assert_eq!(cached.operation_id(), first_id);
    assert!(matches!(orch.get_result(&first_id), Ok(ResultView::Completed(_))));
    assert_eq!(service.analyze_count(), 1);

    // Past retention, submitting sweeps the stale entry and its operation together
    tokio::time::advance(Duration::from_secs(2)).await;
    let fresh = orch.submit(payload()).await.unwrap();
    assert_ne!(fresh.operation_id(), first_id);
    assert!(matches!(
        orch.get_result(fresh.operation_id()),
        Ok(ResultView::Completed(_))
    ));
    assert!(!orch.contains(&first_id));
    assert_eq!(service.analyze_count(), 2);
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let service = ScriptedService::new();
    let orch = orchestrator(&service, &MemoryBlobStore::new(), default_config());

    assert!(matches!(
        orch.get_result("missing"),
        Err(Error::OperationNotFound(id)) if id == "missing"
    ));
    assert!(orch.attach("missing").is_err());
}
