//! End-to-end dispatch-engine scenarios against a real Postgres instance.
//!
//! Each test drives a live `Engine` (claim loop + worker pool) the way a
//! deployed scheduler process would, rather than calling `Store` methods in
//! isolation, so they exercise the full claim -> dispatch -> finalise path.
//! Skipped when `DATABASE_URL` is unset; see `tests/common/mod.rs`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use scheduler_core::clock::{Clock, SystemClock};
use scheduler_core::engine::{Engine, EngineConfig};
use scheduler_core::handlers::HandlerRegistry;
use scheduler_core::models::ExecutionStatus;
use scheduler_core::store::NewTask;

fn test_engine(store: scheduler_core::store::Store, default_timeout_seconds: u64) -> Engine {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handlers = Arc::new(
        HandlerRegistry::with_defaults("http://localhost:0/unused".to_string())
            .expect("handler registry construction never fails for a syntactically valid URL"),
    );

    Engine::new(
        store,
        clock,
        handlers,
        EngineConfig {
            poll_interval: Duration::from_millis(200),
            max_concurrent_tasks: 4,
            default_task_timeout_seconds: default_timeout_seconds,
            shutdown_timeout: Duration::from_secs(2),
        },
    )
}

#[tokio::test]
async fn interval_sleep_task_fires_and_succeeds() {
    let Some((_guard, store)) = common::test_store().await else {
        return;
    };

    let task = store
        .create_task(NewTask {
            name: "sleep-1s-test",
            kind: "sleep",
            schedule_kind: "interval",
            interval_seconds: Some(1),
            cron_expression: None,
            next_run_at: Some(Utc::now()),
            params: Some(json!({ "duration": 1 })),
            timeout_seconds: None,
        })
        .expect("create_task failed");

    let engine = test_engine(store.clone(), 30);
    engine.start().await;

    let converged = common::wait_until(Duration::from_secs(8), || {
        store
            .list_executions_for_task(task.id)
            .unwrap_or_default()
            .iter()
            .any(|e| e.status == ExecutionStatus::Success)
    })
    .await;

    engine.stop().await;

    assert!(converged, "expected at least one successful execution within 8s");

    let executions = store.list_executions_for_task(task.id).unwrap();
    let success = executions
        .iter()
        .find(|e| e.status == ExecutionStatus::Success)
        .expect("a successful execution must be present");
    let slept_seconds = success.result.as_ref().unwrap()["slept_seconds"]
        .as_f64()
        .unwrap();
    assert!(
        (0.5..3.0).contains(&slept_seconds),
        "slept_seconds should be roughly the configured 1s duration, got {}",
        slept_seconds
    );
}

#[tokio::test]
async fn counter_task_persists_its_count_across_runs() {
    let Some((_guard, store)) = common::test_store().await else {
        return;
    };

    let task = store
        .create_task(NewTask {
            name: "counter-test",
            kind: "counter",
            schedule_kind: "interval",
            interval_seconds: Some(1),
            cron_expression: None,
            next_run_at: Some(Utc::now()),
            params: None,
            timeout_seconds: None,
        })
        .expect("create_task failed");

    let engine = test_engine(store.clone(), 30);
    engine.start().await;

    let converged = common::wait_until(Duration::from_secs(10), || {
        store
            .list_executions_for_task(task.id)
            .unwrap_or_default()
            .iter()
            .filter(|e| e.status == ExecutionStatus::Success)
            .count()
            >= 2
    })
    .await;

    engine.stop().await;

    assert!(converged, "expected at least 2 successful runs within 10s");

    let executions = store.list_executions_for_task(task.id).unwrap();
    let latest_count = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Success)
        .last()
        .and_then(|e| e.result.as_ref())
        .and_then(|r| r["count"].as_i64())
        .expect("latest successful execution must carry a count");

    let refreshed_task = store.get_task(task.id).unwrap().unwrap();
    let task_count = refreshed_task
        .params
        .as_ref()
        .and_then(|p| p["count"].as_i64())
        .expect("task params must carry the persisted count");

    assert!(latest_count >= 2);
    assert_eq!(latest_count, task_count);
}

#[tokio::test]
async fn once_schedule_fires_exactly_one_execution() {
    let Some((_guard, store)) = common::test_store().await else {
        return;
    };

    // Uses the sleep kind rather than http so this test has no dependency on
    // outbound network access; the "fires exactly once" behaviour under test
    // is schedule arithmetic, not the task body.
    let task = store
        .create_task(NewTask {
            name: "once-test",
            kind: "sleep",
            schedule_kind: "once",
            interval_seconds: None,
            cron_expression: None,
            next_run_at: Some(Utc::now() + chrono::Duration::seconds(1)),
            params: Some(json!({ "duration": 0 })),
            timeout_seconds: None,
        })
        .expect("create_task failed");

    let engine = test_engine(store.clone(), 30);
    engine.start().await;

    let converged = common::wait_until(Duration::from_secs(8), || {
        store
            .list_executions_for_task(task.id)
            .unwrap_or_default()
            .iter()
            .any(|e| e.status != ExecutionStatus::Running)
    })
    .await;
    assert!(converged, "expected the once task to finish within 8s");

    // Give it a further window in which a (buggy) re-fire would show up.
    tokio::time::sleep(Duration::from_secs(3)).await;

    engine.stop().await;

    let executions = store.list_executions_for_task(task.id).unwrap();
    assert_eq!(executions.len(), 1, "a once schedule must produce exactly one execution");

    let refreshed_task = store.get_task(task.id).unwrap().unwrap();
    assert_eq!(refreshed_task.next_run_at, None, "once schedules null out next_run_at after firing");
}

#[tokio::test]
async fn slow_run_is_reclassified_as_timeout() {
    let Some((_guard, store)) = common::test_store().await else {
        return;
    };

    let task = store
        .create_task(NewTask {
            name: "timeout-test",
            kind: "sleep",
            schedule_kind: "interval",
            interval_seconds: Some(10),
            cron_expression: None,
            next_run_at: Some(Utc::now()),
            params: Some(json!({ "duration": 3 })),
            timeout_seconds: Some(1),
        })
        .expect("create_task failed");

    let engine = test_engine(store.clone(), 30);
    engine.start().await;

    let converged = common::wait_until(Duration::from_secs(8), || {
        store
            .list_executions_for_task(task.id)
            .unwrap_or_default()
            .iter()
            .any(|e| e.status == ExecutionStatus::Timeout)
    })
    .await;

    engine.stop().await;

    assert!(converged, "expected the slow run to be reclassified as timeout within 8s");

    let executions = store.list_executions_for_task(task.id).unwrap();
    let timed_out = executions
        .iter()
        .find(|e| e.status == ExecutionStatus::Timeout)
        .expect("a timeout execution must be present");
    assert!(
        timed_out
            .detail
            .as_deref()
            .unwrap_or_default()
            .contains("Exceeded timeout of 1s"),
        "detail should mention the configured limit, got {:?}",
        timed_out.detail
    );
}

#[tokio::test]
async fn deleting_a_task_cascades_to_its_executions() {
    let Some((_guard, store)) = common::test_store().await else {
        return;
    };

    let task = store
        .create_task(NewTask {
            name: "delete-test",
            kind: "sleep",
            schedule_kind: "once",
            interval_seconds: None,
            cron_expression: None,
            next_run_at: Some(Utc::now()),
            params: Some(json!({ "duration": 0 })),
            timeout_seconds: None,
        })
        .expect("create_task failed");

    let engine = test_engine(store.clone(), 30);
    engine.start().await;

    common::wait_until(Duration::from_secs(8), || {
        !store
            .list_executions_for_task(task.id)
            .unwrap_or_default()
            .is_empty()
    })
    .await;

    engine.stop().await;

    let deleted = store.delete_task(task.id).unwrap();
    assert!(deleted);
    assert!(store.get_task(task.id).unwrap().is_none());
    assert!(store.list_executions_for_task(task.id).unwrap().is_empty());
}
