//! The dispatch engine: claims due tasks, advances their schedule, submits
//! them to the worker pool, and finalises outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::cron;
use crate::handlers::HandlerRegistry;
use crate::models::Task;
use crate::store::Store;
use crate::worker_pool::WorkerPool;

pub struct EngineConfig {
    pub poll_interval: Duration,
    pub max_concurrent_tasks: usize,
    pub default_task_timeout_seconds: u64,
    pub shutdown_timeout: Duration,
}

/// Process-wide handle to the dispatch engine. Cloning is cheap; every clone
/// refers to the same running (or stopped) engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineRef>,
}

struct EngineRef {
    store: Store,
    clock: Arc<dyn Clock>,
    handlers: Arc<HandlerRegistry>,
    config: EngineConfig,
    shutdown: Arc<Notify>,
    dispatch_handle: RwLock<Option<JoinHandle<()>>>,
    pool: RwLock<Option<WorkerPool>>,
}

impl Engine {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        handlers: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineRef {
                store,
                clock,
                handlers,
                config,
                shutdown: Arc::new(Notify::new()),
                dispatch_handle: RwLock::new(None),
                pool: RwLock::new(None),
            }),
        }
    }

    /// Start the claim loop. Idempotent: calling `start` while already
    /// running logs and returns.
    pub async fn start(&self) {
        let mut handle_guard = self.inner.dispatch_handle.write().await;
        if handle_guard.is_some() {
            tracing::warn!("engine is already running");
            return;
        }

        let pool = WorkerPool::new(
            self.inner.config.max_concurrent_tasks,
            self.inner.config.shutdown_timeout,
        );
        *self.inner.pool.write().await = Some(pool);

        let engine = self.clone();
        let shutdown = Arc::clone(&self.inner.shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.inner.config.poll_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.notified() => {
                        tracing::info!("dispatch engine received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Run the tick on its own task so a panic inside it
                        // (store bug, handler bug surfacing synchronously)
                        // is caught by the JoinHandle rather than unwinding
                        // this loop and silently ending the dispatch engine.
                        let tick_engine = engine.clone();
                        match tokio::spawn(async move { tick_engine.tick().await }).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::error!("dispatch tick failed: {:#}", e),
                            Err(join_err) => {
                                tracing::error!("dispatch tick panicked: {:?}", join_err)
                            }
                        }
                    }
                }
            }
        });

        *handle_guard = Some(handle);
        tracing::info!("dispatch engine started");
    }

    /// Stop the claim loop and drain the worker pool. Idempotent.
    pub async fn stop(&self) {
        let mut handle_guard = self.inner.dispatch_handle.write().await;
        let Some(handle) = handle_guard.take() else {
            tracing::debug!("engine already stopped");
            return;
        };

        self.inner.shutdown.notify_waiters();
        if tokio::time::timeout(self.inner.config.shutdown_timeout, handle)
            .await
            .is_err()
        {
            tracing::warn!("dispatch loop did not stop within shutdown timeout");
        }

        if let Some(pool) = self.inner.pool.write().await.take() {
            pool.shutdown().await;
        }

        tracing::info!("dispatch engine stopped");
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = self.inner.clock.wall_now();

        let clock = Arc::clone(&self.inner.clock);
        let claimed = self.inner.store.claim_due_tasks(
            now,
            move || clock.wall_now(),
            |expr, after| match cron::next_after(expr, after) {
                Ok(next) => Ok(Some(next)),
                Err(e) => Err(e),
            },
        )?;

        if claimed.is_empty() {
            return Ok(());
        }

        tracing::debug!("claimed {} due task(s)", claimed.len());

        let pool_guard = self.inner.pool.read().await;
        let Some(pool) = pool_guard.as_ref() else {
            return Ok(());
        };

        for task in claimed {
            let store = self.inner.store.clone();
            let clock = Arc::clone(&self.inner.clock);
            let handlers = Arc::clone(&self.inner.handlers);
            let default_timeout = self.inner.config.default_task_timeout_seconds;

            pool.submit(async move {
                run_and_finalize(store, clock, handlers, task, default_timeout).await;
            })
            .await;
        }

        Ok(())
    }
}

/// Runs one claimed task end to end: creates the Execution row, dispatches
/// to the registered handler, records the outcome, applies soft-timeout
/// reclassification, and finally clears `running` (and, for interval
/// schedules, re-advances `next_run_at` from completion time).
async fn run_and_finalize(
    store: Store,
    clock: Arc<dyn Clock>,
    handlers: Arc<HandlerRegistry>,
    task: Task,
    default_timeout_seconds: u64,
) {
    let start_mono = clock.monotonic_now();
    let started_at = clock.wall_now();

    let execution = match store.create_execution(task.id, started_at) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("failed to create execution row for task {}: {:#}", task.id, e);
            if let Err(e) = store.finish_task_run(task.id, Utc::now()) {
                tracing::error!("failed to clear running flag for task {}: {:#}", task.id, e);
            }
            return;
        }
    };

    let handler = handlers.get(task.kind);
    let outcome = match handler {
        Some(handler) => handler.run(&store, &task).await,
        None => Err(anyhow::anyhow!("no handler registered for kind {:?}", task.kind)),
    };

    let finished_at = clock.wall_now();

    let (status, detail, result) = match outcome {
        Ok(result) => ("success", None, Some(result)),
        Err(e) => {
            tracing::warn!("task {} ({}) failed: {:#}", task.id, task.name, e);
            ("failed", Some(e.to_string()), None)
        }
    };

    if let Err(e) =
        store.finalize_execution(execution.id, status, finished_at, detail.as_deref(), result)
    {
        tracing::error!("failed to finalize execution {}: {:#}", execution.id, e);
    }

    // Soft timeout check: measured wall-clock if both timestamps are
    // present, else fall back to the monotonic delta. Never reclassifies a
    // failed run.
    if status == "success" {
        let limit_secs = task.timeout_seconds.map(|s| s as u64).unwrap_or(default_timeout_seconds);
        let wall_duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        let mono_duration_secs = || clock.monotonic_now().duration_since(start_mono).as_secs_f64();

        if exceeded_timeout(wall_duration_secs, mono_duration_secs, limit_secs) {
            let detail = format!("Exceeded timeout of {}s", limit_secs);
            if let Err(e) = store.reclassify_execution_as_timeout(execution.id, &detail) {
                tracing::error!(
                    "failed to reclassify execution {} as timeout: {:#}",
                    execution.id,
                    e
                );
            }
        }
    }

    if let Err(e) = store.finish_task_run(task.id, finished_at) {
        tracing::error!(
            "failed to clear running flag / advance schedule for task {}: {:#}",
            task.id,
            e
        );
    }
}

/// Decide whether a successful run should be reclassified as `timeout`.
/// Uses the wall-clock duration when it is non-negative (the normal case);
/// falls back to the monotonic delta so a clock that jumps backwards
/// between `started_at` and `finished_at` never masks a real overrun.
fn exceeded_timeout(
    wall_duration_secs: f64,
    mono_duration_secs: impl FnOnce() -> f64,
    limit_secs: u64,
) -> bool {
    let duration_secs = if wall_duration_secs >= 0.0 {
        wall_duration_secs
    } else {
        mono_duration_secs()
    };
    duration_secs > limit_secs as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_not_a_timeout() {
        assert!(!exceeded_timeout(1.5, || unreachable!(), 2));
    }

    #[test]
    fn over_limit_is_a_timeout() {
        assert!(exceeded_timeout(3.0, || unreachable!(), 1));
    }

    #[test]
    fn exactly_at_limit_is_not_a_timeout() {
        assert!(!exceeded_timeout(2.0, || unreachable!(), 2));
    }

    #[test]
    fn negative_wall_duration_falls_back_to_monotonic() {
        assert!(exceeded_timeout(-1.0, || 5.0, 2));
        assert!(!exceeded_timeout(-1.0, || 1.0, 2));
    }
}
