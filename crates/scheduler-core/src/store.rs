//! Durable state for tasks and executions.
//!
//! Unlike the single `Arc<Mutex<PgConnection>>` pattern used elsewhere in
//! this codebase, the Store hands out pooled connections: the dispatch
//! engine's claim loop and every worker need to hold a connection
//! concurrently, and a single shared connection would serialize all of
//! them behind one mutex.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

use crate::models::{
    Execution, ExecutionRow, NewExecutionRow, NewTaskRow, Task, TaskRow,
};
use crate::schema::{executions, tasks};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// Fields accepted when registering a new task.
pub struct NewTask<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub schedule_kind: &'a str,
    pub interval_seconds: Option<i32>,
    pub cron_expression: Option<&'a str>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
}

/// Fields accepted when patching an existing task. `None` leaves a field
/// unchanged; this mirrors the partial-update semantics of `TaskUpdate` in
/// the original schema.
#[derive(Default)]
pub struct TaskPatch {
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    pub interval_seconds: Option<Option<i32>>,
    pub cron_expression: Option<Option<String>>,
    pub timeout_seconds: Option<Option<i32>>,
    pub params: Option<Option<serde_json::Value>>,
}

impl Store {
    pub fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("failed to build database connection pool")?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConn> {
        self.pool
            .get()
            .context("failed to check out a database connection")
    }

    pub fn create_task(&self, new_task: NewTask<'_>) -> Result<Task> {
        let mut conn = self.conn()?;
        let now = Utc::now();

        let row = NewTaskRow {
            name: new_task.name,
            kind: new_task.kind,
            schedule_kind: new_task.schedule_kind,
            interval_seconds: new_task.interval_seconds,
            cron_expression: new_task.cron_expression,
            next_run_at: new_task.next_run_at,
            params: new_task.params,
            timeout_seconds: new_task.timeout_seconds,
            created_at: now,
            updated_at: now,
        };

        let created: TaskRow = diesel::insert_into(tasks::table)
            .values(&row)
            .get_result(&mut conn)
            .context("failed to insert task")?;

        Task::try_from(created)
    }

    pub fn get_task(&self, task_id: i32) -> Result<Option<Task>> {
        let mut conn = self.conn()?;

        let row: Option<TaskRow> = tasks::table
            .filter(tasks::id.eq(task_id))
            .first(&mut conn)
            .optional()
            .context("failed to query task")?;

        row.map(Task::try_from).transpose()
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut conn = self.conn()?;

        let rows: Vec<TaskRow> = tasks::table
            .order(tasks::id.asc())
            .load(&mut conn)
            .context("failed to list tasks")?;

        rows.into_iter().map(Task::try_from).collect()
    }

    pub fn list_upcoming(&self) -> Result<Vec<Task>> {
        let mut conn = self.conn()?;

        let rows: Vec<TaskRow> = tasks::table
            .filter(tasks::next_run_at.is_not_null())
            .order(tasks::next_run_at.asc())
            .load(&mut conn)
            .context("failed to list upcoming tasks")?;

        rows.into_iter().map(Task::try_from).collect()
    }

    pub fn update_task(&self, task_id: i32, patch: TaskPatch) -> Result<Option<Task>> {
        let mut conn = self.conn()?;

        let updated: Option<TaskRow> = conn.transaction(|conn| {
            let exists: Option<i32> = tasks::table
                .filter(tasks::id.eq(task_id))
                .select(tasks::id)
                .first(conn)
                .optional()?;

            if exists.is_none() {
                return Ok(None);
            }

            if let Some(next_run_at) = patch.next_run_at {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set(tasks::next_run_at.eq(next_run_at))
                    .execute(conn)?;
            }
            if let Some(interval_seconds) = patch.interval_seconds {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set(tasks::interval_seconds.eq(interval_seconds))
                    .execute(conn)?;
            }
            if let Some(cron_expression) = patch.cron_expression {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set(tasks::cron_expression.eq(cron_expression))
                    .execute(conn)?;
            }
            if let Some(timeout_seconds) = patch.timeout_seconds {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set(tasks::timeout_seconds.eq(timeout_seconds))
                    .execute(conn)?;
            }
            if let Some(params) = patch.params {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set(tasks::params.eq(params))
                    .execute(conn)?;
            }
            diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                .set(tasks::updated_at.eq(Utc::now()))
                .execute(conn)?;

            let row: TaskRow = tasks::table.filter(tasks::id.eq(task_id)).first(conn)?;
            Ok(Some(row))
        })?;

        updated.map(Task::try_from).transpose()
    }

    pub fn delete_task(&self, task_id: i32) -> Result<bool> {
        let mut conn = self.conn()?;

        let deleted = diesel::delete(tasks::table.filter(tasks::id.eq(task_id)))
            .execute(&mut conn)
            .context("failed to delete task")?;

        Ok(deleted > 0)
    }

    pub fn list_executions_for_task(&self, task_id: i32) -> Result<Vec<Execution>> {
        let mut conn = self.conn()?;

        let rows: Vec<ExecutionRow> = executions::table
            .filter(executions::task_id.eq(task_id))
            .order(executions::started_at.asc())
            .load(&mut conn)
            .context("failed to list executions for task")?;

        rows.into_iter().map(Execution::try_from).collect()
    }

    pub fn list_executions(&self) -> Result<Vec<Execution>> {
        let mut conn = self.conn()?;

        let rows: Vec<ExecutionRow> = executions::table
            .order(executions::started_at.desc())
            .load(&mut conn)
            .context("failed to list executions")?;

        rows.into_iter().map(Execution::try_from).collect()
    }

    /// Transactionally claim every due task, advance its `next_run_at`, and
    /// mark it running -- all inside one row-level exclusive lock taken with
    /// skip-locked semantics, so concurrent schedulers never claim the same
    /// row.
    ///
    /// `now` is the reference instant used to select the due set (fixed for
    /// the whole transaction, taken once at tick start). `now_fn` is called
    /// fresh for *each* claimed row to compute that row's new `next_run_at`
    /// and `updated_at` -- re-sampling per row, rather than reusing `now`,
    /// is what keeps interval cadence monotonic even when a tick's claim
    /// transaction takes long enough to process many rows.
    pub fn claim_due_tasks(
        &self,
        now: DateTime<Utc>,
        now_fn: impl Fn() -> DateTime<Utc>,
        cron_next: impl Fn(&str, DateTime<Utc>) -> Result<Option<DateTime<Utc>>>,
    ) -> Result<Vec<Task>> {
        let mut conn = self.conn()?;

        let claimed: Vec<TaskRow> = conn.transaction(|conn| {
            let due: Vec<TaskRow> = tasks::table
                .filter(tasks::next_run_at.is_not_null())
                .filter(tasks::next_run_at.le(now))
                .filter(tasks::running.eq(false))
                .for_update()
                .skip_locked()
                .load(conn)?;

            let mut claimed = Vec::with_capacity(due.len());
            for row in due {
                let row_now = now_fn();

                let new_next_run_at = match row.schedule_kind.as_str() {
                    "interval" => row
                        .interval_seconds
                        .map(|secs| row_now + chrono::Duration::seconds(secs as i64)),
                    "cron" => match &row.cron_expression {
                        Some(expr) => cron_next(expr, row_now)
                            .map_err(|e| {
                                tracing::error!(
                                    "cron parse failure for task {}: {:#}; disabling",
                                    row.id,
                                    e
                                );
                                e
                            })
                            .unwrap_or(None),
                        None => None,
                    },
                    _ => None, // "once"
                };

                diesel::update(tasks::table.filter(tasks::id.eq(row.id)))
                    .set((
                        tasks::running.eq(true),
                        tasks::next_run_at.eq(new_next_run_at),
                        tasks::updated_at.eq(row_now),
                    ))
                    .execute(conn)?;

                let mut claimed_row = row;
                claimed_row.running = true;
                claimed_row.next_run_at = new_next_run_at;
                claimed.push(claimed_row);
            }

            diesel::result::QueryResult::Ok(claimed)
        })?;

        claimed.into_iter().map(Task::try_from).collect()
    }

    pub fn create_execution(&self, task_id: i32, started_at: DateTime<Utc>) -> Result<Execution> {
        let mut conn = self.conn()?;

        let new_execution = NewExecutionRow {
            task_id,
            started_at,
            status: "running",
        };

        let row: ExecutionRow = diesel::insert_into(executions::table)
            .values(&new_execution)
            .get_result(&mut conn)
            .context("failed to insert execution")?;

        Execution::try_from(row)
    }

    pub fn finalize_execution(
        &self,
        execution_id: i32,
        status: &str,
        finished_at: DateTime<Utc>,
        detail: Option<&str>,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::update(executions::table.filter(executions::id.eq(execution_id)))
            .set((
                executions::status.eq(status),
                executions::finished_at.eq(finished_at),
                executions::detail.eq(detail),
                executions::result.eq(result),
            ))
            .execute(&mut conn)
            .context("failed to finalize execution")?;

        Ok(())
    }

    pub fn reclassify_execution_as_timeout(&self, execution_id: i32, detail: &str) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::update(executions::table.filter(executions::id.eq(execution_id)))
            .set((
                executions::status.eq("timeout"),
                executions::detail.eq(detail),
            ))
            .execute(&mut conn)
            .context("failed to reclassify execution as timeout")?;

        Ok(())
    }

    /// Clear the running flag; for interval schedules, also overwrite
    /// `next_run_at` to be measured from completion rather than from the
    /// scheduled fire time. This asymmetry is intentional: it keeps a slow
    /// run from immediately re-firing to catch up.
    pub fn finish_task_run(&self, task_id: i32, finished_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn()?;

        conn.transaction(|conn| {
            let row: TaskRow = tasks::table.filter(tasks::id.eq(task_id)).first(conn)?;

            let mut set_next_run_at = None;
            if row.schedule_kind == "interval" {
                if let Some(secs) = row.interval_seconds {
                    set_next_run_at = Some(finished_at + chrono::Duration::seconds(secs as i64));
                }
            }

            if let Some(next_run_at) = set_next_run_at {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set((
                        tasks::running.eq(false),
                        tasks::next_run_at.eq(Some(next_run_at)),
                        tasks::updated_at.eq(finished_at),
                    ))
                    .execute(conn)?;
            } else {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set((tasks::running.eq(false), tasks::updated_at.eq(finished_at)))
                    .execute(conn)?;
            }

            diesel::result::QueryResult::Ok(())
        })?;

        Ok(())
    }

    pub fn set_task_params(&self, task_id: i32, params: serde_json::Value) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
            .set(tasks::params.eq(Some(params)))
            .execute(&mut conn)
            .context("failed to persist task params")?;

        Ok(())
    }
}
