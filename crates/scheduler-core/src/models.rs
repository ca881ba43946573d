//! Task and Execution domain types, plus their Diesel row representations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::schema::{executions, tasks};

/// What a task actually does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Sleep,
    Counter,
    Http,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Sleep => "sleep",
            TaskKind::Counter => "counter",
            TaskKind::Http => "http",
        }
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sleep" => Ok(TaskKind::Sleep),
            "counter" => Ok(TaskKind::Counter),
            "http" => Ok(TaskKind::Http),
            _ => Err(anyhow::anyhow!(
                "invalid task kind: {}. must be 'sleep', 'counter', or 'http'",
                s
            )),
        }
    }
}

/// How a task's `next_run_at` is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    Once,
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
            ScheduleKind::Cron => "cron",
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interval" => Ok(ScheduleKind::Interval),
            "once" => Ok(ScheduleKind::Once),
            "cron" => Ok(ScheduleKind::Cron),
            _ => Err(anyhow::anyhow!(
                "invalid schedule kind: {}. must be 'interval', 'once', or 'cron'",
                s
            )),
        }
    }
}

/// Outcome of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "timeout" => Ok(ExecutionStatus::Timeout),
            _ => Err(anyhow::anyhow!("invalid execution status: {}", s)),
        }
    }
}

/// A scheduled task, fully typed.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(rename = "schedule_type")]
    pub schedule_kind: ScheduleKind,
    pub interval_seconds: Option<i32>,
    pub cron_expression: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row as returned by Diesel, before kind/schedule_kind are parsed into enums.
#[derive(Queryable, Debug)]
pub(crate) struct TaskRow {
    pub id: i32,
    pub name: String,
    pub kind: String,
    pub schedule_kind: String,
    pub interval_seconds: Option<i32>,
    pub cron_expression: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            name: row.name,
            kind: TaskKind::from_str(&row.kind)?,
            schedule_kind: ScheduleKind::from_str(&row.schedule_kind)?,
            interval_seconds: row.interval_seconds,
            cron_expression: row.cron_expression,
            next_run_at: row.next_run_at,
            params: row.params,
            timeout_seconds: row.timeout_seconds,
            running: row.running,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub(crate) struct NewTaskRow<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub schedule_kind: &'a str,
    pub interval_seconds: Option<i32>,
    pub cron_expression: Option<&'a str>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single execution record, fully typed.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: i32,
    pub task_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub detail: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Queryable, Debug)]
pub(crate) struct ExecutionRow {
    pub id: i32,
    pub task_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub detail: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = anyhow::Error;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        Ok(Execution {
            id: row.id,
            task_id: row.task_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: ExecutionStatus::from_str(&row.status)?,
            detail: row.detail,
            result: row.result,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = executions)]
pub(crate) struct NewExecutionRow {
    pub task_id: i32,
    pub started_at: DateTime<Utc>,
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_round_trips_through_as_str() {
        for kind in [TaskKind::Sleep, TaskKind::Counter, TaskKind::Http] {
            assert_eq!(TaskKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn schedule_kind_round_trips_through_as_str() {
        for kind in [ScheduleKind::Interval, ScheduleKind::Once, ScheduleKind::Cron] {
            assert_eq!(ScheduleKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn execution_status_round_trips_through_as_str() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Timeout,
        ] {
            assert_eq!(ExecutionStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unrecognized_task_kind_is_rejected() {
        assert!(TaskKind::from_str("bogus").is_err());
    }

    #[test]
    fn unrecognized_schedule_kind_is_rejected() {
        assert!(ScheduleKind::from_str("bogus").is_err());
    }
}
