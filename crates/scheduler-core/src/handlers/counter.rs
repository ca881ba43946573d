use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::TaskHandler;
use crate::models::Task;
use crate::store::Store;

/// Demonstrates a handler mutating and persisting its own task's params.
pub struct CounterHandler;

#[async_trait]
impl TaskHandler for CounterHandler {
    async fn run(&self, store: &Store, task: &Task) -> Result<serde_json::Value> {
        let count = task
            .params
            .as_ref()
            .and_then(|p| p.get("count"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            + 1;

        store.set_task_params(task.id, json!({ "count": count }))?;

        Ok(json!({ "count": count }))
    }
}
