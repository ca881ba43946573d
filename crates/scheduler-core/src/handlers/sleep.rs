use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::TaskHandler;
use crate::models::Task;
use crate::store::Store;

pub struct SleepHandler;

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn run(&self, _store: &Store, task: &Task) -> Result<serde_json::Value> {
        let duration_secs = task
            .params
            .as_ref()
            .and_then(|p| p.get("duration"))
            .and_then(|v| v.as_f64())
            .unwrap_or(2.0);

        let start = std::time::Instant::now();
        tokio::time::sleep(std::time::Duration::from_secs_f64(duration_secs)).await;
        let elapsed = start.elapsed().as_secs_f64();

        Ok(json!({ "slept_seconds": elapsed }))
    }
}
