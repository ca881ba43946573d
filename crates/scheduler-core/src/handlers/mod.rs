//! Task kind handlers: the actual work a task performs when dispatched.

mod counter;
mod http;
mod sleep;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Task, TaskKind};
use crate::store::Store;

/// A task handler executes one task and returns a JSON result on success.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, store: &Store, task: &Task) -> Result<serde_json::Value>;
}

/// Maps task kinds to their handler, built once at process startup and
/// shared across every worker.
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn with_defaults(http_task_url: String) -> Result<Self> {
        let mut handlers: HashMap<TaskKind, Arc<dyn TaskHandler>> = HashMap::new();
        handlers.insert(TaskKind::Sleep, Arc::new(sleep::SleepHandler));
        handlers.insert(TaskKind::Counter, Arc::new(counter::CounterHandler));
        handlers.insert(
            TaskKind::Http,
            Arc::new(http::HttpHandler::new(http_task_url)?),
        );
        Ok(Self { handlers })
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }
}
