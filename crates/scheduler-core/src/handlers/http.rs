use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::TaskHandler;
use crate::models::Task;
use crate::store::Store;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpHandler {
    client: reqwest::Client,
    default_url: String,
}

impl HttpHandler {
    pub fn new(default_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            default_url,
        })
    }
}

#[async_trait]
impl TaskHandler for HttpHandler {
    async fn run(&self, _store: &Store, task: &Task) -> Result<serde_json::Value> {
        let url = task
            .params
            .as_ref()
            .and_then(|p| p.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_url.clone());

        let start = std::time::Instant::now();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("http task request to {} failed", url))?;
        let elapsed = start.elapsed().as_secs_f64();

        Ok(json!({
            "status_code": response.status().as_u16(),
            "elapsed_seconds": elapsed,
        }))
    }
}
