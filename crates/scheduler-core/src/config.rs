use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_pool_size: u32,

    pub http_port: u16,
    pub api_key: Option<String>,

    pub scheduler_enable: bool,
    pub scheduler_poll_interval_seconds: f64,
    pub max_worker_threads: usize,
    pub default_task_timeout_seconds: u64,

    pub http_task_url: String,

    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let max_worker_threads: usize = std::env::var("MAX_WORKER_THREADS")
            .unwrap_or_else(|_| "8".to_string())
            .parse()
            .context("MAX_WORKER_THREADS must be a positive integer")?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_pool_size: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(max_worker_threads as u32 + 4),

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
            api_key: std::env::var("API_KEY").ok(),

            scheduler_enable: std::env::var("SCHEDULER_ENABLE")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(true),
            scheduler_poll_interval_seconds: std::env::var("SCHEDULER_POLL_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()
                .context("SCHEDULER_POLL_INTERVAL_SECONDS must be a number")?,
            max_worker_threads,
            default_task_timeout_seconds: std::env::var("DEFAULT_TASK_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("DEFAULT_TASK_TIMEOUT_SECONDS must be a positive integer")?,

            http_task_url: std::env::var("HTTP_TASK_URL")
                .unwrap_or_else(|_| "https://httpbin.org/status/200".to_string()),

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: std::env::var("LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        })
    }
}
