//! Thin HTTP client for the scheduler API: list/create/inspect/delete tasks
//! and browse executions without touching the database directly.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "scheduler-cli", about = "Client for the task scheduler API")]
struct Cli {
    /// Base URL of the scheduler HTTP API
    #[arg(long, env = "SCHEDULER_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Shared secret sent as the x-api-key header, if the server requires one
    #[arg(long, env = "SCHEDULER_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all tasks
    List,
    /// List tasks with a non-null next_run_at, soonest first
    Upcoming,
    /// Show one task
    Get { id: i32 },
    /// Register a new task
    Create {
        name: String,
        #[arg(long = "type", value_name = "KIND")]
        kind: String,
        #[arg(long)]
        schedule_type: String,
        #[arg(long)]
        interval_seconds: Option<i32>,
        #[arg(long)]
        cron_expression: Option<String>,
        #[arg(long)]
        next_run_at: Option<String>,
        #[arg(long)]
        timeout_seconds: Option<i32>,
        /// Task-kind-specific params as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Delete a task (and its executions, via cascade)
    Delete { id: i32 },
    /// List executions for one task
    Executions { id: i32 },
    /// List executions across all tasks, most recent first
    AllExecutions,
    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let response = match cli.command {
        Command::List => get(&client, &cli, "/tasks").await?,
        Command::Upcoming => get(&client, &cli, "/upcoming").await?,
        Command::Get { id } => get(&client, &cli, &format!("/tasks/{}", id)).await?,
        Command::Delete { id } => delete(&client, &cli, &format!("/tasks/{}", id)).await?,
        Command::Executions { id } => get(&client, &cli, &format!("/tasks/{}/executions", id)).await?,
        Command::AllExecutions => get(&client, &cli, "/executions").await?,
        Command::Health => get(&client, &cli, "/healthz").await?,
        Command::Create {
            name,
            kind,
            schedule_type,
            interval_seconds,
            cron_expression,
            next_run_at,
            timeout_seconds,
            params,
        } => {
            let params = match params {
                Some(raw) => Some(
                    serde_json::from_str::<Value>(&raw).context("--params must be valid JSON")?,
                ),
                None => None,
            };

            let body = json!({
                "name": name,
                "type": kind,
                "schedule_type": schedule_type,
                "interval_seconds": interval_seconds,
                "cron_expression": cron_expression,
                "next_run_at": next_run_at,
                "timeout_seconds": timeout_seconds,
                "params": params,
            });

            post(&client, &cli, "/tasks", &body).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn get(client: &reqwest::Client, cli: &Cli, path: &str) -> Result<Value> {
    send(client.get(format!("{}{}", cli.api_url, path)), cli).await
}

async fn delete(client: &reqwest::Client, cli: &Cli, path: &str) -> Result<Value> {
    send(client.delete(format!("{}{}", cli.api_url, path)), cli).await
}

async fn post(client: &reqwest::Client, cli: &Cli, path: &str, body: &Value) -> Result<Value> {
    send(
        client.post(format!("{}{}", cli.api_url, path)).json(body),
        cli,
    )
    .await
}

async fn send(builder: reqwest::RequestBuilder, cli: &Cli) -> Result<Value> {
    let builder = match &cli.api_key {
        Some(key) => builder.header("x-api-key", key),
        None => builder,
    };

    let response = builder.send().await.context("request to scheduler API failed")?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        bail!("scheduler API returned {}: {}", status, body);
    }

    Ok(body)
}
