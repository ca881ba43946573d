//! HTTP surface: a thin, validating collaborator around the Store. The
//! dispatch engine is the system's core; this module exists to let humans
//! and the CLI create and inspect tasks.

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cron;
use crate::error::ApiError;
use crate::models::{Execution, Task};
use crate::store::{NewTask, Store, TaskPatch};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub api_key: Option<Arc<String>>,
    pub default_task_timeout_seconds: u64,
}

pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{id}", patch(update_task).get(get_task).delete(delete_task))
        .route("/tasks/{id}/executions", get(list_task_executions))
        .route("/executions", get(list_executions))
        .route("/upcoming", get(list_upcoming))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/healthz", get(health))
        .merge(guarded)
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == expected.as_str() => Ok(next.run(request).await),
        _ => Err(ApiError::Unauthorized),
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Deserialize)]
struct TaskCreateBody {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    schedule_type: String,
    interval_seconds: Option<i32>,
    cron_expression: Option<String>,
    next_run_at: Option<DateTime<Utc>>,
    params: Option<serde_json::Value>,
    timeout_seconds: Option<i32>,
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<TaskCreateBody>,
) -> Result<Json<Task>, ApiError> {
    // task kind must be recognised; schedule_kind drives which fields are required.
    body.kind
        .parse::<crate::models::TaskKind>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let now = Utc::now();
    let next_run_at = match body.schedule_type.as_str() {
        "interval" => {
            let interval = body.interval_seconds.ok_or_else(|| {
                ApiError::Validation("interval_seconds is required for interval schedules".into())
            })?;
            if interval < 1 {
                return Err(ApiError::Validation("interval_seconds must be >= 1".into()));
            }
            Some(body.next_run_at.unwrap_or(now))
        }
        "once" => {
            let when = body.next_run_at.ok_or_else(|| {
                ApiError::Validation("next_run_at is required for once schedules".into())
            })?;
            Some(when)
        }
        "cron" => {
            let expr = body.cron_expression.as_deref().ok_or_else(|| {
                ApiError::Validation("cron_expression is required for cron schedules".into())
            })?;
            let default_next = cron::next_after(expr, now)
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            Some(body.next_run_at.unwrap_or(default_next))
        }
        other => {
            return Err(ApiError::Validation(format!(
                "schedule_type must be 'interval', 'once', or 'cron', got '{}'",
                other
            )))
        }
    };

    if let Some(timeout) = body.timeout_seconds {
        if timeout < 1 {
            return Err(ApiError::Validation("timeout_seconds must be >= 1".into()));
        }
    }

    let task = state.store.create_task(NewTask {
        name: &body.name,
        kind: &body.kind,
        schedule_kind: &body.schedule_type,
        interval_seconds: body.interval_seconds,
        cron_expression: body.cron_expression.as_deref(),
        next_run_at,
        params: body.params,
        timeout_seconds: body.timeout_seconds,
    })?;

    Ok(Json(task))
}

#[derive(Deserialize)]
struct TaskUpdateBody {
    next_run_at: Option<DateTime<Utc>>,
    interval_seconds: Option<i32>,
    cron_expression: Option<String>,
    timeout_seconds: Option<i32>,
    params: Option<serde_json::Value>,
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<TaskUpdateBody>,
) -> Result<Json<Task>, ApiError> {
    if let Some(interval) = body.interval_seconds {
        if interval < 1 {
            return Err(ApiError::Validation("interval_seconds must be >= 1".into()));
        }
    }
    if let Some(timeout) = body.timeout_seconds {
        if timeout < 1 {
            return Err(ApiError::Validation("timeout_seconds must be >= 1".into()));
        }
    }
    if let Some(expr) = &body.cron_expression {
        cron::parse(expr).map_err(|e| ApiError::Validation(e.to_string()))?;
    }

    let mut patch = TaskPatch::default();
    if body.next_run_at.is_some() {
        patch.next_run_at = Some(body.next_run_at);
    }
    if body.interval_seconds.is_some() {
        patch.interval_seconds = Some(body.interval_seconds);
    }
    if body.cron_expression.is_some() {
        patch.cron_expression = Some(body.cron_expression);
    }
    if body.timeout_seconds.is_some() {
        patch.timeout_seconds = Some(body.timeout_seconds);
    }
    if body.params.is_some() {
        patch.params = Some(body.params);
    }

    let updated = state.store.update_task(id, patch)?;
    updated
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .store
        .get_task(id)?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;
    Ok(Json(task))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.store.list_tasks()?))
}

async fn list_upcoming(State(state): State<AppState>) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.store.list_upcoming()?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.delete_task(id)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("task {} not found", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_task_executions(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    state
        .store
        .get_task(id)?
        .ok_or_else(|| ApiError::NotFound(format!("task {} not found", id)))?;
    Ok(Json(state.store.list_executions_for_task(id)?))
}

async fn list_executions(State(state): State<AppState>) -> Result<Json<Vec<Execution>>, ApiError> {
    Ok(Json(state.store.list_executions()?))
}

/// Request logging layer, applied at the router root in `main`/`server.rs`
/// alongside `tower_http::trace::TraceLayer`.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "request completed"
    );

    response
}
