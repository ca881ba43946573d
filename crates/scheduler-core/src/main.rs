use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scheduler_core::api::{self, AppState};
use scheduler_core::clock::{Clock, SystemClock};
use scheduler_core::config::Config;
use scheduler_core::engine::{Engine, EngineConfig};
use scheduler_core::handlers::HandlerRegistry;
use scheduler_core::store::Store;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config);

    info!("scheduler starting up");

    run_migrations(&config.database_url)?;
    info!("database migrations applied");

    let store = Store::connect(&config.database_url, config.database_pool_size)
        .context("failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handlers = Arc::new(HandlerRegistry::with_defaults(config.http_task_url.clone())?);

    let engine = Engine::new(
        store.clone(),
        clock,
        handlers,
        EngineConfig {
            poll_interval: Duration::from_secs_f64(config.scheduler_poll_interval_seconds),
            max_concurrent_tasks: config.max_worker_threads,
            default_task_timeout_seconds: config.default_task_timeout_seconds,
            shutdown_timeout: Duration::from_secs(5),
        },
    );

    if config.scheduler_enable {
        engine.start().await;
    } else {
        info!("scheduler disabled via SCHEDULER_ENABLE=false; serving API only");
    }

    let app_state = AppState {
        store,
        api_key: config.api_key.clone().map(Arc::new),
        default_task_timeout_seconds: config.default_task_timeout_seconds,
    };

    let app = api::router(app_state)
        .layer(axum::middleware::from_fn(api::log_requests))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind to port {}", config.http_port))?;
    info!("HTTP API listening on port {}", config.http_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped, shutting down dispatch engine");
    engine.stop().await;

    info!("scheduler has shut down");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("scheduler_core={}", config.log_level)),
    );

    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn run_migrations(database_url: &str) -> Result<()> {
    let mut conn = connect_with_retry(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
    Ok(())
}

/// The database may still be starting up (e.g. in a freshly-provisioned
/// container), so give it up to a minute before giving up.
fn connect_with_retry(database_url: &str) -> Result<PgConnection> {
    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    let mut last_err = None;

    loop {
        match PgConnection::establish(database_url) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                last_err = Some(e);
                if std::time::Instant::now() >= deadline {
                    break;
                }
                warn!("database not ready yet, retrying");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to connect to database after 60s: {}",
        last_err.unwrap()
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("shutdown signal received");
}
