//! Shared fixtures for the Postgres-backed integration tests.
//!
//! These tests only run when `DATABASE_URL` points at a real Postgres
//! instance; the pack carries no in-process Postgres double, so the suite
//! skips (prints a message and returns) rather than failing in
//! environments without one. Within a single test binary, tests share one
//! database, so `test_store` serializes access behind a process-wide
//! `tokio::sync::Mutex` to keep the claim loop's table scan from seeing
//! another test's tasks mid-run.

use std::sync::OnceLock;

use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::sync::{Mutex, MutexGuard};

use scheduler_core::store::Store;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_GUARD: OnceLock<Mutex<()>> = OnceLock::new();

/// Connects to `DATABASE_URL`, applies migrations, truncates both tables,
/// and returns a pooled `Store` guarded against concurrent use by other
/// tests in this binary. Returns `None` (and logs why) when `DATABASE_URL`
/// is unset, in which case the caller should skip the test.
pub async fn test_store() -> Option<(MutexGuard<'static, ()>, Store)> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: DATABASE_URL is not set");
            return None;
        }
    };

    let guard = DB_GUARD.get_or_init(|| Mutex::new(())).lock().await;

    let mut conn = PgConnection::establish(&database_url)
        .expect("failed to connect to DATABASE_URL for integration tests");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations against test database");
    diesel::sql_query("TRUNCATE TABLE executions, tasks RESTART IDENTITY CASCADE")
        .execute(&mut conn)
        .expect("failed to truncate tables between tests");

    let store = Store::connect(&database_url, 8).expect("failed to build connection pool");
    Some((guard, store))
}

/// Polls `predicate` every 100ms until it returns `true` or `timeout`
/// elapses, returning whether it converged. Used instead of a single sleep
/// so tests react as soon as the condition holds rather than always paying
/// the worst-case wait.
pub async fn wait_until<F>(timeout: std::time::Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
