//! Scheduler core: persistent task scheduling with a transactional claim
//! loop, a bounded worker pool, and a thin REST surface.

pub mod api;
pub mod clock;
pub mod config;
pub mod cron;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod store;
pub mod worker_pool;

pub use config::Config;
pub use engine::{Engine, EngineConfig};
pub use error::ApiError;
pub use models::{Execution, ExecutionStatus, ScheduleKind, Task, TaskKind};
pub use store::Store;
