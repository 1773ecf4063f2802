//! The LOAD → DETECT → ALERT pipeline and its per-metric orchestration.
//!
//! Each stage persists its progress in the internal tables, so an
//! interrupted run resumes from the watermark instead of reprocessing.
//! The task manager serializes runs per metric through the database lock
//! and guarantees the lock is resolved on every exit path.

pub mod alerting;
pub mod db;
pub mod loader;
pub mod query_template;
pub mod runner;
pub mod task;

pub use alerting::build_dispatcher;
pub use db::open_database;
pub use loader::MetricLoader;
pub use runner::DetectionRunner;
pub use task::{RunOptions, RunOutcome, TaskManager};
