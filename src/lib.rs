mod cache;
mod classifier;
mod db;
mod errors;
mod generation;
mod identity;
mod models;
mod reconciler;
mod service;
mod store;
mod writer;

pub use crate::cache::SnapshotCache;
pub use crate::classifier::{
    classify_part_three, classify_part_two, is_part_one_complete, is_part_three_complete, is_part_two_complete,
    CompletionRules, CompletionSignal,
};
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::generation::{GenerationClient, GenerationResult, RoadmapRequest, ValueAnalysisRequest};
pub use crate::identity::{validate_group_id, validate_user_id};
pub use crate::models::*;
pub use crate::reconciler::Reconciler;
pub use crate::service::ProgressService;
pub use crate::store::ProgressStore;
pub use crate::writer::Writer;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "progress.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}
