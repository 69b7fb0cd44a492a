use crate::errors::{AppError, AppResult};
use crate::models::{
    ConfigArtifact, PartOneRecord, PartOneStatus, PartThreeRecord, PartTwoRecord, Responses, WriteStrategy,
};
use std::sync::Arc;
use std::time::Duration;

/// Semantic access to stored assessment state. Callers never see table layout
/// or which legacy shape a record came from.
///
/// Lookups return `Ok(None)` for a missing row. `Err` is reserved for the
/// store itself misbehaving.
pub trait ProgressStore: Send + Sync {
    /// Newest Part One row for the user when duplicates exist.
    fn get_part_one(&self, user_id: &str) -> AppResult<Option<PartOneRecord>>;

    /// Unified table first, then legacy by user id, then legacy by group id.
    fn get_part_two(&self, user_id: &str, group_id: Option<&str>) -> AppResult<Option<PartTwoRecord>>;

    /// Dedicated table first, then Part Three fields embedded in Part Two.
    fn get_part_three(&self, user_id: &str) -> AppResult<Option<PartThreeRecord>>;

    fn get_config_artifact(&self, group_id: &str) -> AppResult<Option<ConfigArtifact>>;

    /// Load-merge-store for Part One. Assigns a group id when the user has
    /// none. `stamp` only ever raises the status. A `None` email keeps the
    /// stored one.
    fn upsert_part_one(
        &self,
        user_id: &str,
        email: Option<&str>,
        delta: &Responses,
        group_id: Option<&str>,
        stamp: Option<PartOneStatus>,
    ) -> AppResult<PartOneRecord>;

    fn set_fit_message(&self, user_id: &str, fit_message: &str) -> AppResult<()>;

    /// Persist `record` as the user's Part Two state using one strategy.
    /// `changed_keys` names the responses touched by this save.
    fn write_part_two(
        &self,
        strategy: WriteStrategy,
        record: &PartTwoRecord,
        changed_keys: &[String],
    ) -> AppResult<()>;

    fn upsert_part_three(&self, record: &PartThreeRecord) -> AppResult<()>;

    fn save_config_artifact(&self, artifact: &ConfigArtifact) -> AppResult<()>;

    fn record_value_analysis(&self, user_id: &str, group_id: &str, data: &Responses) -> AppResult<()>;
}

/// Runs a blocking store call off the async runtime and bounds it.
pub(crate) async fn call_store<T, F>(
    store: &Arc<dyn ProgressStore>,
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProgressStore) -> AppResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let task = tokio::task::spawn_blocking(move || call(store.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(AppError::Internal(format!(
            "{} task failed: {}",
            operation, join_error
        ))),
        Err(_) => Err(AppError::Timeout(format!(
            "{} did not finish within {}ms",
            operation,
            timeout.as_millis()
        ))),
    }
}
