use crate::cache::SnapshotCache;
use crate::classifier::{
    classify_part_three, classify_part_two, is_part_one_complete, CompletionRules, CompletionSignal,
};
use crate::errors::{AppError, AppResult};
use crate::identity::{validate_email, validate_group_id, validate_user_id};
use crate::models::{
    AssessmentPart, CompletionPolicy, PartOneRecord, PartOneStatus, PartThreeLocation, PartThreeRecord,
    PartThreeStatus, PartTwoRecord, PartTwoSource, ProgressSettings, Responses, SaveOutcome, WriteStrategy,
};
use crate::store::{call_store, ProgressStore};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Duration;

type LockMap = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// One async mutex per user, so overlapping saves for the same user merge
/// one after the other instead of racing each other's reads. An entry lives
/// only while someone holds or waits on it.
#[derive(Clone, Default)]
struct UserLocks {
    locks: LockMap,
}

impl UserLocks {
    async fn acquire(&self, user_id: &str) -> UserLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        UserLockGuard {
            user_id: user_id.to_string(),
            lock,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct UserLockGuard {
    user_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters hold their own clone, so two references means the map and us.
        let idle = locks
            .get(&self.user_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(&self.lock) == 2);
        if idle {
            locks.remove(&self.user_id);
        }
    }
}

/// Load-merge-store writes for every part.
///
/// Every save reads the record the reconciler would resolve (legacy rows
/// included), merges the delta over it and writes the result to the current
/// tables. Failures always propagate.
#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn ProgressStore>,
    settings: Arc<RwLock<ProgressSettings>>,
    cache: SnapshotCache,
    locks: UserLocks,
}

impl Writer {
    pub fn new(store: Arc<dyn ProgressStore>, settings: Arc<RwLock<ProgressSettings>>, cache: SnapshotCache) -> Self {
        Self {
            store,
            settings,
            cache,
            locks: UserLocks::default(),
        }
    }

    pub async fn save_part_one(
        &self,
        user_id: &str,
        email: &str,
        delta: &Responses,
        group_id: Option<&str>,
    ) -> AppResult<SaveOutcome> {
        validate_email(email)?;
        self.write_part_one(user_id, Some(email), delta, group_id, false).await
    }

    pub async fn complete_part_one(&self, user_id: &str) -> AppResult<SaveOutcome> {
        self.write_part_one(user_id, None, &Responses::new(), None, true).await
    }

    pub async fn set_fit_message(&self, user_id: &str, fit_message: &str) -> AppResult<()> {
        validate_user_id(user_id)?;
        let settings = self.settings().await;
        let _guard = self.locks.acquire(user_id).await;

        let owner = user_id.to_string();
        let message = fit_message.to_string();
        self.store_write(&settings, "set_fit_message", move |store| {
            store.set_fit_message(&owner, &message)
        })
        .await?;
        self.cache.mark_dirty(user_id).await;
        Ok(())
    }

    /// Creates the Part Two row, carrying legacy answers forward when the user
    /// only has a legacy row.
    pub async fn start_part_two(&self, user_id: &str) -> AppResult<PartTwoRecord> {
        validate_user_id(user_id)?;
        let settings = self.settings().await;
        let _guard = self.locks.acquire(user_id).await;

        let group_id = self.resolve_group(&settings, user_id, None).await?;
        let existing = self.load_part_two(&settings, user_id, &group_id).await?;
        if let Some(record) = existing.as_ref().filter(|record| record.source == PartTwoSource::Unified) {
            return Ok(record.clone());
        }

        let rules = CompletionRules::from(&settings);
        let record = self.prepare_part_two(existing, user_id, &group_id, &rules);
        let changed: Vec<String> = record.responses.keys().cloned().collect();
        self.write_part_two(&settings, &record, changed).await?;
        self.cache.mark_dirty(user_id).await;
        tracing::info!(user_id = %user_id, group_id = %group_id, "part two started");
        Ok(record)
    }

    pub async fn save_part_two(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        delta: &Responses,
    ) -> AppResult<SaveOutcome> {
        self.write_part_two_responses(user_id, group_id, delta, None, false).await
    }

    /// Moves the resume point without touching answers.
    pub async fn set_part_two_section(&self, user_id: &str, section: i64) -> AppResult<()> {
        if section < 0 {
            return Err(AppError::Validation(format!("Invalid section index: {}", section)));
        }
        self.write_part_two_responses(user_id, None, &Responses::new(), Some(section), false)
            .await
            .map(|_| ())
    }

    /// Explicit submit. Stamps completion whatever the completion policy.
    pub async fn submit_part_two(&self, user_id: &str, delta: &Responses) -> AppResult<SaveOutcome> {
        self.write_part_two_responses(user_id, None, delta, None, true).await
    }

    pub async fn save_part_three(&self, user_id: &str, delta: &Responses) -> AppResult<SaveOutcome> {
        self.write_part_three(user_id, delta, false).await
    }

    pub async fn complete_part_three(&self, user_id: &str, delta: &Responses) -> AppResult<SaveOutcome> {
        self.write_part_three(user_id, delta, true).await
    }

    /// Part-agnostic entry point. A Part One save through here keeps the
    /// stored email.
    pub async fn save_responses(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        part: AssessmentPart,
        delta: &Responses,
    ) -> AppResult<SaveOutcome> {
        match part {
            AssessmentPart::One => self.write_part_one(user_id, None, delta, group_id, false).await,
            AssessmentPart::Two => self.write_part_two_responses(user_id, group_id, delta, None, false).await,
            AssessmentPart::Three => {
                if let Some(group_id) = group_id {
                    validate_group_id(group_id)?;
                    let settings = self.settings().await;
                    self.ensure_group_matches(&settings, user_id, group_id).await?;
                }
                self.write_part_three(user_id, delta, false).await
            }
        }
    }

    async fn settings(&self) -> ProgressSettings {
        self.settings.read().await.clone()
    }

    async fn write_part_one(
        &self,
        user_id: &str,
        email: Option<&str>,
        delta: &Responses,
        group_id: Option<&str>,
        explicit: bool,
    ) -> AppResult<SaveOutcome> {
        validate_user_id(user_id)?;
        if let Some(group_id) = group_id {
            validate_group_id(group_id)?;
        }
        let settings = self.settings().await;
        let rules = CompletionRules::from(&settings);
        let _guard = self.locks.acquire(user_id).await;

        let existing = self.load_part_one(&settings, user_id).await?;
        if let (Some(requested), Some(current)) = (group_id, existing.as_ref().and_then(|r| r.group_id.as_deref())) {
            if requested != current {
                return Err(group_mismatch(user_id, current, requested));
            }
        }
        if existing.is_none() && email.is_none() {
            return Err(AppError::NotFound(format!("No part one record for user {}", user_id)));
        }

        let was_complete = is_part_one_complete(existing.as_ref(), &rules);
        let merged_count = merged_len(existing.as_ref().map(|record| &record.responses), delta);
        let stamp = if explicit {
            Some(PartOneStatus::Completed)
        } else if settings.completion_policy == CompletionPolicy::AutoOnThreshold
            && merged_count >= rules.part_one_threshold
        {
            Some(PartOneStatus::Part1Complete)
        } else {
            None
        };

        let owner = user_id.to_string();
        let email = email.map(ToString::to_string);
        let delta_owned = delta.clone();
        let group = group_id.map(ToString::to_string);
        let record = self
            .store_write(&settings, "upsert_part_one", move |store| {
                store.upsert_part_one(&owner, email.as_deref(), &delta_owned, group.as_deref(), stamp)
            })
            .await?;
        self.cache.mark_dirty(user_id).await;

        let completed = is_part_one_complete(Some(&record), &rules);
        let group_id = record
            .group_id
            .clone()
            .ok_or_else(|| AppError::Internal(format!("part one for {} saved without a group id", user_id)))?;
        if completed && !was_complete {
            tracing::info!(user_id = %user_id, group_id = %group_id, "part one completed");
        }

        Ok(SaveOutcome {
            part: AssessmentPart::One,
            group_id,
            response_count: record.responses.len(),
            completed,
            newly_completed: completed && !was_complete,
        })
    }

    async fn write_part_two_responses(
        &self,
        user_id: &str,
        group_id: Option<&str>,
        delta: &Responses,
        section: Option<i64>,
        explicit: bool,
    ) -> AppResult<SaveOutcome> {
        validate_user_id(user_id)?;
        if let Some(group_id) = group_id {
            validate_group_id(group_id)?;
        }
        let settings = self.settings().await;
        let rules = CompletionRules::from(&settings);
        let _guard = self.locks.acquire(user_id).await;

        let group_id = self.resolve_group(&settings, user_id, group_id).await?;
        let existing = self.load_part_two(&settings, user_id, &group_id).await?;
        let was_complete = classify_part_two(existing.as_ref(), &rules).is_some();

        let mut record = self.prepare_part_two(existing, user_id, &group_id, &rules);
        for (key, value) in delta {
            record.responses.insert(key.clone(), value.clone());
        }
        if let Some(section) = section {
            record.current_section = section;
        }

        let now = Utc::now();
        let crosses_threshold = settings.completion_policy == CompletionPolicy::AutoOnThreshold
            && record.responses.len() >= rules.part_two_threshold;
        if explicit || (crosses_threshold && record.submitted_at.is_none()) {
            record.completed = true;
            record.submitted_at.get_or_insert(now);
        }
        record.updated_at = now;

        let changed: Vec<String> = delta.keys().cloned().collect();
        let strategy = self.write_part_two(&settings, &record, changed).await?;
        self.cache.mark_dirty(user_id).await;

        let completed = classify_part_two(Some(&record), &rules).is_some();
        if completed && !was_complete {
            tracing::info!(
                user_id = %user_id,
                group_id = %group_id,
                strategy = strategy.as_str(),
                responses = record.responses.len(),
                "part two completed"
            );
        }

        Ok(SaveOutcome {
            part: AssessmentPart::Two,
            group_id,
            response_count: record.responses.len(),
            completed,
            newly_completed: completed && !was_complete,
        })
    }

    async fn write_part_three(&self, user_id: &str, delta: &Responses, explicit: bool) -> AppResult<SaveOutcome> {
        validate_user_id(user_id)?;
        let settings = self.settings().await;
        let _guard = self.locks.acquire(user_id).await;

        let group_id = self.resolve_group(&settings, user_id, None).await?;
        let owner = user_id.to_string();
        let existing = self
            .store_read(&settings, "get_part_three", move |store| store.get_part_three(&owner))
            .await?;
        let was_complete = classify_part_three(existing.as_ref()) == PartThreeStatus::Complete;

        let now = Utc::now();
        let mut record = match existing {
            Some(mut record) => {
                // Embedded rows are migrated into the dedicated table on first write.
                if record.location == PartThreeLocation::EmbeddedInPartTwo {
                    record.location = PartThreeLocation::Dedicated;
                    record.created_at = now;
                }
                record.user_id = Some(user_id.to_string());
                record.group_id.get_or_insert_with(|| group_id.clone());
                record
            }
            None => PartThreeRecord::empty(user_id, &group_id, now),
        };
        for (key, value) in delta {
            record.responses.insert(key.clone(), value.clone());
        }
        if explicit || was_complete {
            record.completed = true;
            record.completed_at.get_or_insert(now);
        }
        record.updated_at = now;

        let to_write = record.clone();
        self.store_write(&settings, "upsert_part_three", move |store| store.upsert_part_three(&to_write))
            .await?;
        self.cache.mark_dirty(user_id).await;

        let completed = classify_part_three(Some(&record)) == PartThreeStatus::Complete;
        if completed && !was_complete {
            tracing::info!(user_id = %user_id, group_id = %group_id, "part three completed");
        }

        Ok(SaveOutcome {
            part: AssessmentPart::Three,
            group_id,
            response_count: record.responses.len(),
            completed,
            newly_completed: completed && !was_complete,
        })
    }

    /// Existing record (or a fresh one) re-homed onto the user's row. Legacy
    /// completion evidence the unified table has no column for becomes the
    /// explicit flag, so migrating never un-completes a part.
    fn prepare_part_two(
        &self,
        existing: Option<PartTwoRecord>,
        user_id: &str,
        group_id: &str,
        rules: &CompletionRules,
    ) -> PartTwoRecord {
        let now = Utc::now();
        let Some(mut record) = existing else {
            return PartTwoRecord::empty(user_id, group_id, now);
        };
        if matches!(
            classify_part_two(Some(&record), rules),
            Some(CompletionSignal::Status | CompletionSignal::Percentage)
        ) {
            record.completed = true;
        }
        record.user_id = Some(user_id.to_string());
        record.group_id = group_id.to_string();
        record
    }

    /// Tries each configured strategy in order. A conflict gets one retry on
    /// the same strategy; caller errors stop the chain.
    async fn write_part_two(
        &self,
        settings: &ProgressSettings,
        record: &PartTwoRecord,
        changed_keys: Vec<String>,
    ) -> AppResult<WriteStrategy> {
        let record = Arc::new(record.clone());
        let changed_keys = Arc::new(changed_keys);
        let mut last_error = None;

        for strategy in settings.write_strategies.iter().copied() {
            let attempt = Arc::clone(&record);
            let keys = Arc::clone(&changed_keys);
            let result = self
                .store_write(settings, strategy.as_str(), move |store| {
                    store.write_part_two(strategy, &attempt, &keys)
                })
                .await;

            match result {
                Ok(()) => return Ok(strategy),
                Err(error) if error.is_caller_error() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        strategy = strategy.as_str(),
                        group_id = %record.group_id,
                        error = %error,
                        "part two write strategy failed; trying next"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Validation("no part two write strategies configured".to_string())))
    }

    async fn store_write<T, F>(&self, settings: &ProgressSettings, operation: &'static str, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProgressStore) -> AppResult<T> + Clone + Send + 'static,
    {
        let timeout = Duration::from_millis(settings.write_timeout_ms);
        match call_store(&self.store, timeout, operation, call.clone()).await {
            Err(AppError::Conflict(detail)) => {
                let backoff = jittered(settings.conflict_retry_backoff_ms);
                tracing::warn!(operation, detail = %detail, backoff_ms = backoff.as_millis() as u64, "write conflict; retrying once");
                tokio::time::sleep(backoff).await;
                call_store(&self.store, timeout, operation, call).await
            }
            other => other,
        }
    }

    async fn store_read<T, F>(&self, settings: &ProgressSettings, operation: &'static str, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProgressStore) -> AppResult<T> + Send + 'static,
    {
        call_store(&self.store, Duration::from_millis(settings.lookup_timeout_ms), operation, call).await
    }

    async fn load_part_one(&self, settings: &ProgressSettings, user_id: &str) -> AppResult<Option<PartOneRecord>> {
        let owner = user_id.to_string();
        self.store_read(settings, "get_part_one", move |store| store.get_part_one(&owner))
            .await
    }

    async fn load_part_two(
        &self,
        settings: &ProgressSettings,
        user_id: &str,
        group_id: &str,
    ) -> AppResult<Option<PartTwoRecord>> {
        let owner = user_id.to_string();
        let group = group_id.to_string();
        self.store_read(settings, "get_part_two", move |store| store.get_part_two(&owner, Some(&group)))
            .await
    }

    /// The user's group id. Later parts cannot start before Part One, and a
    /// requested group id must match the one already assigned.
    async fn resolve_group(
        &self,
        settings: &ProgressSettings,
        user_id: &str,
        requested: Option<&str>,
    ) -> AppResult<String> {
        let part_one = self
            .load_part_one(settings, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Part one must be saved before later parts for {}", user_id)))?;

        if let Some(current) = part_one.group_id {
            if let Some(requested) = requested {
                if requested != current {
                    return Err(group_mismatch(user_id, &current, requested));
                }
            }
            return Ok(current);
        }

        // Rows written before group ids existed get one now.
        let owner = user_id.to_string();
        let group = requested.map(ToString::to_string);
        let record = self
            .store_write(settings, "upsert_part_one", move |store| {
                store.upsert_part_one(&owner, None, &Responses::new(), group.as_deref(), None)
            })
            .await?;
        record
            .group_id
            .ok_or_else(|| AppError::Internal(format!("no group id could be assigned to {}", user_id)))
    }

    async fn ensure_group_matches(&self, settings: &ProgressSettings, user_id: &str, group_id: &str) -> AppResult<()> {
        if let Some(current) = self.load_part_one(settings, user_id).await?.and_then(|record| record.group_id) {
            if current != group_id {
                return Err(group_mismatch(user_id, &current, group_id));
            }
        }
        Ok(())
    }
}

fn group_mismatch(user_id: &str, current: &str, requested: &str) -> AppError {
    AppError::Validation(format!(
        "group id {} does not match {} already assigned to user {}",
        requested, current, user_id
    ))
}

fn merged_len(existing: Option<&Responses>, delta: &Responses) -> usize {
    match existing {
        Some(existing) => existing.len() + delta.keys().filter(|key| !existing.contains_key(*key)).count(),
        None => delta.len(),
    }
}

fn jittered(base_ms: u64) -> Duration {
    let jitter = if base_ms > 1 {
        rand::rng().random_range(0..=base_ms / 2)
    } else {
        0
    };
    Duration::from_millis(base_ms.saturating_add(jitter))
}
