use crate::cache::SnapshotCache;
use crate::classifier::{
    classify_part_three, has_value_analysis, is_part_one_complete, is_part_two_complete, is_validation_complete,
    CompletionRules,
};
use crate::errors::AppResult;
use crate::identity::validate_user_id;
use crate::models::{
    AssessmentProgress, ConfigArtifact, PartThreeRecord, PartThreeStatus, PartTwoRecord, ProgressSection,
    ProgressSettings, RoadmapStatus,
};
use crate::store::{call_store, ProgressStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Assembles one `AssessmentProgress` per user from the store.
///
/// Reads never fail. A section whose lookup errors or times out falls back to
/// the last snapshot served for the same group, or to its empty default, and
/// is listed in `degraded`.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ProgressStore>,
    settings: Arc<RwLock<ProgressSettings>>,
    cache: SnapshotCache,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ProgressStore>, settings: Arc<RwLock<ProgressSettings>>, cache: SnapshotCache) -> Self {
        Self { store, settings, cache }
    }

    pub async fn load_progress(&self, user_id: &str) -> AssessmentProgress {
        let settings = self.settings.read().await.clone();
        let ttl = Duration::from_secs(settings.snapshot_cache_ttl_seconds);
        if let Some(progress) = self.cache.fresh(user_id, ttl).await {
            tracing::debug!(user_id = %user_id, "serving cached progress snapshot");
            return progress;
        }
        self.reconcile(user_id, &settings).await
    }

    /// Same as `load_progress` but always goes to the store.
    pub async fn force_refresh_progress(&self, user_id: &str) -> AssessmentProgress {
        let settings = self.settings.read().await.clone();
        self.reconcile(user_id, &settings).await
    }

    pub async fn roadmap_status(&self, user_id: &str) -> RoadmapStatus {
        if let Err(error) = validate_user_id(user_id) {
            tracing::warn!(error = %error, "roadmap status requested for invalid user id");
            return RoadmapStatus::default();
        }
        let timeout = self.lookup_timeout().await;

        let owner = user_id.to_string();
        let group_id = match call_store(&self.store, timeout, "get_part_one", move |store| {
            store.get_part_one(&owner)
        })
        .await
        {
            Ok(Some(record)) => record.group_id,
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(user_id = %user_id, error = %error, "roadmap status could not resolve group");
                None
            }
        };
        let Some(group_id) = group_id else {
            return RoadmapStatus::default();
        };

        match self.lookup_config(timeout, &group_id).await {
            Ok(Some(artifact)) => RoadmapStatus {
                roadmap_exists: artifact.roadmap.is_some() || artifact.roadmap_generated,
                board_exists: artifact.board.is_some(),
                roadmap: artifact.roadmap,
                board: artifact.board,
            },
            Ok(None) => RoadmapStatus::default(),
            Err(error) => {
                tracing::warn!(group_id = %group_id, error = %error, "roadmap status lookup failed");
                RoadmapStatus::default()
            }
        }
    }

    pub(crate) fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    async fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.read().await.lookup_timeout_ms)
    }

    async fn lookup_config(&self, timeout: Duration, group_id: &str) -> AppResult<Option<ConfigArtifact>> {
        let group_id = group_id.to_string();
        call_store(&self.store, timeout, "get_config_artifact", move |store| {
            store.get_config_artifact(&group_id)
        })
        .await
    }

    async fn reconcile(&self, user_id: &str, settings: &ProgressSettings) -> AssessmentProgress {
        if let Err(error) = validate_user_id(user_id) {
            tracing::warn!(error = %error, "progress requested for invalid user id");
            return AssessmentProgress::default();
        }

        let rules = CompletionRules::from(settings);
        let timeout = Duration::from_millis(settings.lookup_timeout_ms);
        let started_epoch = self.cache.epoch(user_id).await;
        let last_known = self.cache.last_known(user_id).await;
        let mut progress = AssessmentProgress::default();

        let owner = user_id.to_string();
        let part_one = match call_store(&self.store, timeout, "get_part_one", move |store| {
            store.get_part_one(&owner)
        })
        .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                // Never started: there is no group to chase.
                self.cache.store_read(user_id, progress.clone(), started_epoch).await;
                return progress;
            }
            Err(error) => {
                tracing::warn!(user_id = %user_id, error = %error, "part one lookup failed; using last known progress");
                let mut fallback = last_known.unwrap_or_default();
                fallback.mark_degraded(ProgressSection::PartOne);
                return fallback;
            }
        };

        progress.part1_complete = is_part_one_complete(Some(&part_one), &rules);
        progress.part1_answers = part_one.responses.clone();
        progress.group_id = part_one.group_id.clone();
        progress.fit_message = part_one.fit_message.clone();

        // Sections from an older snapshot only stand in when they describe the same group.
        let same_group = last_known
            .as_ref()
            .filter(|last| last.group_id == progress.group_id);

        let owner = user_id.to_string();
        let group = progress.group_id.clone();
        let part_two = call_store(&self.store, timeout, "get_part_two", move |store| {
            store.get_part_two(&owner, group.as_deref())
        })
        .await;
        let mut part_two_roadmap = false;
        match part_two {
            Ok(record) => {
                part_two_roadmap = record.as_ref().is_some_and(|record| record.roadmap_generated);
                apply_part_two(&mut progress, record.as_ref(), &rules);
            }
            Err(error) => {
                tracing::warn!(user_id = %user_id, error = %error, "part two lookup failed");
                if let Some(last) = same_group {
                    progress.take_part_two_from(last);
                    part_two_roadmap = last.roadmap_generated;
                }
                progress.mark_degraded(ProgressSection::PartTwo);
            }
        }

        let owner = user_id.to_string();
        match call_store(&self.store, timeout, "get_part_three", move |store| {
            store.get_part_three(&owner)
        })
        .await
        {
            Ok(record) => apply_part_three(&mut progress, record.as_ref()),
            Err(error) => {
                tracing::warn!(user_id = %user_id, error = %error, "part three lookup failed");
                if let Some(last) = same_group {
                    progress.take_part_three_from(last);
                }
                progress.mark_degraded(ProgressSection::PartThree);
            }
        }

        progress.roadmap_generated = part_two_roadmap;
        if let Some(group_id) = progress.group_id.clone() {
            match self.lookup_config(timeout, &group_id).await {
                Ok(artifact) => apply_config(&mut progress, artifact),
                Err(error) => {
                    tracing::warn!(group_id = %group_id, error = %error, "config artifact lookup failed");
                    if let Some(last) = same_group {
                        progress.take_config_from(last);
                    }
                    progress.mark_degraded(ProgressSection::Config);
                }
            }
        }

        if let Some(last) = same_group {
            latch_completion(&mut progress, last);
        }

        if progress.is_degraded() {
            tracing::info!(user_id = %user_id, degraded = ?progress.degraded, "served degraded progress snapshot");
        } else {
            self.cache.store_read(user_id, progress.clone(), started_epoch).await;
        }
        progress
    }
}

fn apply_part_two(progress: &mut AssessmentProgress, record: Option<&PartTwoRecord>, rules: &CompletionRules) {
    progress.part2_complete = is_part_two_complete(record, rules);
    progress.validation_complete = is_validation_complete(record);
    if let Some(record) = record {
        progress.part2_answers = record.responses.clone();
        progress.current_part2_section = record.current_section;
        progress.validation_answers = record.validation_responses.clone();
    }
}

fn apply_part_three(progress: &mut AssessmentProgress, record: Option<&PartThreeRecord>) {
    progress.part3_status = classify_part_three(record);
    progress.part3_complete = progress.part3_status == PartThreeStatus::Complete;
    if let Some(record) = record {
        progress.part3_answers = record.responses.clone();
        if has_value_analysis(record) {
            progress.value_analysis = Some(record.value_analysis_data.clone());
        }
        progress.value_analysis_complete = record.value_analysis_generated || has_value_analysis(record);
    }
}

/// Either generation path counts: the flag on Part Two, or an artifact.
fn apply_config(progress: &mut AssessmentProgress, artifact: Option<ConfigArtifact>) {
    let Some(artifact) = artifact else {
        return;
    };
    progress.board_generated = artifact.board.is_some();
    progress.roadmap_generated =
        progress.roadmap_generated || artifact.roadmap.is_some() || artifact.roadmap_generated;
    progress.board = artifact.board;
    progress.roadmap = artifact.roadmap;
}

fn latch_completion(progress: &mut AssessmentProgress, last: &AssessmentProgress) {
    progress.part1_complete |= last.part1_complete;
    progress.part2_complete |= last.part2_complete;
    progress.part3_complete |= last.part3_complete;
    if progress.part3_complete {
        progress.part3_status = PartThreeStatus::Complete;
    }
    progress.validation_complete |= last.validation_complete;
    progress.value_analysis_complete |= last.value_analysis_complete;
    progress.board_generated |= last.board_generated;
    progress.roadmap_generated |= last.roadmap_generated;
}
