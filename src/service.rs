use crate::cache::SnapshotCache;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::generation::{GenerationClient, GenerationResult, RoadmapRequest, ValueAnalysisRequest};
use crate::identity::validate_user_id;
use crate::models::{
    AssessmentPart, AssessmentProgress, ConfigArtifact, PartTwoRecord, ProgressSettings, Responses, RoadmapStatus,
    SaveOutcome,
};
use crate::reconciler::Reconciler;
use crate::store::{call_store, ProgressStore};
use crate::writer::Writer;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Entry point for callers. Owns the database and wires the reconciler,
/// writer and generation client around one shared settings value.
pub struct ProgressService {
    db: Arc<Database>,
    store: Arc<dyn ProgressStore>,
    settings: Arc<RwLock<ProgressSettings>>,
    cache: SnapshotCache,
    reconciler: Reconciler,
    writer: Writer,
    generation: RwLock<Option<GenerationClient>>,
}

impl ProgressService {
    pub fn open(data_dir: &Path) -> AppResult<Arc<Self>> {
        let db = Database::new(&data_dir.join("progress.sqlite"))?;
        Self::with_database(db)
    }

    pub fn with_database(db: Database) -> AppResult<Arc<Self>> {
        let db = Arc::new(db);
        let settings = db.get_settings()?;
        let generation = match GenerationClient::from_settings(&settings) {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(error = %error, "generation client disabled");
                None
            }
        };

        let store: Arc<dyn ProgressStore> = db.clone();
        let cache = SnapshotCache::new(settings.snapshot_cache_capacity);
        let settings = Arc::new(RwLock::new(settings));

        Ok(Arc::new(Self {
            reconciler: Reconciler::new(Arc::clone(&store), Arc::clone(&settings), cache.clone()),
            writer: Writer::new(Arc::clone(&store), Arc::clone(&settings), cache.clone()),
            db,
            store,
            settings,
            cache,
            generation: RwLock::new(generation),
        }))
    }

    pub async fn get_settings(&self) -> ProgressSettings {
        self.settings.read().await.clone()
    }

    /// Deep-merges `update` into the stored settings and applies it. The cache
    /// capacity only takes effect on the next `open`.
    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<ProgressSettings> {
        let db = Arc::clone(&self.db);
        let settings = tokio::task::spawn_blocking(move || db.update_settings(update))
            .await
            .map_err(|error| AppError::Internal(format!("settings update failed: {}", error)))??;

        let client = GenerationClient::from_settings(&settings)?;
        *self.generation.write().await = client;
        *self.settings.write().await = settings.clone();
        Ok(settings)
    }

    pub async fn load_progress(&self, user_id: &str) -> AssessmentProgress {
        self.reconciler.load_progress(user_id).await
    }

    pub async fn force_refresh_progress(&self, user_id: &str) -> AssessmentProgress {
        self.reconciler.force_refresh_progress(user_id).await
    }

    pub async fn roadmap_status(&self, user_id: &str) -> RoadmapStatus {
        self.reconciler.roadmap_status(user_id).await
    }

    pub async fn save_part_one(
        &self,
        user_id: &str,
        email: &str,
        responses: &Responses,
        group_id: Option<&str>,
    ) -> AppResult<SaveOutcome> {
        self.writer.save_part_one(user_id, email, responses, group_id).await
    }

    pub async fn complete_part_one(&self, user_id: &str) -> AppResult<SaveOutcome> {
        self.writer.complete_part_one(user_id).await
    }

    pub async fn set_fit_message(&self, user_id: &str, fit_message: &str) -> AppResult<()> {
        self.writer.set_fit_message(user_id, fit_message).await
    }

    pub async fn start_part_two(&self, user_id: &str) -> AppResult<PartTwoRecord> {
        self.writer.start_part_two(user_id).await
    }

    pub async fn save_part_two(
        self: &Arc<Self>,
        user_id: &str,
        group_id: Option<&str>,
        responses: &Responses,
    ) -> AppResult<SaveOutcome> {
        let outcome = self.writer.save_part_two(user_id, group_id, responses).await?;
        self.after_save(user_id, &outcome).await;
        Ok(outcome)
    }

    pub async fn set_part_two_section(&self, user_id: &str, section: i64) -> AppResult<()> {
        self.writer.set_part_two_section(user_id, section).await
    }

    pub async fn submit_part_two(self: &Arc<Self>, user_id: &str, responses: &Responses) -> AppResult<SaveOutcome> {
        let outcome = self.writer.submit_part_two(user_id, responses).await?;
        self.after_save(user_id, &outcome).await;
        Ok(outcome)
    }

    pub async fn save_part_three(&self, user_id: &str, responses: &Responses) -> AppResult<SaveOutcome> {
        self.writer.save_part_three(user_id, responses).await
    }

    pub async fn complete_part_three(
        self: &Arc<Self>,
        user_id: &str,
        responses: &Responses,
    ) -> AppResult<SaveOutcome> {
        let outcome = self.writer.complete_part_three(user_id, responses).await?;
        self.after_save(user_id, &outcome).await;
        Ok(outcome)
    }

    pub async fn save_responses(
        self: &Arc<Self>,
        user_id: &str,
        group_id: Option<&str>,
        part: AssessmentPart,
        responses: &Responses,
    ) -> AppResult<SaveOutcome> {
        let outcome = self.writer.save_responses(user_id, group_id, part, responses).await?;
        self.after_save(user_id, &outcome).await;
        Ok(outcome)
    }

    /// Calls the roadmap generator and records whatever it returns inline.
    pub async fn generate_roadmap(&self, user_id: &str) -> AppResult<GenerationResult> {
        validate_user_id(user_id)?;
        let client = self.generation_client().await?;
        let timeout = self.lookup_timeout().await;

        let group_id = self.group_for(user_id, timeout).await?;
        let owner = user_id.to_string();
        let group = group_id.clone();
        let part_two = call_store(&self.store, timeout, "get_part_two", move |store| {
            store.get_part_two(&owner, Some(&group))
        })
        .await?;

        let request = RoadmapRequest {
            group_id: group_id.clone(),
            user_id: user_id.to_string(),
            part2_responses: part_two.map(|record| record.responses),
        };
        let result = client.request_roadmap(&request).await?;

        if result.board.is_some() || result.roadmap.is_some() {
            let artifact = ConfigArtifact {
                group_id: group_id.clone(),
                board: result.board.clone(),
                roadmap: result.roadmap.clone(),
                roadmap_generated: result.roadmap.is_some(),
            };
            call_store(&self.store, timeout, "save_config_artifact", move |store| {
                store.save_config_artifact(&artifact)
            })
            .await?;
            self.cache.mark_dirty(user_id).await;
        }
        tracing::info!(user_id = %user_id, group_id = %group_id, "roadmap generation finished");
        Ok(result)
    }

    pub async fn generate_value_analysis(&self, user_id: &str) -> AppResult<GenerationResult> {
        validate_user_id(user_id)?;
        let client = self.generation_client().await?;
        let timeout = self.lookup_timeout().await;

        let group_id = self.group_for(user_id, timeout).await?;
        let owner = user_id.to_string();
        let part_three = call_store(&self.store, timeout, "get_part_three", move |store| {
            store.get_part_three(&owner)
        })
        .await?;

        let request = ValueAnalysisRequest {
            group_id: group_id.clone(),
            user_id: user_id.to_string(),
            part3_responses: part_three.map(|record| record.responses).unwrap_or_default(),
        };
        let result = client.request_value_analysis(&request).await?;

        if let Some(analysis) = result.value_analysis.clone() {
            let owner = user_id.to_string();
            let group = group_id.clone();
            call_store(&self.store, timeout, "record_value_analysis", move |store| {
                store.record_value_analysis(&owner, &group, &analysis)
            })
            .await?;
            self.cache.mark_dirty(user_id).await;
        }
        tracing::info!(user_id = %user_id, group_id = %group_id, "value analysis generation finished");
        Ok(result)
    }

    /// Fire-and-forget roadmap generation. `None` when no generator is set up.
    pub async fn spawn_roadmap_generation(self: &Arc<Self>, user_id: &str) -> Option<JoinHandle<()>> {
        self.generation.read().await.as_ref()?;
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        Some(tokio::spawn(async move {
            if let Err(error) = this.generate_roadmap(&user_id).await {
                tracing::warn!(user_id = %user_id, error = %error, "roadmap generation failed");
            }
        }))
    }

    pub async fn spawn_value_analysis_generation(self: &Arc<Self>, user_id: &str) -> Option<JoinHandle<()>> {
        self.generation.read().await.as_ref()?;
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        Some(tokio::spawn(async move {
            if let Err(error) = this.generate_value_analysis(&user_id).await {
                tracing::warn!(user_id = %user_id, error = %error, "value analysis generation failed");
            }
        }))
    }

    async fn after_save(self: &Arc<Self>, user_id: &str, outcome: &SaveOutcome) {
        if !outcome.newly_completed {
            return;
        }
        match outcome.part {
            AssessmentPart::Two => {
                self.spawn_roadmap_generation(user_id).await;
            }
            AssessmentPart::Three => {
                self.spawn_value_analysis_generation(user_id).await;
            }
            AssessmentPart::One => {}
        }
    }

    async fn generation_client(&self) -> AppResult<GenerationClient> {
        self.generation
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::Validation("no generation service configured".to_string()))
    }

    async fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.read().await.lookup_timeout_ms)
    }

    async fn group_for(&self, user_id: &str, timeout: Duration) -> AppResult<String> {
        let owner = user_id.to_string();
        call_store(&self.store, timeout, "get_part_one", move |store| store.get_part_one(&owner))
            .await?
            .and_then(|record| record.group_id)
            .ok_or_else(|| AppError::NotFound(format!("No group assigned to user {}", user_id)))
    }
}
