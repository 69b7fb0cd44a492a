use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question key to answer. Answers are whatever JSON the form produced.
pub type Responses = serde_json::Map<String, serde_json::Value>;

pub const PART_ONE_COMPLETION_THRESHOLD: usize = 15;
/// Canonical Part Two threshold. Older read paths used 55 in one place; 50 is
/// the value every write path agreed on.
pub const PART_TWO_COMPLETION_THRESHOLD: usize = 50;
pub const PART_TWO_COMPLETION_PERCENTAGE: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentPart {
    One,
    Two,
    Three,
}

impl AssessmentPart {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "part1",
            Self::Two => "part2",
            Self::Three => "part3",
        }
    }
}

/// Ordered so that `max` never moves a record backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartOneStatus {
    #[default]
    Unset,
    Part1Complete,
    Completed,
}

impl PartOneStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Part1Complete => "part1_complete",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("completed") => Self::Completed,
            Some("part1_complete") => Self::Part1Complete,
            _ => Self::Unset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartOneRecord {
    pub id: String,
    pub user_id: String,
    pub email: Option<String>,
    /// `None` only for rows written before group ids existed.
    pub group_id: Option<String>,
    pub responses: Responses,
    pub status: PartOneStatus,
    pub fit_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartTwoSource {
    Unified,
    Legacy,
}

/// Part Three fields that older deployments stored on the Part Two row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedPartThree {
    pub responses: Responses,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub value_analysis_generated: bool,
    pub value_analysis_data: Responses,
}

impl EmbeddedPartThree {
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
            && self.value_analysis_data.is_empty()
            && !self.completed
            && self.completed_at.is_none()
            && !self.value_analysis_generated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartTwoRecord {
    pub group_id: String,
    pub user_id: Option<String>,
    pub responses: Responses,
    pub current_section: i64,
    pub completed: bool,
    pub roadmap_generated: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub completion_percentage: Option<f64>,
    pub validation_responses: Responses,
    pub validation_completed_at: Option<DateTime<Utc>>,
    pub embedded_part_three: Option<EmbeddedPartThree>,
    pub source: PartTwoSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartTwoRecord {
    pub fn empty(user_id: &str, group_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            group_id: group_id.to_string(),
            user_id: Some(user_id.to_string()),
            responses: Responses::new(),
            current_section: 0,
            completed: false,
            roadmap_generated: false,
            submitted_at: None,
            status: None,
            completion_percentage: None,
            validation_responses: Responses::new(),
            validation_completed_at: None,
            embedded_part_three: None,
            source: PartTwoSource::Unified,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartThreeLocation {
    Dedicated,
    EmbeddedInPartTwo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartThreeRecord {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub responses: Responses,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub value_analysis_generated: bool,
    pub value_analysis_data: Responses,
    pub business_stage: Option<String>,
    pub location: PartThreeLocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartThreeRecord {
    pub fn empty(user_id: &str, group_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            group_id: Some(group_id.to_string()),
            responses: Responses::new(),
            completed: false,
            completed_at: None,
            value_analysis_generated: false,
            value_analysis_data: Responses::new(),
            business_stage: None,
            location: PartThreeLocation::Dedicated,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_embedded(
        user_id: Option<String>,
        group_id: Option<String>,
        embedded: EmbeddedPartThree,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            group_id,
            responses: embedded.responses,
            completed: embedded.completed,
            completed_at: embedded.completed_at,
            value_analysis_generated: embedded.value_analysis_generated,
            value_analysis_data: embedded.value_analysis_data,
            business_stage: None,
            location: PartThreeLocation::EmbeddedInPartTwo,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PartThreeStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
}

/// Generated downstream output. Never written by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigArtifact {
    pub group_id: String,
    pub board: Option<serde_json::Value>,
    pub roadmap: Option<serde_json::Value>,
    pub roadmap_generated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressSection {
    PartOne,
    PartTwo,
    PartThree,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentProgress {
    pub part1_complete: bool,
    pub part2_complete: bool,
    pub part3_complete: bool,
    pub part3_status: PartThreeStatus,
    pub validation_complete: bool,
    pub value_analysis_complete: bool,
    pub board_generated: bool,
    pub roadmap_generated: bool,
    pub current_part2_section: i64,
    pub part1_answers: Responses,
    pub part2_answers: Responses,
    pub validation_answers: Responses,
    pub part3_answers: Responses,
    pub value_analysis: Option<Responses>,
    pub board: Option<serde_json::Value>,
    pub roadmap: Option<serde_json::Value>,
    pub group_id: Option<String>,
    pub fit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<ProgressSection>,
}

impl AssessmentProgress {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn mark_degraded(&mut self, section: ProgressSection) {
        if !self.degraded.contains(&section) {
            self.degraded.push(section);
        }
    }

    pub(crate) fn take_part_two_from(&mut self, other: &AssessmentProgress) {
        self.part2_complete = other.part2_complete;
        self.part2_answers = other.part2_answers.clone();
        self.current_part2_section = other.current_part2_section;
        self.validation_complete = other.validation_complete;
        self.validation_answers = other.validation_answers.clone();
    }

    pub(crate) fn take_part_three_from(&mut self, other: &AssessmentProgress) {
        self.part3_complete = other.part3_complete;
        self.part3_status = other.part3_status;
        self.part3_answers = other.part3_answers.clone();
        self.value_analysis = other.value_analysis.clone();
        self.value_analysis_complete = other.value_analysis_complete;
    }

    pub(crate) fn take_config_from(&mut self, other: &AssessmentProgress) {
        self.board = other.board.clone();
        self.roadmap = other.roadmap.clone();
        self.board_generated = other.board_generated;
        self.roadmap_generated = self.roadmap_generated || other.roadmap_generated;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapStatus {
    pub roadmap_exists: bool,
    pub board_exists: bool,
    pub roadmap: Option<serde_json::Value>,
    pub board: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub part: AssessmentPart,
    pub group_id: String,
    pub response_count: usize,
    pub completed: bool,
    /// True only on the save that flipped the part to complete.
    pub newly_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteStrategy {
    Upsert,
    InsertThenUpdate,
    FieldByField,
}

impl WriteStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::InsertThenUpdate => "insert-then-update",
            Self::FieldByField => "field-by-field",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// Crossing the response threshold stamps completion as part of the save.
    AutoOnThreshold,
    /// Only an explicit submit/complete call stamps completion.
    ExplicitSubmit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressSettings {
    pub part_one_completion_threshold: usize,
    pub part_two_completion_threshold: usize,
    pub part_two_completion_percentage: f64,
    pub completion_policy: CompletionPolicy,
    pub lookup_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub snapshot_cache_ttl_seconds: u64,
    pub snapshot_cache_capacity: u64,
    pub write_strategies: Vec<WriteStrategy>,
    pub conflict_retry_backoff_ms: u64,
    pub max_write_payload_bytes: Option<usize>,
    pub generation_base_url: Option<String>,
    pub generation_api_key: Option<String>,
    pub generation_timeout_seconds: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            part_one_completion_threshold: PART_ONE_COMPLETION_THRESHOLD,
            part_two_completion_threshold: PART_TWO_COMPLETION_THRESHOLD,
            part_two_completion_percentage: PART_TWO_COMPLETION_PERCENTAGE,
            completion_policy: CompletionPolicy::AutoOnThreshold,
            lookup_timeout_ms: 10_000,
            write_timeout_ms: 30_000,
            snapshot_cache_ttl_seconds: 30,
            snapshot_cache_capacity: 10_000,
            write_strategies: vec![
                WriteStrategy::Upsert,
                WriteStrategy::InsertThenUpdate,
                WriteStrategy::FieldByField,
            ],
            conflict_retry_backoff_ms: 250,
            max_write_payload_bytes: None,
            generation_base_url: None,
            generation_api_key: None,
            generation_timeout_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AssessmentProgress, PartOneStatus, ProgressSection, ProgressSettings, WriteStrategy};

    #[test]
    fn part_one_status_ordering_is_monotonic() {
        assert!(PartOneStatus::Unset < PartOneStatus::Part1Complete);
        assert!(PartOneStatus::Part1Complete < PartOneStatus::Completed);
        assert_eq!(PartOneStatus::parse(Some("part1_complete")), PartOneStatus::Part1Complete);
        assert_eq!(PartOneStatus::parse(Some("in_progress")), PartOneStatus::Unset);
        assert_eq!(PartOneStatus::parse(None), PartOneStatus::Unset);
    }

    #[test]
    fn progress_serializes_with_portal_field_names() {
        let mut progress = AssessmentProgress::default();
        progress.part1_complete = true;
        let value = serde_json::to_value(&progress).expect("serialize");
        assert_eq!(value["part1Complete"], serde_json::json!(true));
        assert_eq!(value["part3Status"], serde_json::json!("not-started"));
        assert!(value.get("degraded").is_none());

        progress.mark_degraded(ProgressSection::Config);
        progress.mark_degraded(ProgressSection::Config);
        assert_eq!(progress.degraded, vec![ProgressSection::Config]);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: ProgressSettings =
            serde_json::from_value(serde_json::json!({ "partTwoCompletionThreshold": 40 })).expect("parse");
        assert_eq!(settings.part_two_completion_threshold, 40);
        assert_eq!(settings.part_one_completion_threshold, 15);
        assert_eq!(settings.write_strategies.first(), Some(&WriteStrategy::Upsert));
    }
}
