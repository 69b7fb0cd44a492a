use crate::models::{
    CompletionPolicy, PartOneRecord, PartOneStatus, PartThreeRecord, PartThreeStatus, PartTwoRecord, ProgressSettings,
    PART_ONE_COMPLETION_THRESHOLD, PART_TWO_COMPLETION_PERCENTAGE, PART_TWO_COMPLETION_THRESHOLD,
};

const PART_TWO_COMPLETE_STATUSES: [&str; 2] = ["completed", "part2_complete"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionRules {
    pub part_one_threshold: usize,
    pub part_two_threshold: usize,
    pub part_two_percentage: f64,
    /// Whether answer volume alone may complete a part.
    pub infer_from_volume: bool,
}

impl Default for CompletionRules {
    fn default() -> Self {
        Self {
            part_one_threshold: PART_ONE_COMPLETION_THRESHOLD,
            part_two_threshold: PART_TWO_COMPLETION_THRESHOLD,
            part_two_percentage: PART_TWO_COMPLETION_PERCENTAGE,
            infer_from_volume: true,
        }
    }
}

impl From<&ProgressSettings> for CompletionRules {
    fn from(settings: &ProgressSettings) -> Self {
        Self {
            part_one_threshold: settings.part_one_completion_threshold,
            part_two_threshold: settings.part_two_completion_threshold,
            part_two_percentage: settings.part_two_completion_percentage,
            infer_from_volume: settings.completion_policy == CompletionPolicy::AutoOnThreshold,
        }
    }
}

/// The evidence that made a part count as complete, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    ExplicitFlag,
    RoadmapGenerated,
    Submitted,
    Status,
    Percentage,
    /// Inferred from answer volume alone.
    ResponseCount,
}

impl CompletionSignal {
    pub fn is_inferred(self) -> bool {
        matches!(self, Self::ResponseCount)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitFlag => "explicit-flag",
            Self::RoadmapGenerated => "roadmap-generated",
            Self::Submitted => "submitted",
            Self::Status => "status",
            Self::Percentage => "percentage",
            Self::ResponseCount => "response-count",
        }
    }
}

pub fn is_part_one_complete(record: Option<&PartOneRecord>, rules: &CompletionRules) -> bool {
    let Some(record) = record else {
        return false;
    };
    match record.status {
        PartOneStatus::Completed | PartOneStatus::Part1Complete => true,
        PartOneStatus::Unset => {
            let complete = rules.infer_from_volume && record.responses.len() >= rules.part_one_threshold;
            if complete {
                tracing::debug!(
                    user_id = %record.user_id,
                    responses = record.responses.len(),
                    "part one complete by response count"
                );
            }
            complete
        }
    }
}

pub fn classify_part_two(record: Option<&PartTwoRecord>, rules: &CompletionRules) -> Option<CompletionSignal> {
    let record = record?;

    if record.completed {
        return Some(CompletionSignal::ExplicitFlag);
    }
    if record.roadmap_generated {
        return Some(CompletionSignal::RoadmapGenerated);
    }
    if record.submitted_at.is_some() {
        return Some(CompletionSignal::Submitted);
    }
    if let Some(status) = record.status.as_deref() {
        if PART_TWO_COMPLETE_STATUSES.contains(&status) {
            return Some(CompletionSignal::Status);
        }
        tracing::debug!(group_id = %record.group_id, status, "part two status is not a completion status");
    }
    if let Some(percentage) = record.completion_percentage {
        if percentage.is_finite() && percentage >= rules.part_two_percentage {
            return Some(CompletionSignal::Percentage);
        }
    }
    if rules.infer_from_volume && record.responses.len() >= rules.part_two_threshold {
        tracing::debug!(
            group_id = %record.group_id,
            responses = record.responses.len(),
            threshold = rules.part_two_threshold,
            "part two complete by response count"
        );
        return Some(CompletionSignal::ResponseCount);
    }

    None
}

pub fn is_part_two_complete(record: Option<&PartTwoRecord>, rules: &CompletionRules) -> bool {
    classify_part_two(record, rules).is_some()
}

/// Answers plus a value analysis outrank a stale completion flag. Answers
/// alone are still in progress.
pub fn classify_part_three(record: Option<&PartThreeRecord>) -> PartThreeStatus {
    let Some(record) = record else {
        return PartThreeStatus::NotStarted;
    };

    let has_responses = !record.responses.is_empty();
    let has_analysis = has_value_analysis(record);

    if record.completed || record.completed_at.is_some() || (has_responses && has_analysis) {
        return PartThreeStatus::Complete;
    }
    if has_responses || has_analysis {
        tracing::debug!(
            location = ?record.location,
            has_responses,
            has_analysis,
            "part three in progress"
        );
        return PartThreeStatus::InProgress;
    }
    PartThreeStatus::NotStarted
}

pub fn is_part_three_complete(record: Option<&PartThreeRecord>) -> bool {
    classify_part_three(record) == PartThreeStatus::Complete
}

pub fn has_value_analysis(record: &PartThreeRecord) -> bool {
    !record.value_analysis_data.is_empty()
}

pub fn is_validation_complete(record: Option<&PartTwoRecord>) -> bool {
    record.is_some_and(|record| record.validation_completed_at.is_some())
}
