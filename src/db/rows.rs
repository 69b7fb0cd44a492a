use crate::models::{
    EmbeddedPartThree, PartOneRecord, PartOneStatus, PartThreeLocation, PartThreeRecord, PartTwoRecord,
    PartTwoSource, Responses,
};
use chrono::{DateTime, Utc};

/// Part Two rows as they come off disk, before the two historical shapes are
/// folded into one `PartTwoRecord`.
#[derive(Debug, Clone)]
pub(crate) enum RawPartTwoRecord {
    Unified(UnifiedPartTwoRow),
    Legacy(LegacyPartTwoRow),
}

#[derive(Debug, Clone)]
pub(crate) struct UnifiedPartTwoRow {
    pub user_id: String,
    pub group_id: String,
    pub part2_data: Responses,
    pub part2_current_section: i64,
    pub part2_completed: bool,
    pub part2_completed_at: Option<DateTime<Utc>>,
    pub roadmap_generated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct LegacyPartTwoRow {
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
    pub embedded: EmbeddedPartThree,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawPartTwoRecord {
    pub fn normalize(self) -> PartTwoRecord {
        match self {
            Self::Unified(row) => PartTwoRecord {
                group_id: row.group_id,
                user_id: Some(row.user_id),
                responses: row.part2_data,
                current_section: row.part2_current_section,
                completed: row.part2_completed,
                roadmap_generated: row.roadmap_generated,
                submitted_at: row.part2_completed_at,
                status: None,
                completion_percentage: None,
                validation_responses: Responses::new(),
                validation_completed_at: None,
                embedded_part_three: None,
                source: PartTwoSource::Unified,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            Self::Legacy(row) => PartTwoRecord {
                group_id: row.group_id,
                user_id: row.user_id,
                responses: row.responses,
                current_section: row.current_section,
                completed: row.completed,
                roadmap_generated: row.roadmap_generated,
                submitted_at: row.submitted_at,
                status: row.status,
                completion_percentage: row.completion_percentage,
                validation_responses: row.validation_responses,
                validation_completed_at: row.validation_completed_at,
                embedded_part_three: (!row.embedded.is_empty()).then_some(row.embedded),
                source: PartTwoSource::Legacy,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
        }
    }
}

impl LegacyPartTwoRow {
    pub fn into_part_three(self) -> Option<PartThreeRecord> {
        if self.embedded.is_empty() {
            return None;
        }
        Some(PartThreeRecord::from_embedded(
            self.user_id,
            Some(self.group_id),
            self.embedded,
            self.created_at,
            self.updated_at,
        ))
    }
}

pub(crate) const PART_ONE_COLUMNS: &str =
    "id, user_id, email, group_id, responses, status, fit_message, created_at, updated_at";

pub(crate) const UNIFIED_PART_TWO_COLUMNS: &str = "user_id, group_id, part2_data, part2_current_section, \
     part2_completed, part2_completed_at, roadmap_generated, created_at, updated_at";

pub(crate) const LEGACY_PART_TWO_COLUMNS: &str = "group_id, user_id, responses, current_section, completed, \
     roadmap_generated, submitted_at, status, completion_percentage, validation_responses, \
     validation_completed_at, part3_complete, part3_data, part3_completed_at, value_analysis_generated, \
     value_analysis_data, created_at, updated_at";

pub(crate) const PART_THREE_COLUMNS: &str = "user_id, group_id, responses, completed, completed_at, \
     value_analysis_generated, value_analysis_data, business_stage, created_at, updated_at";

pub(crate) fn parse_part_one_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartOneRecord> {
    Ok(PartOneRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        email: row.get(2)?,
        group_id: row
            .get::<_, Option<String>>(3)?
            .filter(|value| !value.trim().is_empty()),
        responses: parse_responses(row.get(4)?, "client_intake.responses"),
        status: PartOneStatus::parse(row.get::<_, Option<String>>(5)?.as_deref()),
        fit_message: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

pub(crate) fn parse_unified_part_two_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UnifiedPartTwoRow> {
    Ok(UnifiedPartTwoRow {
        user_id: row.get(0)?,
        group_id: row.get(1)?,
        part2_data: parse_responses(row.get(2)?, "assessments.part2_data"),
        part2_current_section: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        part2_completed: parse_flag(row.get(4)?),
        part2_completed_at: parse_optional_time(row.get(5)?, "assessments.part2_completed_at"),
        roadmap_generated: parse_flag(row.get(6)?),
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

pub(crate) fn parse_legacy_part_two_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LegacyPartTwoRow> {
    Ok(LegacyPartTwoRow {
        group_id: row.get(0)?,
        user_id: row.get(1)?,
        responses: parse_responses(row.get(2)?, "client_intake_part2.responses"),
        current_section: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
        completed: parse_flag(row.get(4)?),
        roadmap_generated: parse_flag(row.get(5)?),
        submitted_at: parse_optional_time(row.get(6)?, "client_intake_part2.submitted_at"),
        status: row
            .get::<_, Option<String>>(7)?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        completion_percentage: row.get(8)?,
        validation_responses: parse_responses(row.get(9)?, "client_intake_part2.validation_responses"),
        validation_completed_at: parse_optional_time(row.get(10)?, "client_intake_part2.validation_completed_at"),
        embedded: EmbeddedPartThree {
            completed: parse_flag(row.get(11)?),
            responses: parse_responses(row.get(12)?, "client_intake_part2.part3_data"),
            completed_at: parse_optional_time(row.get(13)?, "client_intake_part2.part3_completed_at"),
            value_analysis_generated: parse_flag(row.get(14)?),
            value_analysis_data: parse_responses(row.get(15)?, "client_intake_part2.value_analysis_data"),
        },
        created_at: parse_time(&row.get::<_, String>(16)?)?,
        updated_at: parse_time(&row.get::<_, String>(17)?)?,
    })
}

pub(crate) fn parse_part_three_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartThreeRecord> {
    Ok(PartThreeRecord {
        user_id: row.get(0)?,
        group_id: row.get(1)?,
        responses: parse_responses(row.get(2)?, "client_intake_part3.responses"),
        completed: parse_flag(row.get(3)?),
        completed_at: parse_optional_time(row.get(4)?, "client_intake_part3.completed_at"),
        value_analysis_generated: parse_flag(row.get(5)?),
        value_analysis_data: parse_responses(row.get(6)?, "client_intake_part3.value_analysis_data"),
        business_stage: row.get(7)?,
        location: PartThreeLocation::Dedicated,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

/// Malformed or non-object payloads read as an empty map. They are logged,
/// never surfaced, so a bad row can only make a part look less complete.
pub(crate) fn parse_responses(raw: Option<String>, column: &str) -> Responses {
    let Some(raw) = raw else {
        return Responses::new();
    };
    if raw.trim().is_empty() {
        return Responses::new();
    }
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(serde_json::Value::Null) => Responses::new(),
        Ok(other) => {
            tracing::warn!(column, kind = %json_kind(&other), "ignoring non-object responses payload");
            Responses::new()
        }
        Err(error) => {
            tracing::warn!(column, error = %error, "ignoring malformed responses payload");
            Responses::new()
        }
    }
}

pub(crate) fn parse_json_payload(raw: Option<String>, column: &str) -> Option<serde_json::Value> {
    let raw = raw?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Null) => None,
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(column, error = %error, "ignoring malformed json payload");
            None
        }
    }
}

pub(crate) fn parse_flag(raw: Option<i64>) -> bool {
    raw.unwrap_or(0) != 0
}

pub(crate) fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

/// Optional timestamps are evidence of completion, so an unparseable one is
/// dropped rather than failing the whole row.
pub(crate) fn parse_optional_time(raw: Option<String>, column: &str) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(error) => {
            tracing::warn!(column, error = %error, "ignoring malformed timestamp");
            None
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_json_payload, parse_optional_time, parse_responses, LegacyPartTwoRow, RawPartTwoRecord};
    use crate::models::{EmbeddedPartThree, PartThreeLocation, PartTwoSource, Responses};
    use chrono::Utc;

    fn legacy_row(embedded: EmbeddedPartThree) -> LegacyPartTwoRow {
        let now = Utc::now();
        LegacyPartTwoRow {
            group_id: "group-1".to_string(),
            user_id: None,
            responses: Responses::new(),
            current_section: 2,
            completed: false,
            roadmap_generated: false,
            submitted_at: None,
            status: Some("part2_complete".to_string()),
            completion_percentage: None,
            validation_responses: Responses::new(),
            validation_completed_at: None,
            embedded,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn malformed_payloads_read_as_empty() {
        assert!(parse_responses(None, "t.c").is_empty());
        assert!(parse_responses(Some("not json".to_string()), "t.c").is_empty());
        assert!(parse_responses(Some("[1,2]".to_string()), "t.c").is_empty());
        assert_eq!(parse_responses(Some(r#"{"a":1}"#.to_string()), "t.c").len(), 1);
        assert!(parse_json_payload(Some("null".to_string()), "t.c").is_none());
        assert!(parse_optional_time(Some("yesterday".to_string()), "t.c").is_none());
    }

    #[test]
    fn legacy_rows_keep_embedded_part_three_only_when_present() {
        let plain = RawPartTwoRecord::Legacy(legacy_row(EmbeddedPartThree::default())).normalize();
        assert_eq!(plain.source, PartTwoSource::Legacy);
        assert_eq!(plain.current_section, 2);
        assert!(plain.embedded_part_three.is_none());

        let mut embedded = EmbeddedPartThree::default();
        embedded.responses.insert("asset_1".to_string(), serde_json::json!("yes"));
        let part_three = legacy_row(embedded).into_part_three().expect("embedded part three");
        assert_eq!(part_three.location, PartThreeLocation::EmbeddedInPartTwo);
        assert_eq!(part_three.group_id.as_deref(), Some("group-1"));
    }
}
