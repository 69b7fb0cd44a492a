mod rows;

use crate::errors::{AppError, AppResult};
use crate::identity::new_group_id;
use crate::models::{
    ConfigArtifact, PartOneRecord, PartOneStatus, PartThreeRecord, PartTwoRecord, ProgressSettings, Responses,
    WriteStrategy,
};
use crate::store::ProgressStore;
use chrono::Utc;
use rows::{
    parse_json_payload, parse_legacy_part_two_row, parse_part_one_row, parse_part_three_row,
    parse_unified_part_two_row, LegacyPartTwoRow, RawPartTwoRecord, UnifiedPartTwoRow, LEGACY_PART_TWO_COLUMNS,
    PART_ONE_COLUMNS, PART_THREE_COLUMNS, UNIFIED_PART_TWO_COLUMNS,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "progress";

/// Columns added to the legacy Part Two table after its first release.
const LEGACY_PART_TWO_EXTENSIONS: [(&str, &str); 9] = [
    ("status", "TEXT"),
    ("completion_percentage", "REAL"),
    ("validation_responses", "TEXT"),
    ("validation_completed_at", "TEXT"),
    ("part3_complete", "INTEGER NOT NULL DEFAULT 0"),
    ("part3_data", "TEXT"),
    ("part3_completed_at", "TEXT"),
    ("value_analysis_generated", "INTEGER NOT NULL DEFAULT 0"),
    ("value_analysis_data", "TEXT"),
];

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    /// Largest single statement payload this storage accepts; 0 means no limit.
    payload_limit: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
enum LegacyKey {
    User,
    Group,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            payload_limit: AtomicUsize::new(0),
        };

        db.ensure_schema_extensions()?;
        let settings = db.get_settings()?;
        db.apply_payload_limit(settings.max_write_payload_bytes);

        Ok(db)
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<ProgressSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<ProgressSettings>(&raw).unwrap_or_else(|error| {
                tracing::warn!(error = %error, "stored progress settings unreadable; using defaults");
                ProgressSettings::default()
            })),
            None => Ok(ProgressSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ProgressSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: ProgressSettings =
            serde_json::from_value(merged).map_err(|error| AppError::Validation(error.to_string()))?;
        if settings.write_strategies.is_empty() {
            return Err(AppError::Validation(
                "writeStrategies must name at least one strategy".to_string(),
            ));
        }

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;
        drop(conn);

        self.apply_payload_limit(settings.max_write_payload_bytes);
        Ok(settings)
    }

    fn apply_payload_limit(&self, limit: Option<usize>) {
        self.payload_limit.store(limit.unwrap_or(0), Ordering::Relaxed);
    }

    fn check_payload(&self, what: &str, payload: &str) -> AppResult<()> {
        let limit = self.payload_limit.load(Ordering::Relaxed);
        if limit > 0 && payload.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "{} is {} bytes; storage accepts at most {}",
                what,
                payload.len(),
                limit
            )));
        }
        Ok(())
    }

    /// Newest roadmap row written by the generation service, if any.
    fn latest_roadmap(conn: &Connection, group_id: &str) -> AppResult<Option<serde_json::Value>> {
        let raw = conn
            .query_row(
                "SELECT data FROM roadmaps WHERE group_id = ?1 ORDER BY created_at DESC LIMIT 1",
                [group_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(parse_json_payload(raw, "roadmaps.data"))
    }

    pub fn record_roadmap(&self, group_id: &str, roadmap: &serde_json::Value) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO roadmaps (id, group_id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                group_id,
                serde_json::to_string(roadmap)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let conn = self.connection()?;
        for (column, definition) in LEGACY_PART_TWO_EXTENSIONS {
            if !column_exists(&conn, "client_intake_part2", column)? {
                conn.execute(
                    &format!("ALTER TABLE client_intake_part2 ADD COLUMN {} {}", column, definition),
                    [],
                )?;
            }
        }
        if !column_exists(&conn, "client_intake", "fit_message")? {
            conn.execute("ALTER TABLE client_intake ADD COLUMN fit_message TEXT", [])?;
        }
        Ok(())
    }

    fn upsert_part_two_row(&self, record: &PartTwoRecord, user_id: &str) -> AppResult<()> {
        let payload = serde_json::to_string(&record.responses)?;
        self.check_payload("part two responses", &payload)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO assessments (
               user_id, group_id, part2_data, part2_current_section, part2_completed,
               part2_completed_at, roadmap_generated, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id) DO UPDATE SET
               group_id = excluded.group_id,
               part2_data = excluded.part2_data,
               part2_current_section = excluded.part2_current_section,
               part2_completed = MAX(assessments.part2_completed, excluded.part2_completed),
               part2_completed_at = COALESCE(assessments.part2_completed_at, excluded.part2_completed_at),
               roadmap_generated = MAX(assessments.roadmap_generated, excluded.roadmap_generated),
               updated_at = excluded.updated_at",
            params![
                user_id,
                record.group_id,
                payload,
                record.current_section,
                record.completed,
                record.submitted_at.map(|at| at.to_rfc3339()),
                record.roadmap_generated,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn insert_then_update_part_two(&self, record: &PartTwoRecord, user_id: &str) -> AppResult<()> {
        let payload = serde_json::to_string(&record.responses)?;
        self.check_payload("part two responses", &payload)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO assessments (user_id, group_id, part2_data, created_at, updated_at)
             VALUES (?1, ?2, '{}', ?3, ?3)",
            params![user_id, record.group_id, record.created_at.to_rfc3339()],
        )?;
        let updated = conn.execute(
            "UPDATE assessments SET
               group_id = ?2,
               part2_data = ?3,
               part2_current_section = ?4,
               part2_completed = MAX(part2_completed, ?5),
               part2_completed_at = COALESCE(part2_completed_at, ?6),
               roadmap_generated = MAX(roadmap_generated, ?7),
               updated_at = ?8
             WHERE user_id = ?1",
            params![
                user_id,
                record.group_id,
                payload,
                record.current_section,
                record.completed,
                record.submitted_at.map(|at| at.to_rfc3339()),
                record.roadmap_generated,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        if updated != 1 {
            return Err(AppError::Store(format!(
                "expected one part two row for user {}, updated {}",
                user_id, updated
            )));
        }
        Ok(())
    }

    fn save_part_two_fields(&self, record: &PartTwoRecord, user_id: &str, changed_keys: &[String]) -> AppResult<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO assessments (user_id, group_id, part2_data, created_at, updated_at)
             VALUES (?1, ?2, '{}', ?3, ?3)",
            params![user_id, record.group_id, record.created_at.to_rfc3339()],
        )? == 1;

        // A fresh row starts empty, so every answer has to be carried over.
        let keys: Vec<&String> = if inserted {
            record.responses.keys().collect()
        } else {
            changed_keys.iter().collect()
        };

        for key in keys {
            let Some(value) = record.responses.get(key.as_str()) else {
                continue;
            };
            let encoded = serde_json::to_string(value)?;
            self.check_payload(&format!("answer '{}'", key), &encoded)?;
            tx.execute(
                "UPDATE assessments SET part2_data = json_set(part2_data, ?2, json(?3)) WHERE user_id = ?1",
                params![user_id, json_path_for_key(key)?, encoded],
            )?;
        }

        tx.execute(
            "UPDATE assessments SET
               group_id = ?2,
               part2_current_section = ?3,
               part2_completed = MAX(part2_completed, ?4),
               part2_completed_at = COALESCE(part2_completed_at, ?5),
               roadmap_generated = MAX(roadmap_generated, ?6),
               updated_at = ?7
             WHERE user_id = ?1",
            params![
                user_id,
                record.group_id,
                record.current_section,
                record.completed,
                record.submitted_at.map(|at| at.to_rfc3339()),
                record.roadmap_generated,
                record.updated_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}

impl ProgressStore for Database {
    fn get_part_one(&self, user_id: &str) -> AppResult<Option<PartOneRecord>> {
        let conn = self.connection()?;
        select_part_one(&conn, user_id)
    }

    fn get_part_two(&self, user_id: &str, group_id: Option<&str>) -> AppResult<Option<PartTwoRecord>> {
        let conn = self.connection()?;

        let legacy = match select_legacy_part_two(&conn, LegacyKey::User, user_id)? {
            Some(row) => Some(row),
            None => match group_id {
                Some(group_id) => select_legacy_part_two(&conn, LegacyKey::Group, group_id)?,
                None => None,
            },
        };

        if let Some(unified) = select_unified_part_two(&conn, user_id)? {
            let mut record = RawPartTwoRecord::Unified(unified).normalize();
            // Validation answers were only ever written to the legacy row.
            if let Some(legacy) = legacy {
                record.validation_responses = legacy.validation_responses;
                record.validation_completed_at = legacy.validation_completed_at;
                record.roadmap_generated = record.roadmap_generated || legacy.roadmap_generated;
            }
            return Ok(Some(record));
        }

        Ok(legacy.map(|row| RawPartTwoRecord::Legacy(row).normalize()))
    }

    fn get_part_three(&self, user_id: &str) -> AppResult<Option<PartThreeRecord>> {
        let conn = self.connection()?;
        let dedicated = conn
            .query_row(
                &format!(
                    "SELECT {} FROM client_intake_part3 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1",
                    PART_THREE_COLUMNS
                ),
                [user_id],
                parse_part_three_row,
            )
            .optional()?;
        if dedicated.is_some() {
            return Ok(dedicated);
        }

        // Legacy rows may be keyed only by the group the user's intake belongs to.
        let embedded = conn
            .query_row(
                &format!(
                    "SELECT {} FROM client_intake_part2
                     WHERE user_id = ?1
                        OR group_id = (
                          SELECT group_id FROM client_intake
                          WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT 1
                        )
                     ORDER BY (user_id = ?1) DESC, updated_at DESC
                     LIMIT 1",
                    LEGACY_PART_TWO_COLUMNS
                ),
                [user_id],
                parse_legacy_part_two_row,
            )
            .optional()?;

        Ok(embedded.and_then(LegacyPartTwoRow::into_part_three))
    }

    fn get_config_artifact(&self, group_id: &str) -> AppResult<Option<ConfigArtifact>> {
        let conn = self.connection()?;
        let config = conn
            .query_row(
                "SELECT board, roadmap, roadmap_generated FROM client_config WHERE group_id = ?1",
                [group_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;
        let roadmap_row = Self::latest_roadmap(&conn, group_id)?;

        if config.is_none() && roadmap_row.is_none() {
            return Ok(None);
        }

        let (board, config_roadmap, roadmap_generated) = match config {
            Some((board, roadmap, flag)) => (
                parse_json_payload(board, "client_config.board"),
                parse_json_payload(roadmap, "client_config.roadmap"),
                flag.unwrap_or(0) != 0,
            ),
            None => (None, None, false),
        };

        Ok(Some(ConfigArtifact {
            group_id: group_id.to_string(),
            board,
            roadmap: roadmap_row.or(config_roadmap),
            roadmap_generated,
        }))
    }

    fn upsert_part_one(
        &self,
        user_id: &str,
        email: Option<&str>,
        delta: &Responses,
        group_id: Option<&str>,
        stamp: Option<PartOneStatus>,
    ) -> AppResult<PartOneRecord> {
        let now = Utc::now();
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let record = match select_part_one(&tx, user_id)? {
            Some(mut current) => {
                for (key, value) in delta {
                    current.responses.insert(key.clone(), value.clone());
                }
                if current.group_id.is_none() {
                    current.group_id = Some(group_id.map(ToString::to_string).unwrap_or_else(new_group_id));
                }
                if let Some(stamp) = stamp {
                    current.status = current.status.max(stamp);
                }
                if let Some(email) = email {
                    current.email = Some(email.to_string());
                }
                current.updated_at = now;

                tx.execute(
                    "UPDATE client_intake SET email = ?1, group_id = ?2, responses = ?3, status = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        current.email,
                        current.group_id,
                        serde_json::to_string(&current.responses)?,
                        status_column(current.status),
                        now.to_rfc3339(),
                        current.id,
                    ],
                )?;
                current
            }
            None => {
                let record = PartOneRecord {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    email: email.map(ToString::to_string),
                    group_id: Some(group_id.map(ToString::to_string).unwrap_or_else(new_group_id)),
                    responses: delta.clone(),
                    status: stamp.unwrap_or_default(),
                    fit_message: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.execute(
                    "INSERT INTO client_intake (
                       id, user_id, email, group_id, responses, status, fit_message, is_primary, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 1, ?7, ?7)",
                    params![
                        record.id,
                        record.user_id,
                        record.email,
                        record.group_id,
                        serde_json::to_string(&record.responses)?,
                        status_column(record.status),
                        now.to_rfc3339(),
                    ],
                )?;
                record
            }
        };

        tx.commit()?;
        Ok(record)
    }

    fn set_fit_message(&self, user_id: &str, fit_message: &str) -> AppResult<()> {
        let conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE client_intake SET fit_message = ?2, updated_at = ?3
             WHERE id = (SELECT id FROM client_intake WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT 1)",
            params![user_id, fit_message, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("No part one record for user {}", user_id)));
        }
        Ok(())
    }

    fn write_part_two(
        &self,
        strategy: WriteStrategy,
        record: &PartTwoRecord,
        changed_keys: &[String],
    ) -> AppResult<()> {
        let user_id = record
            .user_id
            .as_deref()
            .ok_or_else(|| AppError::Validation("part two writes need a user id".to_string()))?;
        match strategy {
            WriteStrategy::Upsert => self.upsert_part_two_row(record, user_id),
            WriteStrategy::InsertThenUpdate => self.insert_then_update_part_two(record, user_id),
            WriteStrategy::FieldByField => self.save_part_two_fields(record, user_id, changed_keys),
        }
    }

    fn upsert_part_three(&self, record: &PartThreeRecord) -> AppResult<()> {
        let user_id = record
            .user_id
            .as_deref()
            .ok_or_else(|| AppError::Validation("part three writes need a user id".to_string()))?;
        let responses = serde_json::to_string(&record.responses)?;
        self.check_payload("part three responses", &responses)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let existing_id = tx
            .query_row(
                "SELECT id FROM client_intake_part3 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1",
                [user_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match existing_id {
            // Value analysis columns belong to the generator and are left alone.
            Some(id) => {
                tx.execute(
                    "UPDATE client_intake_part3 SET
                       group_id = COALESCE(?2, group_id),
                       responses = ?3,
                       completed = MAX(completed, ?4),
                       completed_at = COALESCE(completed_at, ?5),
                       business_stage = COALESCE(?6, business_stage),
                       updated_at = ?7
                     WHERE id = ?1",
                    params![
                        id,
                        record.group_id,
                        responses,
                        record.completed,
                        record.completed_at.map(|at| at.to_rfc3339()),
                        record.business_stage,
                        record.updated_at.to_rfc3339(),
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO client_intake_part3 (
                       id, user_id, group_id, responses, completed, completed_at,
                       value_analysis_generated, value_analysis_data, business_stage, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        Uuid::new_v4().to_string(),
                        user_id,
                        record.group_id,
                        responses,
                        record.completed,
                        record.completed_at.map(|at| at.to_rfc3339()),
                        record.value_analysis_generated,
                        serde_json::to_string(&record.value_analysis_data)?,
                        record.business_stage,
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn save_config_artifact(&self, artifact: &ConfigArtifact) -> AppResult<()> {
        let board = artifact.board.as_ref().map(serde_json::to_string).transpose()?;
        let roadmap = artifact.roadmap.as_ref().map(serde_json::to_string).transpose()?;
        let roadmap_generated = artifact.roadmap_generated || artifact.roadmap.is_some();
        let now = Utc::now().to_rfc3339();

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO client_config (group_id, board, roadmap, roadmap_generated, generated_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(group_id) DO UPDATE SET
               board = COALESCE(excluded.board, client_config.board),
               roadmap = COALESCE(excluded.roadmap, client_config.roadmap),
               roadmap_generated = MAX(client_config.roadmap_generated, excluded.roadmap_generated),
               generated_at = excluded.generated_at,
               updated_at = excluded.updated_at",
            params![artifact.group_id, board, roadmap, roadmap_generated, now],
        )?;
        Ok(())
    }

    fn record_value_analysis(&self, user_id: &str, group_id: &str, data: &Responses) -> AppResult<()> {
        let encoded = serde_json::to_string(data)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.connection()?;
        let updated = conn.execute(
            "UPDATE client_intake_part3 SET value_analysis_data = ?2, value_analysis_generated = 1, updated_at = ?3
             WHERE id = (SELECT id FROM client_intake_part3 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1)",
            params![user_id, encoded, now],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO client_intake_part3 (
                   id, user_id, group_id, responses, value_analysis_generated, value_analysis_data, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, '{}', 1, ?4, ?5, ?5)",
                params![Uuid::new_v4().to_string(), user_id, group_id, encoded, now],
            )?;
        }
        Ok(())
    }
}

fn select_part_one(conn: &Connection, user_id: &str) -> AppResult<Option<PartOneRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM client_intake WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT 1",
            PART_ONE_COLUMNS
        ),
        [user_id],
        parse_part_one_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn select_unified_part_two(conn: &Connection, user_id: &str) -> AppResult<Option<UnifiedPartTwoRow>> {
    conn.query_row(
        &format!("SELECT {} FROM assessments WHERE user_id = ?1", UNIFIED_PART_TWO_COLUMNS),
        [user_id],
        parse_unified_part_two_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn select_legacy_part_two(conn: &Connection, key: LegacyKey, value: &str) -> AppResult<Option<LegacyPartTwoRow>> {
    let column = match key {
        LegacyKey::User => "user_id",
        LegacyKey::Group => "group_id",
    };
    conn.query_row(
        &format!(
            "SELECT {} FROM client_intake_part2 WHERE {} = ?1 ORDER BY updated_at DESC LIMIT 1",
            LEGACY_PART_TWO_COLUMNS, column
        ),
        [value],
        parse_legacy_part_two_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn status_column(status: PartOneStatus) -> Option<&'static str> {
    match status {
        PartOneStatus::Unset => None,
        other => Some(other.as_str()),
    }
}

fn json_path_for_key(key: &str) -> AppResult<String> {
    if key.contains('"') || key.contains('\\') {
        return Err(AppError::Store(format!(
            "answer key '{}' cannot be addressed field by field",
            key
        )));
    }
    Ok(format!("$.\"{}\"", key))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
