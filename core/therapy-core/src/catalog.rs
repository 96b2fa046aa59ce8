//! Activity definitions: the reference data activity instances point at.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{is_unique_violation, Result, StorageContext, TherapyError};
use crate::store::{format_timestamp, optional_timestamp_column, timestamp_column, Store};
use crate::types::{ActivityDefinition, ActivityInput, RecordMeta};

const ACTIVITY_SELECT: &str = "SELECT id, name, description, default_duration_minutes, category, \
                               objectives, created_at, updated_at, deleted_at FROM activities";

/// Seeded into an empty catalog at startup.
pub const DEFAULT_ACTIVITIES: &[(&str, &str, i64)] = &[
    (
        "Speech Therapy",
        "Speech exercises to build the child's communication skills",
        30,
    ),
    (
        "Play Therapy",
        "Therapeutic play for social and emotional development",
        45,
    ),
    (
        "Fine Motor Practice",
        "Exercises for fine motor control",
        20,
    ),
    (
        "Gross Motor Practice",
        "Exercises for gross motor control",
        30,
    ),
    (
        "Concentration Practice",
        "Exercises for focus and attention",
        25,
    ),
];

pub struct ActivityCatalog {
    store: Store,
}

impl ActivityCatalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create_activity(&self, input: &ActivityInput) -> Result<ActivityDefinition> {
        let name = validate(input)?;
        let now = format_timestamp(Utc::now());

        self.store.with_connection(|conn| {
            conn.execute(
                "INSERT INTO activities \
                    (name, description, default_duration_minutes, category, objectives, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    name,
                    input.description,
                    input.default_duration_minutes,
                    input.category,
                    input.objectives,
                    now
                ],
            )
            .map_err(|err| duplicate_or_storage(err, name, "Failed to create activity"))?;
            let id = conn.last_insert_rowid();
            load_activity(conn, id)?.ok_or_else(|| TherapyError::not_found("Activity", id))
        })
    }

    pub fn get_activity(&self, id: i64) -> Result<ActivityDefinition> {
        self.store
            .with_connection(|conn| load_activity(conn, id))?
            .ok_or_else(|| TherapyError::not_found("Activity", id))
    }

    pub fn list_activities(&self) -> Result<Vec<ActivityDefinition>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE deleted_at IS NULL ORDER BY name ASC",
                    ACTIVITY_SELECT
                ))
                .storage("Failed to prepare activities query")?;
            let rows = stmt
                .query_map([], activity_from_row)
                .storage("Failed to query activities")?;

            let mut activities = Vec::new();
            for row in rows {
                activities.push(row.storage("Failed to decode activity row")?);
            }
            Ok(activities)
        })
    }

    pub fn update_activity(&self, id: i64, input: &ActivityInput) -> Result<ActivityDefinition> {
        let name = validate(input)?;
        let now = format_timestamp(Utc::now());

        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE activities SET name = ?1, description = ?2, default_duration_minutes = ?3, \
                        category = ?4, objectives = ?5, updated_at = ?6 \
                     WHERE id = ?7 AND deleted_at IS NULL",
                    params![
                        name,
                        input.description,
                        input.default_duration_minutes,
                        input.category,
                        input.objectives,
                        now,
                        id
                    ],
                )
                .map_err(|err| duplicate_or_storage(err, name, "Failed to update activity"))?;
            if changed == 0 {
                return Err(TherapyError::not_found("Activity", id));
            }
            load_activity(conn, id)?.ok_or_else(|| TherapyError::not_found("Activity", id))
        })
    }

    pub fn delete_activity(&self, id: i64) -> Result<()> {
        let now = format_timestamp(Utc::now());
        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE activities SET deleted_at = ?1, updated_at = ?1 \
                     WHERE id = ?2 AND deleted_at IS NULL",
                    params![now, id],
                )
                .storage("Failed to delete activity")?;
            if changed == 0 {
                return Err(TherapyError::not_found("Activity", id));
            }
            Ok(())
        })
    }

    /// Inserts [`DEFAULT_ACTIVITIES`] when the table has never held a row.
    ///
    /// Soft-deleted rows count, so defaults a therapist removed stay removed.
    pub fn seed_defaults(&self) -> Result<usize> {
        let now = format_timestamp(Utc::now());
        self.store.with_connection(|conn| {
            let tx = conn
                .transaction()
                .storage("Failed to begin seed transaction")?;
            let existing: i64 = tx
                .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))
                .storage("Failed to count activities")?;
            if existing > 0 {
                return Ok(0);
            }

            for (name, description, minutes) in DEFAULT_ACTIVITIES {
                tx.execute(
                    "INSERT INTO activities \
                        (name, description, default_duration_minutes, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![name, description, minutes, now],
                )
                .storage("Failed to seed activity")?;
            }
            tx.commit().storage("Failed to commit seed transaction")?;

            info!(count = DEFAULT_ACTIVITIES.len(), "Seeded default activities");
            Ok(DEFAULT_ACTIVITIES.len())
        })
    }
}

/// Loads a live (not soft-deleted) activity definition.
pub(crate) fn load_activity(conn: &Connection, id: i64) -> Result<Option<ActivityDefinition>> {
    conn.query_row(
        &format!("{} WHERE id = ?1 AND deleted_at IS NULL", ACTIVITY_SELECT),
        params![id],
        activity_from_row,
    )
    .optional()
    .storage("Failed to query activity")
}

fn activity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityDefinition> {
    Ok(ActivityDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        default_duration_minutes: row.get(3)?,
        category: row.get(4)?,
        objectives: row.get(5)?,
        meta: RecordMeta {
            created_at: timestamp_column(row, 6)?,
            updated_at: timestamp_column(row, 7)?,
            deleted_at: optional_timestamp_column(row, 8)?,
        },
    })
}

fn validate(input: &ActivityInput) -> Result<&str> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(TherapyError::validation("name", "must not be empty"));
    }
    if input.default_duration_minutes < 0 {
        return Err(TherapyError::validation(
            "default_duration_minutes",
            "must not be negative",
        ));
    }
    Ok(name)
}

fn duplicate_or_storage(err: rusqlite::Error, name: &str, context: &str) -> TherapyError {
    if is_unique_violation(&err) {
        TherapyError::DuplicateActivityName(name.to_string())
    } else {
        TherapyError::Storage {
            context: context.to_string(),
            source: err,
        }
    }
}
