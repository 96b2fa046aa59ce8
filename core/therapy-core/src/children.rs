//! Child (subject) records.
//!
//! Children own sessions through `sessions.child_id`. Deleting a child only
//! stamps `deleted_at`; its sessions stay for history but the child can no
//! longer start new ones.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StorageContext, TherapyError};
use crate::store::{
    format_timestamp, optional_date_column, optional_timestamp_column, timestamp_column, Store,
};
use crate::types::{Child, ChildInput, RecordMeta};

const CHILD_SELECT: &str = "SELECT id, name, date_of_birth, gender, guardian_name, contact_info, \
                            assessment_text, created_at, updated_at, deleted_at FROM children";

pub struct ChildRegistry {
    store: Store,
}

impl ChildRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create_child(&self, input: &ChildInput) -> Result<Child> {
        let name = required_name(&input.name)?;
        let date_of_birth = parse_date_of_birth(input.date_of_birth.as_deref())?;
        let now = format_timestamp(Utc::now());

        self.store.with_connection(|conn| {
            conn.execute(
                "INSERT INTO children \
                    (name, date_of_birth, gender, guardian_name, contact_info, assessment_text, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    name,
                    date_of_birth.map(|date| date.format("%Y-%m-%d").to_string()),
                    input.gender,
                    input.guardian_name,
                    input.contact_info,
                    input.assessment_text,
                    now
                ],
            )
            .storage("Failed to create child")?;
            let id = conn.last_insert_rowid();
            load_child(conn, id)?.ok_or_else(|| TherapyError::not_found("Child", id))
        })
    }

    pub fn get_child(&self, id: i64) -> Result<Child> {
        self.store
            .with_connection(|conn| load_child(conn, id))?
            .ok_or_else(|| TherapyError::not_found("Child", id))
    }

    pub fn list_children(&self) -> Result<Vec<Child>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE deleted_at IS NULL ORDER BY name ASC, id ASC",
                    CHILD_SELECT
                ))
                .storage("Failed to prepare children query")?;
            let rows = stmt
                .query_map([], child_from_row)
                .storage("Failed to query children")?;

            let mut children = Vec::new();
            for row in rows {
                children.push(row.storage("Failed to decode child row")?);
            }
            Ok(children)
        })
    }

    /// Replaces every demographic field of an existing child.
    pub fn update_child(&self, id: i64, input: &ChildInput) -> Result<Child> {
        let name = required_name(&input.name)?;
        let date_of_birth = parse_date_of_birth(input.date_of_birth.as_deref())?;
        let now = format_timestamp(Utc::now());

        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE children SET name = ?1, date_of_birth = ?2, gender = ?3, \
                        guardian_name = ?4, contact_info = ?5, assessment_text = ?6, updated_at = ?7 \
                     WHERE id = ?8 AND deleted_at IS NULL",
                    params![
                        name,
                        date_of_birth.map(|date| date.format("%Y-%m-%d").to_string()),
                        input.gender,
                        input.guardian_name,
                        input.contact_info,
                        input.assessment_text,
                        now,
                        id
                    ],
                )
                .storage("Failed to update child")?;
            if changed == 0 {
                return Err(TherapyError::not_found("Child", id));
            }
            load_child(conn, id)?.ok_or_else(|| TherapyError::not_found("Child", id))
        })
    }

    pub fn delete_child(&self, id: i64) -> Result<()> {
        let now = format_timestamp(Utc::now());
        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE children SET deleted_at = ?1, updated_at = ?1 \
                     WHERE id = ?2 AND deleted_at IS NULL",
                    params![now, id],
                )
                .storage("Failed to delete child")?;
            if changed == 0 {
                return Err(TherapyError::not_found("Child", id));
            }
            Ok(())
        })
    }
}

/// Loads a live (not soft-deleted) child.
pub(crate) fn load_child(conn: &Connection, id: i64) -> Result<Option<Child>> {
    conn.query_row(
        &format!("{} WHERE id = ?1 AND deleted_at IS NULL", CHILD_SELECT),
        params![id],
        child_from_row,
    )
    .optional()
    .storage("Failed to query child")
}

fn child_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Child> {
    Ok(Child {
        id: row.get(0)?,
        name: row.get(1)?,
        date_of_birth: optional_date_column(row, 2)?,
        gender: row.get(3)?,
        guardian_name: row.get(4)?,
        contact_info: row.get(5)?,
        assessment_text: row.get(6)?,
        meta: RecordMeta {
            created_at: timestamp_column(row, 7)?,
            updated_at: timestamp_column(row, 8)?,
            deleted_at: optional_timestamp_column(row, 9)?,
        },
    })
}

fn required_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TherapyError::validation("name", "must not be empty"));
    }
    Ok(trimmed)
}

fn parse_date_of_birth(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                TherapyError::validation(
                    "date_of_birth",
                    format!("expected YYYY-MM-DD, got {}", raw),
                )
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::migrated_store;

    fn input(name: &str) -> ChildInput {
        ChildInput {
            name: name.to_string(),
            date_of_birth: Some("2019-04-12".to_string()),
            gender: "F".to_string(),
            guardian_name: "Rina".to_string(),
            contact_info: "0812-555".to_string(),
            assessment_text: "Speech delay".to_string(),
        }
    }

    #[test]
    fn creates_and_fetches_child() {
        let (_dir, store) = migrated_store();
        let registry = ChildRegistry::new(store);

        let created = registry.create_child(&input("  Ayu  ")).expect("create");
        assert_eq!(created.name, "Ayu");
        assert_eq!(
            created.date_of_birth,
            NaiveDate::from_ymd_opt(2019, 4, 12)
        );

        let loaded = registry.get_child(created.id).expect("get");
        assert_eq!(loaded, created);
    }

    #[test]
    fn rejects_empty_name_and_bad_date() {
        let (_dir, store) = migrated_store();
        let registry = ChildRegistry::new(store);

        let err = registry.create_child(&input("   ")).expect_err("empty name");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut bad_date = input("Bima");
        bad_date.date_of_birth = Some("12/04/2019".to_string());
        let err = registry.create_child(&bad_date).expect_err("bad date");
        assert!(matches!(err, TherapyError::Validation { field: "date_of_birth", .. }));

        assert!(registry.list_children().unwrap().is_empty());
    }

    #[test]
    fn updates_all_fields() {
        let (_dir, store) = migrated_store();
        let registry = ChildRegistry::new(store);
        let created = registry.create_child(&input("Ayu")).expect("create");

        let mut changed = input("Ayu Lestari");
        changed.date_of_birth = None;
        changed.assessment_text = "Reassessed".to_string();
        let updated = registry.update_child(created.id, &changed).expect("update");

        assert_eq!(updated.name, "Ayu Lestari");
        assert_eq!(updated.date_of_birth, None);
        assert_eq!(updated.assessment_text, "Reassessed");
        assert_eq!(updated.meta.created_at, created.meta.created_at);
    }

    #[test]
    fn soft_deleted_child_disappears_from_reads() {
        let (_dir, store) = migrated_store();
        let registry = ChildRegistry::new(store.clone());
        let ayu = registry.create_child(&input("Ayu")).expect("create");
        let bima = registry.create_child(&input("Bima")).expect("create");

        registry.delete_child(ayu.id).expect("delete");

        let names: Vec<String> = registry
            .list_children()
            .unwrap()
            .into_iter()
            .map(|child| child.name)
            .collect();
        assert_eq!(names, vec!["Bima"]);
        assert!(registry.get_child(ayu.id).unwrap_err().is_not_found());
        assert!(registry.delete_child(ayu.id).unwrap_err().is_not_found());
        assert!(registry.get_child(bima.id).is_ok());

        // The row itself is kept.
        let rows: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM children", [], |row| row.get(0))
                    .storage("count children")
            })
            .unwrap();
        assert_eq!(rows, 2);
    }
}
