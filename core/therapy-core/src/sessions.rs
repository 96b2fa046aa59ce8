//! Session lifecycle.
//!
//! A child is either Closed (no session with a null `end_time`) or Open
//! (exactly one). Starting checks and inserts inside one IMMEDIATE
//! transaction, and the `idx_sessions_one_open_per_child` partial unique index
//! backs the invariant for writers outside this module.
//!
//! `duration_minutes` is written once, when the session ends. Summary edits
//! after that never touch it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::children::load_child;
use crate::error::{is_unique_violation, Result, StorageContext, TherapyError};
use crate::store::{format_timestamp, optional_timestamp_column, timestamp_column, Store};
use crate::types::{RecordMeta, Session};

const SESSION_SELECT: &str = "SELECT id, child_id, start_time, end_time, duration_minutes, \
                              summary_text, created_at, updated_at, deleted_at FROM sessions";

pub struct SessionLifecycle {
    store: Store,
}

impl SessionLifecycle {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn start_session(&self, child_id: i64) -> Result<Session> {
        self.start_session_at(child_id, Utc::now())
    }

    /// Opens a session for `child_id` starting at `now`.
    ///
    /// Returns the session with its child attached.
    pub fn start_session_at(&self, child_id: i64, now: DateTime<Utc>) -> Result<Session> {
        self.store
            .with_transaction(TransactionBehavior::Immediate, |tx| {
                let child = load_child(tx, child_id)?
                    .ok_or_else(|| TherapyError::not_found("Child", child_id))?;

                if let Some(open) = load_open_session(tx, child_id)? {
                    return Err(TherapyError::SessionAlreadyOpen {
                        child_id,
                        session_id: Some(open.id),
                    });
                }

                let stamp = format_timestamp(now);
                tx.execute(
                    "INSERT INTO sessions \
                        (child_id, start_time, end_time, duration_minutes, summary_text, created_at, updated_at) \
                     VALUES (?1, ?2, NULL, 0, '', ?2, ?2)",
                    params![child_id, stamp],
                )
                .map_err(|err| {
                    if is_unique_violation(&err) {
                        TherapyError::SessionAlreadyOpen {
                            child_id,
                            session_id: None,
                        }
                    } else {
                        TherapyError::Storage {
                            context: "Failed to create session".to_string(),
                            source: err,
                        }
                    }
                })?;

                let id = tx.last_insert_rowid();
                let mut session =
                    load_session(tx, id)?.ok_or_else(|| TherapyError::not_found("Session", id))?;
                session.child = Some(child);
                Ok(session)
            })
            .map(|session| {
                debug!(session_id = session.id, child_id, "Session started");
                session
            })
    }

    pub fn end_session(&self, session_id: i64, summary_text: &str) -> Result<Session> {
        self.end_session_at(session_id, summary_text, Utc::now())
    }

    /// Closes an open session, deriving `duration_minutes` from its start.
    ///
    /// The summary is stored verbatim.
    pub fn end_session_at(
        &self,
        session_id: i64,
        summary_text: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self
            .store
            .with_transaction(TransactionBehavior::Immediate, |tx| {
                let current = load_session(tx, session_id)?
                    .ok_or_else(|| TherapyError::not_found("Session", session_id))?;
                if !current.is_open() {
                    return Err(TherapyError::SessionAlreadyEnded(session_id));
                }

                let duration = duration_minutes(current.start_time, now);
                let stamp = format_timestamp(now);
                let changed = tx
                    .execute(
                        "UPDATE sessions SET end_time = ?1, duration_minutes = ?2, \
                            summary_text = ?3, updated_at = ?1 \
                         WHERE id = ?4 AND end_time IS NULL AND deleted_at IS NULL",
                        params![stamp, duration, summary_text, session_id],
                    )
                    .storage("Failed to end session")?;
                if changed == 0 {
                    return Err(TherapyError::SessionAlreadyEnded(session_id));
                }

                with_child(tx, session_id)
            })?;

        debug!(
            session_id,
            duration_minutes = session.duration_minutes,
            "Session ended"
        );
        Ok(session)
    }

    /// The open session for `child_id`, if any. Absence is not an error.
    pub fn active_session(&self, child_id: i64) -> Result<Option<Session>> {
        self.store.with_connection(|conn| {
            let Some(mut session) = load_open_session(conn, child_id)? else {
                return Ok(None);
            };
            session.child = load_child(conn, session.child_id)?;
            Ok(Some(session))
        })
    }

    pub fn get_session(&self, session_id: i64) -> Result<Session> {
        self.store.with_connection(|conn| with_child(conn, session_id))
    }

    /// A child's sessions, newest first.
    pub fn list_sessions(&self, child_id: i64) -> Result<Vec<Session>> {
        self.query_sessions(
            &format!(
                "{} WHERE child_id = ?1 AND deleted_at IS NULL ORDER BY start_time DESC, id DESC",
                SESSION_SELECT
            ),
            Some(child_id),
        )
    }

    /// Every open session across all children, oldest first.
    pub fn list_open_sessions(&self) -> Result<Vec<Session>> {
        self.query_sessions(
            &format!(
                "{} WHERE end_time IS NULL AND deleted_at IS NULL ORDER BY start_time ASC, id ASC",
                SESSION_SELECT
            ),
            None,
        )
    }

    /// Replaces the summary of an open or closed session.
    pub fn update_summary(&self, session_id: i64, summary_text: &str) -> Result<Session> {
        self.update_summary_at(session_id, summary_text, Utc::now())
    }

    pub fn update_summary_at(
        &self,
        session_id: i64,
        summary_text: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let now = format_timestamp(now);
        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET summary_text = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND deleted_at IS NULL",
                    params![summary_text, now, session_id],
                )
                .storage("Failed to update session summary")?;
            if changed == 0 {
                return Err(TherapyError::not_found("Session", session_id));
            }
            with_child(conn, session_id)
        })
    }

    /// False for unknown sessions as well as closed ones.
    pub fn is_session_open(&self, session_id: i64) -> Result<bool> {
        let session = self
            .store
            .with_connection(|conn| load_session(conn, session_id))?;
        Ok(session.map(|session| session.is_open()).unwrap_or(false))
    }

    fn query_sessions(&self, sql: &str, child_id: Option<i64>) -> Result<Vec<Session>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .storage("Failed to prepare sessions query")?;
            let rows = match child_id {
                Some(child_id) => stmt.query_map(params![child_id], session_from_row),
                None => stmt.query_map([], session_from_row),
            }
            .storage("Failed to query sessions")?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.storage("Failed to decode session row")?);
            }
            Ok(sessions)
        })
    }
}

/// Whole minutes between start and end, never negative.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes().max(0)
}

pub(crate) fn load_session(conn: &Connection, id: i64) -> Result<Option<Session>> {
    conn.query_row(
        &format!("{} WHERE id = ?1 AND deleted_at IS NULL", SESSION_SELECT),
        params![id],
        session_from_row,
    )
    .optional()
    .storage("Failed to query session")
}

fn load_open_session(conn: &Connection, child_id: i64) -> Result<Option<Session>> {
    conn.query_row(
        &format!(
            "{} WHERE child_id = ?1 AND end_time IS NULL AND deleted_at IS NULL \
             ORDER BY start_time DESC LIMIT 1",
            SESSION_SELECT
        ),
        params![child_id],
        session_from_row,
    )
    .optional()
    .storage("Failed to query open session")
}

fn with_child(conn: &Connection, session_id: i64) -> Result<Session> {
    let mut session = load_session(conn, session_id)?
        .ok_or_else(|| TherapyError::not_found("Session", session_id))?;
    session.child = load_child(conn, session.child_id)?;
    Ok(session)
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        child_id: row.get(1)?,
        start_time: timestamp_column(row, 2)?,
        end_time: optional_timestamp_column(row, 3)?,
        duration_minutes: row.get(4)?,
        summary_text: row.get(5)?,
        meta: RecordMeta {
            created_at: timestamp_column(row, 6)?,
            updated_at: timestamp_column(row, 7)?,
            deleted_at: optional_timestamp_column(row, 8)?,
        },
        child: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::ChildRegistry;
    use crate::test_support::{at, create_child, migrated_store};
    use chrono::Duration;

    #[test]
    fn second_start_is_a_conflict_until_the_first_ends() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let sessions = SessionLifecycle::new(store);
        let t0 = at(9, 0);

        let first = sessions.start_session_at(child_id, t0).expect("start");
        assert!(first.is_open());
        assert_eq!(first.start_time, t0);
        assert_eq!(first.duration_minutes, 0);
        assert_eq!(first.child.as_ref().map(|c| c.id), Some(child_id));

        let err = sessions
            .start_session_at(child_id, t0 + Duration::minutes(1))
            .expect_err("second start");
        assert!(matches!(
            err,
            TherapyError::SessionAlreadyOpen { session_id: Some(id), .. } if id == first.id
        ));

        sessions
            .end_session_at(first.id, "done", t0 + Duration::minutes(10))
            .expect("end");
        let second = sessions
            .start_session_at(child_id, t0 + Duration::minutes(11))
            .expect("restart");
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn unknown_or_deleted_child_is_not_found() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        ChildRegistry::new(store.clone())
            .delete_child(child_id)
            .expect("delete");
        let sessions = SessionLifecycle::new(store);

        assert!(sessions.start_session(999).unwrap_err().is_not_found());
        assert!(sessions.start_session(child_id).unwrap_err().is_not_found());
    }

    #[test]
    fn end_derives_floor_minutes_and_stores_summary() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let sessions = SessionLifecycle::new(store);
        let t0 = at(9, 0);

        let session = sessions.start_session_at(child_id, t0).expect("start");
        let end = t0 + Duration::minutes(42) + Duration::seconds(59);
        let ended = sessions
            .end_session_at(session.id, "  good progress  ", end)
            .expect("end");

        assert_eq!(ended.end_time, Some(end));
        assert_eq!(ended.duration_minutes, 42);
        assert_eq!(ended.summary_text, "  good progress  ");
    }

    #[test]
    fn end_twice_is_a_conflict_and_unknown_is_not_found() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let sessions = SessionLifecycle::new(store);
        let t0 = at(9, 0);

        let session = sessions.start_session_at(child_id, t0).expect("start");
        sessions
            .end_session_at(session.id, "first", t0 + Duration::minutes(5))
            .expect("end");

        let err = sessions
            .end_session_at(session.id, "second", t0 + Duration::minutes(9))
            .expect_err("end twice");
        assert!(matches!(err, TherapyError::SessionAlreadyEnded(id) if id == session.id));

        let kept = sessions.get_session(session.id).unwrap();
        assert_eq!(kept.end_time, Some(t0 + Duration::minutes(5)));
        assert_eq!(kept.summary_text, "first");

        assert!(sessions.end_session(404, "x").unwrap_err().is_not_found());
    }

    #[test]
    fn summary_edit_after_close_keeps_duration() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let sessions = SessionLifecycle::new(store);
        let t0 = at(9, 0);

        let session = sessions.start_session_at(child_id, t0).expect("start");
        sessions
            .end_session_at(session.id, "short", t0 + Duration::minutes(30))
            .expect("end");

        let edited = sessions
            .update_summary_at(
                session.id,
                "longer summary written later",
                t0 + Duration::minutes(90),
            )
            .expect("edit");
        assert_eq!(edited.summary_text, "longer summary written later");
        assert_eq!(edited.meta.updated_at, t0 + Duration::minutes(90));
        assert_eq!(edited.duration_minutes, 30);
        assert_eq!(edited.end_time, Some(t0 + Duration::minutes(30)));
    }

    #[test]
    fn active_session_reports_absence_without_error() {
        let (_dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let sessions = SessionLifecycle::new(store);

        assert!(sessions.active_session(child_id).unwrap().is_none());

        let session = sessions.start_session(child_id).expect("start");
        let active = sessions
            .active_session(child_id)
            .unwrap()
            .expect("active");
        assert_eq!(active.id, session.id);
        assert_eq!(active.child.map(|c| c.name), Some("Ayu".to_string()));
        assert!(sessions.is_session_open(session.id).unwrap());
        assert!(!sessions.is_session_open(999).unwrap());
    }

    #[test]
    fn lists_history_newest_first_and_open_sessions() {
        let (_dir, store) = migrated_store();
        let ayu = create_child(&store, "Ayu");
        let bima = create_child(&store, "Bima");
        let sessions = SessionLifecycle::new(store);

        let first = sessions.start_session_at(ayu, at(8, 0)).unwrap();
        sessions.end_session_at(first.id, "", at(8, 30)).unwrap();
        let second = sessions.start_session_at(ayu, at(10, 0)).unwrap();
        let other = sessions.start_session_at(bima, at(9, 0)).unwrap();

        let history: Vec<i64> = sessions
            .list_sessions(ayu)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(history, vec![second.id, first.id]);

        let open: Vec<i64> = sessions
            .list_open_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(open, vec![other.id, second.id]);
    }

    #[test]
    fn duration_never_goes_negative() {
        assert_eq!(duration_minutes(at(9, 0), at(8, 59)), 0);
        assert_eq!(duration_minutes(at(9, 0), at(9, 59)), 59);
    }
}
