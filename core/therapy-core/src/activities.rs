//! Activity instances inside a session.
//!
//! An instance is Running until `end_time` is set and Ended afterwards; Ended
//! is terminal. Every end goes through an `end_time IS NULL` guarded update, so
//! an end time, once written, is never replaced.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::catalog::load_activity;
use crate::error::{Result, StorageContext, TherapyError};
use crate::sessions::load_session;
use crate::store::{format_timestamp, optional_timestamp_column, timestamp_column, Store};
use crate::types::{ActivityInstance, AutoCloseReport, RecordMeta, SkippedInstance};

const INSTANCE_SELECT: &str = "SELECT id, session_id, activity_id, start_time, end_time, notes, \
                               created_at, updated_at, deleted_at FROM session_activities";

/// Note appended to an instance closed by [`ActivityTracker::auto_close`].
pub fn auto_close_marker(max_duration_minutes: i64) -> String {
    format!("(auto-closed after {} minutes)", max_duration_minutes)
}

pub struct ActivityTracker {
    store: Store,
}

impl ActivityTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn start_activity(
        &self,
        session_id: i64,
        activity_id: i64,
        notes: &str,
    ) -> Result<ActivityInstance> {
        self.start_activity_at(session_id, activity_id, notes, Utc::now())
    }

    /// Starts a running instance of `activity_id` in an open session.
    ///
    /// Returns the instance with its activity definition attached.
    pub fn start_activity_at(
        &self,
        session_id: i64,
        activity_id: i64,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivityInstance> {
        let instance = self
            .store
            .with_transaction(TransactionBehavior::Immediate, |tx| {
                let session = load_session(tx, session_id)?
                    .ok_or_else(|| TherapyError::not_found("Session", session_id))?;
                if !session.is_open() {
                    return Err(TherapyError::SessionClosed(session_id));
                }
                let activity = load_activity(tx, activity_id)?
                    .ok_or_else(|| TherapyError::not_found("Activity", activity_id))?;

                let stamp = format_timestamp(now);
                tx.execute(
                    "INSERT INTO session_activities \
                        (session_id, activity_id, start_time, end_time, notes, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, NULL, ?4, ?3, ?3)",
                    params![session_id, activity_id, stamp, notes],
                )
                .storage("Failed to start activity")?;

                let id = tx.last_insert_rowid();
                let mut instance = load_instance(tx, id)?
                    .ok_or_else(|| TherapyError::not_found("Activity instance", id))?;
                instance.activity = Some(activity);
                Ok(instance)
            })?;

        debug!(
            instance_id = instance.id,
            session_id,
            activity_id,
            "Activity started"
        );
        Ok(instance)
    }

    pub fn end_activity(&self, instance_id: i64, notes: &str) -> Result<ActivityInstance> {
        self.end_activity_at(instance_id, notes, Utc::now())
    }

    /// Ends a running instance and replaces its notes.
    ///
    /// Allowed even when the owning session has already closed, so stale
    /// instances can still be settled.
    pub fn end_activity_at(
        &self,
        instance_id: i64,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivityInstance> {
        let instance = self
            .store
            .with_transaction(TransactionBehavior::Immediate, |tx| {
                let current = load_instance(tx, instance_id)?
                    .ok_or_else(|| TherapyError::not_found("Activity instance", instance_id))?;
                if !current.is_running() {
                    return Err(TherapyError::ActivityAlreadyEnded(instance_id));
                }

                let stamp = format_timestamp(now);
                let changed = tx
                    .execute(
                        "UPDATE session_activities SET end_time = ?1, notes = ?2, updated_at = ?1 \
                         WHERE id = ?3 AND end_time IS NULL AND deleted_at IS NULL",
                        params![stamp, notes, instance_id],
                    )
                    .storage("Failed to end activity")?;
                if changed == 0 {
                    return Err(TherapyError::ActivityAlreadyEnded(instance_id));
                }

                with_activity(tx, instance_id)
            })?;

        debug!(instance_id, "Activity ended");
        Ok(instance)
    }

    /// Replaces notes on a running or ended instance; timestamps are untouched.
    pub fn update_notes(&self, instance_id: i64, notes: &str) -> Result<ActivityInstance> {
        self.update_notes_at(instance_id, notes, Utc::now())
    }

    pub fn update_notes_at(
        &self,
        instance_id: i64,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivityInstance> {
        let now = format_timestamp(now);
        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE session_activities SET notes = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND deleted_at IS NULL",
                    params![notes, now, instance_id],
                )
                .storage("Failed to update activity notes")?;
            if changed == 0 {
                return Err(TherapyError::not_found("Activity instance", instance_id));
            }
            with_activity(conn, instance_id)
        })
    }

    pub fn get_instance(&self, instance_id: i64) -> Result<ActivityInstance> {
        self.store
            .with_connection(|conn| with_activity(conn, instance_id))
    }

    /// Every instance in a session, in start order.
    pub fn list_instances(&self, session_id: i64) -> Result<Vec<ActivityInstance>> {
        self.query_instances(
            &format!(
                "{} WHERE session_id = ?1 AND deleted_at IS NULL ORDER BY start_time ASC, id ASC",
                INSTANCE_SELECT
            ),
            session_id,
        )
    }

    /// Running instances in a session.
    pub fn list_active(&self, session_id: i64) -> Result<Vec<ActivityInstance>> {
        self.query_instances(
            &format!(
                "{} WHERE session_id = ?1 AND end_time IS NULL AND deleted_at IS NULL \
                 ORDER BY start_time ASC, id ASC",
                INSTANCE_SELECT
            ),
            session_id,
        )
    }

    /// A child's activity history across all their sessions, newest first.
    pub fn list_instances_for_child(&self, child_id: i64) -> Result<Vec<ActivityInstance>> {
        self.query_instances(
            "SELECT sa.id, sa.session_id, sa.activity_id, sa.start_time, sa.end_time, sa.notes, \
                    sa.created_at, sa.updated_at, sa.deleted_at \
             FROM session_activities sa \
             JOIN sessions s ON s.id = sa.session_id \
             WHERE s.child_id = ?1 AND s.deleted_at IS NULL AND sa.deleted_at IS NULL \
             ORDER BY sa.start_time DESC, sa.id DESC",
            child_id,
        )
    }

    pub fn auto_close(&self, session_id: i64, max_duration_minutes: i64) -> Result<AutoCloseReport> {
        self.auto_close_at(session_id, max_duration_minutes, Utc::now())
    }

    /// Ends every instance in the session that has been running longer than
    /// `max_duration_minutes`, appending [`auto_close_marker`] to its notes.
    ///
    /// Each instance is closed on its own. A failed update lands in
    /// `skipped` with its reason and the sweep moves on.
    pub fn auto_close_at(
        &self,
        session_id: i64,
        max_duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<AutoCloseReport> {
        if max_duration_minutes < 0 {
            return Err(TherapyError::validation(
                "max_duration_minutes",
                "must not be negative",
            ));
        }

        let cutoff = Duration::try_minutes(max_duration_minutes)
            .and_then(|max| now.checked_sub_signed(max))
            .map(format_timestamp)
            .ok_or_else(|| TherapyError::validation("max_duration_minutes", "out of range"))?;
        let stale = self.query_instances_with_cutoff(session_id, &cutoff)?;

        let marker = auto_close_marker(max_duration_minutes);
        let stamp = format_timestamp(now);
        let mut report = AutoCloseReport {
            session_id,
            max_duration_minutes,
            ..AutoCloseReport::default()
        };

        for instance in stale {
            let notes = if instance.notes.is_empty() {
                marker.clone()
            } else {
                format!("{} {}", instance.notes, marker)
            };

            match self.close_one(instance.id, &notes, &stamp) {
                Ok(Some(closed)) => report.closed.push(closed),
                Ok(None) => report.skipped.push(SkippedInstance {
                    instance_id: instance.id,
                    reason: "already ended".to_string(),
                }),
                Err(err) => {
                    warn!(
                        instance_id = instance.id,
                        session_id,
                        error = %err,
                        "Skipping activity during auto-close"
                    );
                    report.skipped.push(SkippedInstance {
                        instance_id: instance.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !report.is_empty() {
            info!(
                session_id,
                closed = report.closed.len(),
                skipped = report.skipped.len(),
                max_duration_minutes,
                "Auto-closed long-running activities"
            );
        }
        Ok(report)
    }

    /// `Ok(None)` when the instance ended between selection and update.
    fn close_one(
        &self,
        instance_id: i64,
        notes: &str,
        stamp: &str,
    ) -> Result<Option<ActivityInstance>> {
        self.store.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE session_activities SET end_time = ?1, notes = ?2, updated_at = ?1 \
                     WHERE id = ?3 AND end_time IS NULL AND deleted_at IS NULL",
                    params![stamp, notes, instance_id],
                )
                .storage("Failed to auto-close activity")?;
            if changed == 0 {
                return Ok(None);
            }
            with_activity(conn, instance_id).map(Some)
        })
    }

    fn query_instances_with_cutoff(
        &self,
        session_id: i64,
        cutoff: &str,
    ) -> Result<Vec<ActivityInstance>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} WHERE session_id = ?1 AND end_time IS NULL AND deleted_at IS NULL \
                       AND start_time IS NOT NULL AND start_time < ?2 \
                     ORDER BY start_time ASC, id ASC",
                    INSTANCE_SELECT
                ))
                .storage("Failed to prepare long-running activities query")?;
            let rows = stmt
                .query_map(params![session_id, cutoff], instance_from_row)
                .storage("Failed to query long-running activities")?;

            let mut instances = Vec::new();
            for row in rows {
                instances.push(row.storage("Failed to decode activity instance row")?);
            }
            Ok(instances)
        })
    }

    fn query_instances(&self, sql: &str, key: i64) -> Result<Vec<ActivityInstance>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .storage("Failed to prepare activity instances query")?;
            let rows = stmt
                .query_map(params![key], instance_from_row)
                .storage("Failed to query activity instances")?;

            let mut instances = Vec::new();
            for row in rows {
                let mut instance = row.storage("Failed to decode activity instance row")?;
                instance.activity = load_activity(conn, instance.activity_id)?;
                instances.push(instance);
            }
            Ok(instances)
        })
    }
}

fn load_instance(conn: &Connection, id: i64) -> Result<Option<ActivityInstance>> {
    conn.query_row(
        &format!("{} WHERE id = ?1 AND deleted_at IS NULL", INSTANCE_SELECT),
        params![id],
        instance_from_row,
    )
    .optional()
    .storage("Failed to query activity instance")
}

fn with_activity(conn: &Connection, instance_id: i64) -> Result<ActivityInstance> {
    let mut instance = load_instance(conn, instance_id)?
        .ok_or_else(|| TherapyError::not_found("Activity instance", instance_id))?;
    instance.activity = load_activity(conn, instance.activity_id)?;
    Ok(instance)
}

fn instance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityInstance> {
    Ok(ActivityInstance {
        id: row.get(0)?,
        session_id: row.get(1)?,
        activity_id: row.get(2)?,
        start_time: optional_timestamp_column(row, 3)?,
        end_time: optional_timestamp_column(row, 4)?,
        notes: row.get(5)?,
        meta: RecordMeta {
            created_at: timestamp_column(row, 6)?,
            updated_at: timestamp_column(row, 7)?,
            deleted_at: optional_timestamp_column(row, 8)?,
        },
        activity: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionLifecycle;
    use crate::test_support::{at, create_activity, create_child, migrated_store};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        tracker: ActivityTracker,
        sessions: SessionLifecycle,
        session_id: i64,
        activity_id: i64,
    }

    fn fixture() -> Fixture {
        let (dir, store) = migrated_store();
        let child_id = create_child(&store, "Ayu");
        let activity_id = create_activity(&store, "Blocks");
        let sessions = SessionLifecycle::new(store.clone());
        let session_id = sessions
            .start_session_at(child_id, at(9, 0))
            .expect("start session")
            .id;
        Fixture {
            _dir: dir,
            tracker: ActivityTracker::new(store.clone()),
            store,
            sessions,
            session_id,
            activity_id,
        }
    }

    #[test]
    fn start_attaches_definition_and_runs() {
        let f = fixture();
        let instance = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "warm-up", at(9, 5))
            .expect("start");

        assert!(instance.is_running());
        assert_eq!(instance.start_time, Some(at(9, 5)));
        assert_eq!(instance.notes, "warm-up");
        assert_eq!(
            instance.activity.as_ref().map(|a| a.name.as_str()),
            Some("Blocks")
        );
        assert_eq!(f.tracker.list_active(f.session_id).unwrap().len(), 1);
    }

    #[test]
    fn start_requires_known_session_and_definition() {
        let f = fixture();
        assert!(f
            .tracker
            .start_activity(999, f.activity_id, "")
            .unwrap_err()
            .is_not_found());
        assert!(f
            .tracker
            .start_activity(f.session_id, 999, "")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn start_in_closed_session_is_rejected() {
        let f = fixture();
        f.sessions
            .end_session_at(f.session_id, "", at(9, 30))
            .expect("end session");

        let err = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 31))
            .expect_err("closed session");
        assert!(matches!(err, TherapyError::SessionClosed(id) if id == f.session_id));
        assert!(f.tracker.list_instances(f.session_id).unwrap().is_empty());
    }

    #[test]
    fn end_twice_keeps_the_first_end_time() {
        let f = fixture();
        let instance = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 5))
            .unwrap();

        let ended = f
            .tracker
            .end_activity_at(instance.id, "stacked 6 blocks", at(9, 20))
            .expect("end");
        assert_eq!(ended.end_time, Some(at(9, 20)));
        assert_eq!(ended.notes, "stacked 6 blocks");

        let err = f
            .tracker
            .end_activity_at(instance.id, "again", at(9, 40))
            .expect_err("end twice");
        assert!(matches!(err, TherapyError::ActivityAlreadyEnded(id) if id == instance.id));

        let kept = f.tracker.get_instance(instance.id).unwrap();
        assert_eq!(kept.end_time, Some(at(9, 20)));
        assert_eq!(kept.notes, "stacked 6 blocks");
        assert!(f
            .tracker
            .end_activity(999, "")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn end_is_allowed_after_the_session_closes() {
        let f = fixture();
        let instance = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 5))
            .unwrap();
        f.sessions
            .end_session_at(f.session_id, "", at(9, 30))
            .unwrap();

        let ended = f
            .tracker
            .end_activity_at(instance.id, "late", at(9, 35))
            .expect("end after session close");
        assert_eq!(ended.end_time, Some(at(9, 35)));
    }

    #[test]
    fn update_notes_leaves_timestamps() {
        let f = fixture();
        let instance = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "first", at(9, 5))
            .unwrap();
        let running = f
            .tracker
            .update_notes_at(instance.id, "second", at(9, 7))
            .unwrap();
        assert_eq!(running.notes, "second");
        assert_eq!(running.meta.updated_at, at(9, 7));
        assert!(running.is_running());

        f.tracker
            .end_activity_at(instance.id, "ended", at(9, 10))
            .unwrap();
        let ended = f.tracker.update_notes(instance.id, "rewritten").unwrap();
        assert_eq!(ended.notes, "rewritten");
        assert_eq!(ended.start_time, Some(at(9, 5)));
        assert_eq!(ended.end_time, Some(at(9, 10)));

        assert!(f
            .tracker
            .update_notes(999, "x")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn auto_close_only_touches_instances_past_the_cutoff() {
        let f = fixture();
        let stale = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 0))
            .unwrap();
        let noted = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "calm", at(9, 10))
            .unwrap();
        let fresh = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 30))
            .unwrap();
        let boundary = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 20))
            .unwrap();

        // cutoff = 9:20; strictly-before only.
        let report = f
            .tracker
            .auto_close_at(f.session_id, 30, at(9, 50))
            .expect("auto close");

        assert_eq!(report.closed_ids(), vec![stale.id, noted.id]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.closed[0].notes, auto_close_marker(30));
        assert_eq!(report.closed[1].notes, "calm (auto-closed after 30 minutes)");
        assert!(report
            .closed
            .iter()
            .all(|instance| instance.end_time == Some(at(9, 50))));

        let running: Vec<i64> = f
            .tracker
            .list_active(f.session_id)
            .unwrap()
            .into_iter()
            .map(|instance| instance.id)
            .collect();
        assert_eq!(running, vec![boundary.id, fresh.id]);
    }

    #[test]
    fn auto_close_rejects_negative_threshold() {
        let f = fixture();
        let err = f
            .tracker
            .auto_close(f.session_id, -5)
            .expect_err("negative threshold");
        assert!(matches!(err, TherapyError::Validation { field: "max_duration_minutes", .. }));
    }

    #[test]
    fn auto_close_rejects_threshold_past_the_calendar() {
        let f = fixture();
        let running = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 0))
            .unwrap();

        for max in [200_000_000_000, i64::MAX] {
            let err = f
                .tracker
                .auto_close_at(f.session_id, max, at(10, 0))
                .expect_err("threshold out of range");
            assert!(matches!(err, TherapyError::Validation { field: "max_duration_minutes", .. }));
        }
        assert!(f.tracker.get_instance(running.id).unwrap().is_running());
    }

    #[test]
    fn auto_close_reports_rows_that_fail_and_closes_the_rest() {
        let f = fixture();
        let locked = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 0))
            .unwrap();
        let other = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 1))
            .unwrap();

        f.store
            .execute_raw(&format!(
                "CREATE TRIGGER lock_instance BEFORE UPDATE ON session_activities \
                 WHEN OLD.id = {} BEGIN SELECT RAISE(ABORT, 'instance locked'); END;",
                locked.id
            ))
            .expect("create trigger");

        let report = f
            .tracker
            .auto_close_at(f.session_id, 10, at(10, 0))
            .expect("auto close");

        assert_eq!(report.closed_ids(), vec![other.id]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].instance_id, locked.id);
        assert!(report.skipped[0].reason.contains("instance locked"));
        assert!(f.tracker.get_instance(locked.id).unwrap().is_running());
    }

    #[test]
    fn child_history_spans_sessions() {
        let f = fixture();
        let first = f
            .tracker
            .start_activity_at(f.session_id, f.activity_id, "", at(9, 5))
            .unwrap();
        f.sessions
            .end_session_at(f.session_id, "", at(9, 30))
            .unwrap();

        let child_id = f.sessions.get_session(f.session_id).unwrap().child_id;
        let next_session = f.sessions.start_session_at(child_id, at(11, 0)).unwrap();
        let second = f
            .tracker
            .start_activity_at(next_session.id, f.activity_id, "", at(11, 5))
            .unwrap();

        let history: Vec<i64> = f
            .tracker
            .list_instances_for_child(child_id)
            .unwrap()
            .into_iter()
            .map(|instance| instance.id)
            .collect();
        assert_eq!(history, vec![second.id, first.id]);
    }
}
