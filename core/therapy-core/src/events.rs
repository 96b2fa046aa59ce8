//! Change notifications for the UI shell.
//!
//! Lifecycle operations stay free of side channels; callers build a
//! [`ChangeEvent`] from the value a mutation returned and forward it however
//! their shell delivers events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::format_timestamp;
use crate::types::{ActivityInstance, AutoCloseReport, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    SessionStarted,
    SessionEnded,
    SummaryUpdated,
    ActivityStarted,
    ActivityEnded,
    ActivityNotesUpdated,
    ActivitiesAutoClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_id: Option<i64>,
    pub session_id: i64,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<i64>,
    pub recorded_at: String,
}

impl ChangeEvent {
    pub fn session_started(session: &Session, now: DateTime<Utc>) -> Self {
        Self::for_session(session, ChangeKind::SessionStarted, now)
    }

    pub fn session_ended(session: &Session, now: DateTime<Utc>) -> Self {
        Self::for_session(session, ChangeKind::SessionEnded, now)
    }

    pub fn summary_updated(session: &Session, now: DateTime<Utc>) -> Self {
        Self::for_session(session, ChangeKind::SummaryUpdated, now)
    }

    pub fn activity_started(instance: &ActivityInstance, now: DateTime<Utc>) -> Self {
        Self::for_instance(instance, ChangeKind::ActivityStarted, now)
    }

    pub fn activity_ended(instance: &ActivityInstance, now: DateTime<Utc>) -> Self {
        Self::for_instance(instance, ChangeKind::ActivityEnded, now)
    }

    pub fn activity_notes_updated(instance: &ActivityInstance, now: DateTime<Utc>) -> Self {
        Self::for_instance(instance, ChangeKind::ActivityNotesUpdated, now)
    }

    /// `None` when the sweep closed nothing; an empty sweep is not a change.
    pub fn activities_auto_closed(report: &AutoCloseReport, now: DateTime<Utc>) -> Option<Self> {
        if report.closed.is_empty() {
            return None;
        }
        Some(Self {
            child_id: None,
            session_id: report.session_id,
            kind: ChangeKind::ActivitiesAutoClosed,
            instance_ids: report.closed_ids(),
            recorded_at: format_timestamp(now),
        })
    }

    fn for_session(session: &Session, kind: ChangeKind, now: DateTime<Utc>) -> Self {
        Self {
            child_id: Some(session.child_id),
            session_id: session.id,
            kind,
            instance_ids: Vec::new(),
            recorded_at: format_timestamp(now),
        }
    }

    fn for_instance(instance: &ActivityInstance, kind: ChangeKind, now: DateTime<Utc>) -> Self {
        Self {
            child_id: None,
            session_id: instance.session_id,
            kind,
            instance_ids: vec![instance.id],
            recorded_at: format_timestamp(now),
        }
    }
}
