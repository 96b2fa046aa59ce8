//! Record types shared by the lifecycle components.
//!
//! All types serialize for the UI shell. Relations (`child`, `activity`) are
//! attached only by operations that say so and are omitted from JSON otherwise.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Bookkeeping columns carried by every persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Child {
    pub id: i64,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: String,
    pub guardian_name: String,
    pub contact_info: String,
    pub assessment_text: String,
    #[serde(flatten)]
    pub meta: RecordMeta,
}

/// Input for creating or replacing a child's demographic fields.
#[derive(Debug, Clone, Default)]
pub struct ChildInput {
    pub name: String,
    /// `YYYY-MM-DD`; empty or `None` leaves the date unset.
    pub date_of_birth: Option<String>,
    pub gender: String,
    pub guardian_name: String,
    pub contact_info: String,
    pub assessment_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub child_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub summary_text: String,
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child: Option<Child>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityDefinition {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub default_duration_minutes: i64,
    pub category: String,
    pub objectives: String,
    #[serde(flatten)]
    pub meta: RecordMeta,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityInput {
    pub name: String,
    pub description: String,
    pub default_duration_minutes: i64,
    pub category: String,
    pub objectives: String,
}

/// One occurrence of an activity inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityInstance {
    pub id: i64,
    pub session_id: i64,
    pub activity_id: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: String,
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityDefinition>,
}

impl ActivityInstance {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Outcome of an auto-close sweep over one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoCloseReport {
    pub session_id: i64,
    pub max_duration_minutes: i64,
    pub closed: Vec<ActivityInstance>,
    pub skipped: Vec<SkippedInstance>,
}

impl AutoCloseReport {
    pub fn closed_ids(&self) -> Vec<i64> {
        self.closed.iter().map(|instance| instance.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedInstance {
    pub instance_id: i64,
    pub reason: String,
}
