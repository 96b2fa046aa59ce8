//! Auto-close sweeps over open sessions.

use chrono::Utc;
use std::thread;
use std::time::Duration;
use therapy_core::{ActivityTracker, ChangeEvent, Result, SessionLifecycle, Store};
use tracing::{info, warn};

pub struct SweepOptions {
    pub session_id: Option<i64>,
    pub max_duration_minutes: i64,
}

/// Sweeps the selected session (or every open one) and returns one event per
/// session that had instances closed. When sweeping every open session, one
/// that fails is logged and left for the next run.
pub fn sweep_once(store: &Store, options: &SweepOptions) -> Result<Vec<ChangeEvent>> {
    let session_ids = match options.session_id {
        Some(id) => vec![id],
        None => SessionLifecycle::new(store.clone())
            .list_open_sessions()?
            .into_iter()
            .map(|session| session.id)
            .collect(),
    };

    let tracker = ActivityTracker::new(store.clone());
    let mut events = Vec::new();
    for session_id in session_ids {
        let report = match tracker.auto_close(session_id, options.max_duration_minutes) {
            Ok(report) => report,
            Err(err) if options.session_id.is_some() => return Err(err),
            Err(err) => {
                warn!(session_id, error = %err, "Auto-close sweep failed for session");
                continue;
            }
        };
        for skipped in &report.skipped {
            warn!(
                session_id,
                instance_id = skipped.instance_id,
                reason = %skipped.reason,
                "Activity left running"
            );
        }
        if let Some(event) = ChangeEvent::activities_auto_closed(&report, Utc::now()) {
            events.push(event);
        }
    }
    Ok(events)
}

pub fn watch(store: &Store, options: &SweepOptions, interval_secs: u64) {
    info!(
        interval_secs,
        max_duration_minutes = options.max_duration_minutes,
        "Watching for long-running activities"
    );
    loop {
        match sweep_once(store, options) {
            Ok(events) => {
                for event in events {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(err) => warn!(error = %err, "Failed to encode change event"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "Periodic auto-close sweep failed"),
        }
        thread::sleep(Duration::from_secs(interval_secs.max(1)));
    }
}
