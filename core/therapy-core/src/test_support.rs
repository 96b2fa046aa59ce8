//! Fixtures shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::catalog::ActivityCatalog;
use crate::children::ChildRegistry;
use crate::migrations::Migrator;
use crate::store::Store;
use crate::types::{ActivityInput, ChildInput};

/// A store in a fresh temp dir with every shipped migration applied.
///
/// Keep the `TempDir` alive for as long as the store is used.
pub(crate) fn migrated_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Store::open(dir.path().join("therapy.db")).expect("open store");
    Migrator::shipped(&store).apply().expect("apply migrations");
    (dir, store)
}

pub(crate) fn create_child(store: &Store, name: &str) -> i64 {
    ChildRegistry::new(store.clone())
        .create_child(&ChildInput {
            name: name.to_string(),
            ..ChildInput::default()
        })
        .expect("create child")
        .id
}

pub(crate) fn create_activity(store: &Store, name: &str) -> i64 {
    ActivityCatalog::new(store.clone())
        .create_activity(&ActivityInput {
            name: name.to_string(),
            default_duration_minutes: 30,
            ..ActivityInput::default()
        })
        .expect("create activity")
        .id
}

/// A fixed instant on 2026-01-31 (UTC).
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 31, hour, minute, 0)
        .single()
        .expect("valid time")
}
