//! Store bring-up: open, migrate, seed.
//!
//! Lifecycle components must only be built from a store returned here, so the
//! schema is always current before the first session or activity write.

use tracing::info;

use crate::catalog::ActivityCatalog;
use crate::config::TherapyConfig;
use crate::error::Result;
use crate::migrations::Migrator;
use crate::store::Store;

pub fn initialize(config: &TherapyConfig) -> Result<Store> {
    let path = config.database_path()?;
    let store = Store::open(&path)?;

    let report = Migrator::shipped(&store).apply()?;
    info!(
        path = %path.display(),
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "Database schema ready"
    );

    if config.seed_defaults {
        ActivityCatalog::new(store.clone()).seed_defaults()?;
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::migrations::MIGRATIONS;

    fn config_in(dir: &tempfile::TempDir, seed_defaults: bool) -> TherapyConfig {
        TherapyConfig {
            database: DatabaseConfig {
                path: Some(dir.path().join("data").join("therapy.db")),
            },
            seed_defaults,
            ..TherapyConfig::default()
        }
    }

    #[test]
    fn initializes_schema_and_seeds_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = config_in(&dir, true);

        let store = initialize(&config).expect("initialize");
        let status = Migrator::shipped(&store).status().expect("status");
        assert_eq!(status.len(), MIGRATIONS.len());
        assert!(status.iter().all(|step| step.is_applied()));

        let catalog = ActivityCatalog::new(store.clone());
        let seeded = catalog.list_activities().expect("list").len();
        assert!(seeded > 0);

        // A second start is a no-op for both schema and catalog.
        let store = initialize(&config).expect("initialize again");
        assert_eq!(
            ActivityCatalog::new(store).list_activities().unwrap().len(),
            seeded
        );
    }

    #[test]
    fn seeding_can_be_disabled() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = initialize(&config_in(&dir, false)).expect("initialize");
        assert!(ActivityCatalog::new(store)
            .list_activities()
            .unwrap()
            .is_empty());
    }
}
