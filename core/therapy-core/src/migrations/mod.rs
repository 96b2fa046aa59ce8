//! Versioned schema ledger.
//!
//! Steps are static data applied in declaration order. Each application runs
//! the forward SQL and records the version in `schema_migrations` inside one
//! SQLite transaction, so a failed step leaves neither schema changes nor a
//! ledger row behind. Re-running the same step list is a no-op.
//!
//! Rolling back a version that later versions build on is not guarded; roll
//! back newest-first.

mod steps;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, StorageContext, TherapyError};
use crate::store::{format_timestamp, timestamp_column, Store};

pub use steps::MIGRATIONS;

const LEDGER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
";

/// A named schema change with its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStep {
    /// Sort key; later steps must compare greater.
    pub version: &'static str,
    pub description: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applies and rolls back a fixed step table against one store.
pub struct Migrator<'a> {
    store: &'a Store,
    steps: &'a [MigrationStep],
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a Store, steps: &'a [MigrationStep]) -> Self {
        Self { store, steps }
    }

    /// Migrator over the shipped [`MIGRATIONS`].
    pub fn shipped(store: &'a Store) -> Self {
        Self::new(store, MIGRATIONS)
    }

    pub fn apply(&self) -> Result<MigrationReport> {
        self.apply_at(Utc::now())
    }

    pub fn apply_at(&self, now: DateTime<Utc>) -> Result<MigrationReport> {
        check_order(self.steps)?;

        self.store.with_connection(|conn| {
            ensure_ledger(conn)?;

            let mut report = MigrationReport::default();
            for step in self.steps {
                let tx = conn
                    .transaction()
                    .storage("Failed to begin migration transaction")?;

                if ledger_has(&tx, step.version)? {
                    debug!(version = step.version, "Migration already applied, skipping");
                    report.skipped.push(step.version.to_string());
                    continue;
                }

                info!(
                    version = step.version,
                    description = step.description,
                    "Running migration"
                );
                tx.execute_batch(step.up)
                    .map_err(|source| TherapyError::MigrationFailed {
                        version: step.version.to_string(),
                        source,
                    })?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, description, applied_at) \
                     VALUES (?1, ?2, ?3)",
                    params![step.version, step.description, format_timestamp(now)],
                )
                .map_err(|source| TherapyError::MigrationFailed {
                    version: step.version.to_string(),
                    source,
                })?;
                tx.commit().map_err(|source| TherapyError::MigrationFailed {
                    version: step.version.to_string(),
                    source,
                })?;

                info!(version = step.version, "Migration completed");
                report.applied.push(step.version.to_string());
            }

            Ok(report)
        })
    }

    /// Reverts a single applied version and removes its ledger entry.
    pub fn rollback(&self, version: &str) -> Result<LedgerEntry> {
        let step = self
            .steps
            .iter()
            .find(|step| step.version == version)
            .ok_or_else(|| TherapyError::UnknownMigration(version.to_string()))?;

        self.store.with_connection(|conn| {
            ensure_ledger(conn)?;
            let tx = conn
                .transaction()
                .storage("Failed to begin rollback transaction")?;

            let entry = ledger_entry(&tx, version)?
                .ok_or_else(|| TherapyError::MigrationNotApplied(version.to_string()))?;

            info!(
                version = step.version,
                description = step.description,
                "Rolling back migration"
            );
            tx.execute_batch(step.down)
                .map_err(|source| TherapyError::MigrationFailed {
                    version: step.version.to_string(),
                    source,
                })?;
            tx.execute(
                "DELETE FROM schema_migrations WHERE version = ?1",
                params![version],
            )
            .storage("Failed to remove migration record")?;
            tx.commit()
                .storage("Failed to commit rollback transaction")?;

            info!(version = step.version, "Migration rolled back");
            Ok(entry)
        })
    }

    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let entries = self.entries()?;
        Ok(self
            .steps
            .iter()
            .map(|step| MigrationStatus {
                version: step.version.to_string(),
                description: step.description.to_string(),
                applied_at: entries
                    .iter()
                    .find(|entry| entry.version == step.version)
                    .map(|entry| entry.applied_at),
            })
            .collect())
    }

    pub fn pending(&self) -> Result<Vec<&'a MigrationStep>> {
        let entries = self.entries()?;
        Ok(self
            .steps
            .iter()
            .filter(|step| !entries.iter().any(|entry| entry.version == step.version))
            .collect())
    }

    /// Every ledger row, including versions this step table does not know.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.with_connection(|conn| {
            ensure_ledger(conn)?;
            let mut stmt = conn
                .prepare(
                    "SELECT version, description, applied_at FROM schema_migrations \
                     ORDER BY version ASC",
                )
                .storage("Failed to prepare ledger query")?;
            let rows = stmt
                .query_map([], ledger_from_row)
                .storage("Failed to query ledger")?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.storage("Failed to decode ledger row")?);
            }
            Ok(entries)
        })
    }
}

fn check_order(steps: &[MigrationStep]) -> Result<()> {
    for pair in steps.windows(2) {
        if pair[0].version >= pair[1].version {
            return Err(TherapyError::MigrationOrder {
                previous: pair[0].version.to_string(),
                next: pair[1].version.to_string(),
            });
        }
    }
    Ok(())
}

fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(LEDGER_SCHEMA)
        .storage("Failed to create migrations table")
}

fn ledger_has(conn: &Connection, version: &str) -> Result<bool> {
    Ok(ledger_entry(conn, version)?.is_some())
}

fn ledger_entry(conn: &Connection, version: &str) -> Result<Option<LedgerEntry>> {
    conn.query_row(
        "SELECT version, description, applied_at FROM schema_migrations WHERE version = ?1",
        params![version],
        ledger_from_row,
    )
    .optional()
    .storage("Failed to query migration ledger")
}

fn ledger_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        version: row.get(0)?,
        description: row.get(1)?,
        applied_at: timestamp_column(row, 2)?,
    })
}
