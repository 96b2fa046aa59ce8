//! SQLite record store.
//!
//! The store is a cheap, cloneable handle around the database path. Every
//! operation opens its own connection, so components can share the store
//! freely without holding a connection across calls.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageContext, TherapyError};

const BUSY_TIMEOUT_MS: i64 = 5000;

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// This does not touch the schema; run the migration ledger before handing
    /// the store to lifecycle components.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        store.with_connection(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")
                .storage("Failed to enable WAL")
        })?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs arbitrary SQL (index or pragma setup, admin fixes).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(sql)
                .storage("Failed to execute raw statement")
        })
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.sqlite_master_names("table")
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        self.sqlite_master_names("index")
    }

    fn sqlite_master_names(&self, kind: &str) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
                .storage("Failed to query sqlite_master")?;
            let rows = stmt
                .query_map([kind], |row| row.get::<_, String>(0))
                .storage("Failed to read sqlite_master rows")?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row.storage("Failed to decode sqlite_master row")?);
            }
            Ok(names)
        })
    }

    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connect()?;
        op(&mut conn)
    }

    /// Runs `op` inside a transaction, committing only when it returns `Ok`.
    pub(crate) fn with_transaction<T>(
        &self,
        behavior: TransactionBehavior,
        op: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(behavior)
                .storage("Failed to begin transaction")?;
            let value = op(&tx)?;
            tx.commit().storage("Failed to commit transaction")?;
            Ok(value)
        })
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent).map_err(|source| TherapyError::Io {
                    context: "Failed to create data dir".to_string(),
                    source,
                })?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn =
            Connection::open_with_flags(&self.path, flags).storage("Failed to open sqlite db")?;

        // busy_timeout first so the remaining pragmas wait on a locked file.
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .storage("Failed to set busy_timeout")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .storage("Failed to set synchronous")?;
        conn.pragma_update(None, "foreign_keys", true)
            .storage("Failed to enable foreign keys")?;

        Ok(conn)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Column helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-width RFC 3339 (millisecond, `Z` suffix) so text order is time order.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| invalid_column(idx, &raw, "timestamp"))
}

pub(crate) fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| invalid_column(idx, &raw, "timestamp")),
        None => Ok(None),
    }
}

pub(crate) fn optional_date_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| invalid_column(idx, &raw, "date")),
        None => Ok(None),
    }
}

fn invalid_column(idx: usize, raw: &str, expected: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid {}: {}", expected, raw),
        )),
    )
}
