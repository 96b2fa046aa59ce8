//! Error types for therapy-core operations.
//!
//! Lifecycle callers mostly care about the coarse [`ErrorKind`]: a rejection
//! (`NotFound`, `Conflict`, `Validation`) is an answer, a `Storage` or
//! `Migration` error is a fault.

use std::path::PathBuf;

/// All errors that can occur in therapy-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TherapyError {
    // ─────────────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Conflicts
    // ─────────────────────────────────────────────────────────────────────
    #[error("Child {child_id} already has an open session{}", open_session_suffix(.session_id))]
    SessionAlreadyOpen {
        child_id: i64,
        session_id: Option<i64>,
    },

    #[error("Session already ended: {0}")]
    SessionAlreadyEnded(i64),

    #[error("Session is closed: {0}")]
    SessionClosed(i64),

    #[error("Activity instance already ended: {0}")]
    ActivityAlreadyEnded(i64),

    #[error("Activity name already in use: {0}")]
    DuplicateActivityName(String),

    // ─────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Migration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Migration not found: {0}")]
    UnknownMigration(String),

    #[error("Migration was not applied: {0}")]
    MigrationNotApplied(String),

    #[error("Migration versions out of order: {previous} must sort before {next}")]
    MigrationOrder { previous: String, next: String },

    #[error("Migration {version} failed: {source}")]
    MigrationFailed {
        version: String,
        #[source]
        source: rusqlite::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Storage / I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },
}

/// Coarse classification used by callers deciding how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Migration,
    Storage,
}

impl TherapyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TherapyError::NotFound { .. } => ErrorKind::NotFound,
            TherapyError::SessionAlreadyOpen { .. }
            | TherapyError::SessionAlreadyEnded(_)
            | TherapyError::SessionClosed(_)
            | TherapyError::ActivityAlreadyEnded(_)
            | TherapyError::DuplicateActivityName(_) => ErrorKind::Conflict,
            TherapyError::Validation { .. } => ErrorKind::Validation,
            TherapyError::UnknownMigration(_)
            | TherapyError::MigrationNotApplied(_)
            | TherapyError::MigrationOrder { .. }
            | TherapyError::MigrationFailed { .. } => ErrorKind::Migration,
            TherapyError::Storage { .. }
            | TherapyError::Io { .. }
            | TherapyError::ConfigMalformed { .. } => ErrorKind::Storage,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        TherapyError::NotFound { entity, id }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TherapyError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

fn open_session_suffix(session_id: &Option<i64>) -> String {
    match session_id {
        Some(id) => format!(" ({})", id),
        None => String::new(),
    }
}

/// Convenience type alias for Results using TherapyError.
pub type Result<T> = std::result::Result<T, TherapyError>;

// Conversion for UI shells whose commands return Result<T, String>
impl From<TherapyError> for String {
    fn from(err: TherapyError) -> String {
        err.to_string()
    }
}

/// Attaches context to raw SQLite errors.
pub(crate) trait StorageContext<T> {
    fn storage(self, context: &str) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn storage(self, context: &str) -> Result<T> {
        self.map_err(|source| TherapyError::Storage {
            context: context.to_string(),
            source,
        })
    }
}

/// True when SQLite rejected a write because of a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => {
            inner.code == rusqlite::ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}
