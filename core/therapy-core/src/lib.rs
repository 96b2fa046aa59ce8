//! # therapy-core
//!
//! Persistence lifecycle layer for child-therapy session records.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Every call opens its own
//!   SQLite connection and blocks until done.
//! - **Schema first**: [`startup::initialize`] applies the migration ledger
//!   before any lifecycle component is built.
//! - **At most one open session per child**: checked inside an IMMEDIATE
//!   transaction and backed by a partial unique index.
//! - **Terminal ends**: an end time, once written, is never replaced.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use therapy_core::{initialize, load_config, ActivityTracker, SessionLifecycle};
//!
//! let store = initialize(&load_config(None)?)?;
//! let sessions = SessionLifecycle::new(store.clone());
//! let session = sessions.start_session(child_id)?;
//! let tracker = ActivityTracker::new(store);
//! tracker.start_activity(session.id, activity_id, "")?;
//! ```

pub mod activities;
pub mod catalog;
pub mod children;
pub mod config;
pub mod error;
pub mod events;
pub mod migrations;
pub mod sessions;
pub mod startup;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use activities::{auto_close_marker, ActivityTracker};
pub use catalog::{ActivityCatalog, DEFAULT_ACTIVITIES};
pub use children::ChildRegistry;
pub use config::{load_config, AutoCloseConfig, DatabaseConfig, TherapyConfig};
pub use error::{ErrorKind, Result, TherapyError};
pub use events::{ChangeEvent, ChangeKind};
pub use migrations::{
    LedgerEntry, MigrationReport, MigrationStatus, MigrationStep, Migrator, MIGRATIONS,
};
pub use sessions::{duration_minutes, SessionLifecycle};
pub use startup::initialize;
pub use store::Store;
pub use types::*;
