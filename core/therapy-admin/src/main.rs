//! therapy-admin: maintenance commands for the therapy-log database.
//!
//! ## Subcommands
//!
//! - `migrate`: Apply pending schema migrations (and seed the catalog)
//! - `status`: Show every shipped migration and when it was applied
//! - `rollback`: Revert one applied migration
//! - `sweep`: Auto-close activities that have run past the threshold

mod sweep;

use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use therapy_core::{initialize, load_config, Migrator, Store, TherapyConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "therapy-admin")]
#[command(about = "Therapy session database maintenance")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.therapy-log/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,

    /// List migrations and their ledger state
    Status,

    /// Roll back a single applied migration
    Rollback {
        #[arg(value_name = "VERSION")]
        version: String,
    },

    /// Close activity instances running longer than the threshold
    Sweep {
        /// Only sweep this session (default: every open session)
        #[arg(long, value_name = "ID")]
        session: Option<i64>,

        /// Threshold in minutes (default: auto_close.max_duration_minutes)
        #[arg(long, value_name = "N")]
        max_minutes: Option<i64>,

        /// Keep sweeping every auto_close.sweep_interval_secs
        #[arg(long)]
        watch: bool,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "therapy-admin failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = resolve_config(cli.config, cli.database)?;

    match cli.command {
        Commands::Migrate => {
            let store = initialize(&config)?;
            info!(path = %store.path().display(), "Database is up to date");
        }
        Commands::Status => {
            let store = open_store(&config)?;
            for status in Migrator::shipped(&store).status()? {
                let applied = status
                    .applied_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "pending".to_string());
                println!("{}  {}  {}", status.version, applied, status.description);
            }
        }
        Commands::Rollback { version } => {
            let store = open_store(&config)?;
            let entry = Migrator::shipped(&store).rollback(&version)?;
            info!(version = %entry.version, "Rolled back migration");
        }
        Commands::Sweep {
            session,
            max_minutes,
            watch,
        } => {
            let store = initialize(&config)?;
            let options = sweep::SweepOptions {
                session_id: session,
                max_duration_minutes: max_minutes
                    .unwrap_or(config.auto_close.max_duration_minutes),
            };
            if watch {
                sweep::watch(&store, &options, config.auto_close.sweep_interval_secs);
            } else {
                for event in sweep::sweep_once(&store, &options)? {
                    let line = serde_json::to_string(&event).map_err(|err| err.to_string())?;
                    println!("{}", line);
                }
            }
        }
    }

    Ok(())
}

fn resolve_config(
    config_path: Option<PathBuf>,
    database: Option<PathBuf>,
) -> Result<TherapyConfig, String> {
    let mut config = load_config(config_path)?;
    if let Some(path) = database {
        config.database.path = Some(path);
    }
    Ok(config)
}

/// Opens without migrating, so `status` and `rollback` see the ledger as is.
fn open_store(config: &TherapyConfig) -> Result<Store, String> {
    let path = config.database_path()?;
    Ok(Store::open(path)?)
}

fn init_logging() {
    let filter = if debug_log_enabled(env::var("THERAPY_DEBUG_LOG").ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn debug_log_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_accepts_common_truthy_values() {
        assert!(debug_log_enabled(Some("1")));
        assert!(debug_log_enabled(Some("yes")));
        assert!(!debug_log_enabled(Some("0")));
        assert!(!debug_log_enabled(None));
    }

    #[test]
    fn parses_sweep_with_global_database() {
        let cli = Cli::try_parse_from([
            "therapy-admin",
            "sweep",
            "--session",
            "2",
            "--max-minutes",
            "30",
            "--database",
            "/tmp/t.db",
        ])
        .expect("parse");

        assert_eq!(cli.database, Some(PathBuf::from("/tmp/t.db")));
        match cli.command {
            Commands::Sweep {
                session,
                max_minutes,
                watch,
            } => {
                assert_eq!(session, Some(2));
                assert_eq!(max_minutes, Some(30));
                assert!(!watch);
            }
            _ => panic!("expected sweep"),
        }
    }

    #[test]
    fn database_flag_overrides_config() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = temp_dir.path().join("override.db");
        let config = resolve_config(
            Some(temp_dir.path().join("missing.toml")),
            Some(db.clone()),
        )
        .expect("config");
        assert_eq!(config.database_path().unwrap(), db);
    }
}
