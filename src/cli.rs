//! CLI interface for fitsync.
//!
//! Each subcommand is non-interactive: arguments in, a short summary out.
//!
//! - `fitsync sync <kind> --input <export.json>` reconciles one kind of
//!   telemetry into its database.
//! - `fitsync schema [database]` prints a declared schema.
//! - `fitsync show <database> <date>` lists the live documents for a day.

mod format;
mod sync;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use jiff::civil::Date;

use crate::config::Config;
use crate::model::NaturalKey;
use crate::reconcile::Reconciler;
use crate::storage::Storage;

use format::format_document;
use sync::SyncCommand;

/// Fitsync: keep fitness telemetry in sync with a document store.
#[derive(Debug, Parser)]
#[command(name = "fitsync", after_long_help = EXAMPLES_HELP)]
pub struct Cli {
    /// Config file (defaults to `~/.fitsync/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const EXAMPLES_HELP: &str = r"Examples:
  fitsync sync steps --input steps.json --days 7
  fitsync sync activities --input activities.json --from 2024-05-01 --to 2024-05-31
  fitsync sync personal-records --input records.json
  fitsync sync daily --activities activities.json --steps steps.json --sleep sleep.json
  fitsync schema steps
  fitsync show daily 2024-05-01";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile exported records into their database.
    ///
    /// Re-running with the same input changes nothing.
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    /// Print the declared schema of a database, or list databases.
    Schema {
        /// Database name (e.g. `steps`).
        database: Option<String>,
    },

    /// List the live documents of a database for one day.
    Show {
        /// Database name (e.g. `daily`).
        database: String,

        /// Day to look up (`YYYY-MM-DD`).
        date: Date,
    },
}

/// Run the CLI, returning an error message on failure.
pub fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let storage = open_storage(&config)?;

    match cli.command {
        Command::Sync { command } => sync::cmd_sync(&config, &storage, &command),
        Command::Schema { database } => cmd_schema(&storage, database.as_deref()),
        Command::Show { database, date } => cmd_show(&config, &storage, &database, date),
    }
}

fn open_storage(config: &Config) -> Result<Storage, String> {
    let path = config
        .store_path()
        .ok_or("could not determine home directory")?;
    open_at(&path, config.page_size)
}

fn open_at(path: &Path, page_size: usize) -> Result<Storage, String> {
    Storage::open(path)
        .map(|s| s.with_page_size(page_size))
        .map_err(|e| format!("failed to open store at {}: {e}", path.display()))
}

fn cmd_schema(storage: &Storage, database: Option<&str>) -> Result<(), String> {
    let Some(database) = database else {
        let databases = storage
            .list_databases()
            .map_err(|e| format!("failed to list databases: {e}"))?;
        if databases.is_empty() {
            println!("No databases");
        }
        for name in databases {
            println!("{name}");
        }
        return Ok(());
    };

    let schema = storage
        .load_schema(database)
        .map_err(|e| format!("failed to load schema of {database}: {e}"))?;
    if schema.is_empty() {
        println!("No schema declared for {database}");
        return Ok(());
    }

    let width = schema.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, ty) in schema.iter() {
        println!("{name:<width$}  {ty}");
    }
    Ok(())
}

fn cmd_show(config: &Config, storage: &Storage, database: &str, date: Date) -> Result<(), String> {
    let db = storage.database(database);
    let reconciler = Reconciler::begin_run(&db, config.reconciler_options())
        .map_err(|e| e.to_string())?;
    if reconciler.schema().is_empty() {
        return Err(format!("no schema declared for {database}"));
    }

    let documents = reconciler
        .lookup(&NaturalKey::date(date))
        .map_err(|e| e.to_string())?;
    if documents.is_empty() {
        println!("No documents for {date}");
        return Ok(());
    }

    for document in &documents {
        println!("{}", format_document(document));
    }
    Ok(())
}
