//! `fitsync sync`: reconcile exported records into their database.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use jiff::civil::Date;
use jiff::{ToSpan, Zoned};

use crate::config::Config;
use crate::kind::{
    Activities, DailyInputs, DailyRollup, PersonalRecords, RecordKind, Settings, Sleep, Steps,
    calendar_day,
};
use crate::model::{DayRange, Record};
use crate::reconcile::{Reconciler, WriteMode};
use crate::source::{JsonExport, SourceProvider};
use crate::storage::Storage;
use crate::sync::{SyncOptions, sync_kind};

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Daily step totals, one row per day.
    Steps(SourceArgs),

    /// Nightly sleep summaries, one row per night.
    Sleep(SourceArgs),

    /// Individual activities, one row per day, type, and name.
    Activities(SourceArgs),

    /// Personal records, one live row per record type.
    ///
    /// Without a range, every record in the export is considered.
    PersonalRecords(SourceArgs),

    /// The daily rollup combining activities, steps, sleep, and wellness.
    Daily(DailyArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// JSON export to read records from.
    #[arg(long)]
    input: PathBuf,

    #[command(flatten)]
    range: RangeArgs,

    /// Leave fields missing from the input untouched instead of clearing them.
    #[arg(long)]
    patch: bool,
}

#[derive(Debug, Args)]
pub struct DailyArgs {
    /// Activities export.
    #[arg(
        long,
        required_unless_present_any = ["steps", "sleep", "wellness", "intensity", "hrv", "weight"]
    )]
    activities: Option<PathBuf>,

    /// Steps export.
    #[arg(long)]
    steps: Option<PathBuf>,

    /// Sleep export.
    #[arg(long)]
    sleep: Option<PathBuf>,

    /// Daily stress and body battery export.
    #[arg(long)]
    wellness: Option<PathBuf>,

    /// Daily intensity minutes export.
    #[arg(long)]
    intensity: Option<PathBuf>,

    /// Nightly HRV export.
    #[arg(long)]
    hrv: Option<PathBuf>,

    /// Weigh-in export.
    #[arg(long)]
    weight: Option<PathBuf>,

    #[command(flatten)]
    range: RangeArgs,

    /// Leave fields missing from the input untouched instead of clearing them.
    #[arg(long)]
    patch: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RangeArgs {
    /// Number of days ending today (or yesterday, per config).
    #[arg(long, conflicts_with_all = ["from", "to"])]
    days: Option<u32>,

    /// First day of an explicit range (`YYYY-MM-DD`).
    #[arg(long, requires = "to")]
    from: Option<Date>,

    /// Last day of an explicit range (`YYYY-MM-DD`).
    #[arg(long, requires = "from")]
    to: Option<Date>,
}

/// How a range is filled in when none is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultRange {
    /// The configured window ending on the last included day.
    Window,
    /// Everything up to the last included day.
    AllTime,
}

impl RangeArgs {
    fn resolve(&self, config: &Config, today: Date, default: DefaultRange) -> Result<DayRange, String> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            return DayRange::new(from, to).ok_or_else(|| format!("--from {from} is after --to {to}"));
        }

        let end = if config.include_today {
            today
        } else {
            today
                .checked_sub(1.day())
                .map_err(|e| format!("failed to compute yesterday: {e}"))?
        };

        match (self.days, default) {
            (Some(days), _) => Ok(DayRange::ending_on(end, days)),
            (None, DefaultRange::Window) => Ok(DayRange::ending_on(end, config.window_days)),
            (None, DefaultRange::AllTime) => DayRange::new(Date::MIN, end)
                .ok_or_else(|| format!("invalid range ending {end}")),
        }
    }
}

pub(super) fn cmd_sync(config: &Config, storage: &Storage, command: &SyncCommand) -> Result<(), String> {
    let settings = config.settings()?;
    let today = Zoned::now().with_time_zone(settings.time_zone.clone()).date();

    match command {
        SyncCommand::Steps(args) => {
            sync_export(config, storage, &Steps, args, today, DefaultRange::Window)
        }
        SyncCommand::Sleep(args) => sync_export(
            config,
            storage,
            &Sleep::new(settings),
            args,
            today,
            DefaultRange::Window,
        ),
        SyncCommand::Activities(args) => sync_export(
            config,
            storage,
            &Activities::new(settings),
            args,
            today,
            DefaultRange::Window,
        ),
        SyncCommand::PersonalRecords(args) => sync_export(
            config,
            storage,
            &PersonalRecords,
            args,
            today,
            DefaultRange::AllTime,
        ),
        SyncCommand::Daily(args) => sync_daily(config, storage, settings, args, today),
    }
}

fn sync_export<K: RecordKind>(
    config: &Config,
    storage: &Storage,
    kind: &K,
    args: &SourceArgs,
    today: Date,
    default: DefaultRange,
) -> Result<(), String> {
    let range = args.range.resolve(config, today, default)?;
    let source = JsonExport::new(&args.input, |r: &Record| kind.day_of(r));
    sync_into(config, storage, kind, &source, &range, args.patch)
}

fn sync_daily(
    config: &Config,
    storage: &Storage,
    settings: Settings,
    args: &DailyArgs,
    today: Date,
) -> Result<(), String> {
    let range = args.range.resolve(config, today, DefaultRange::Window)?;

    let activities_kind = Activities::new(settings.clone());
    let sleep_kind = Sleep::new(settings.clone());
    let activities = args
        .activities
        .as_ref()
        .map(|path| JsonExport::new(path, |r: &Record| activities_kind.day_of(r)));
    let steps = args
        .steps
        .as_ref()
        .map(|path| JsonExport::new(path, |r: &Record| Steps.day_of(r)));
    let sleep = args
        .sleep
        .as_ref()
        .map(|path| JsonExport::new(path, |r: &Record| sleep_kind.day_of(r)));

    let daily_export = |path: Option<&PathBuf>| path.map(|path| JsonExport::new(path, calendar_day));
    let wellness = daily_export(args.wellness.as_ref());
    let intensity = daily_export(args.intensity.as_ref());
    let hrv = daily_export(args.hrv.as_ref());
    let weight = daily_export(args.weight.as_ref());

    let inputs = DailyInputs {
        activities: activities.as_ref().map(|s| s as &dyn SourceProvider),
        steps: steps.as_ref().map(|s| s as &dyn SourceProvider),
        sleep: sleep.as_ref().map(|s| s as &dyn SourceProvider),
        wellness: wellness.as_ref().map(|s| s as &dyn SourceProvider),
        intensity: intensity.as_ref().map(|s| s as &dyn SourceProvider),
        hrv: hrv.as_ref().map(|s| s as &dyn SourceProvider),
        weight: weight.as_ref().map(|s| s as &dyn SourceProvider),
        settings: settings.clone(),
    };
    sync_into(
        config,
        storage,
        &DailyRollup::new(settings),
        &inputs,
        &range,
        args.patch,
    )
}

/// Declares the configured schema, then syncs `kind` into its database.
fn sync_into<K: RecordKind, P: SourceProvider + ?Sized>(
    config: &Config,
    storage: &Storage,
    kind: &K,
    source: &P,
    range: &DayRange,
    patch: bool,
) -> Result<(), String> {
    let database = kind.name();
    prepare_schema(config, storage, database)?;

    let db = storage.database(database);
    let reconciler = Reconciler::begin_run(&db, config.reconciler_options())
        .map_err(|e| format!("failed to start {database} sync: {e}"))?;
    let options = SyncOptions {
        mode: patch.then_some(WriteMode::Patch),
        key_delay: config.key_delay(),
    };

    let report = sync_kind(kind, source, &reconciler, range, &options);
    println!("{database} ({range}): {report}");

    if report.has_failures() {
        return Err(format!("{} {database} key(s) failed to sync", report.failed));
    }
    Ok(())
}

/// Declares the configured schema of `database`, if any. A database with
/// neither a configured nor a stored schema cannot be synced.
fn prepare_schema(config: &Config, storage: &Storage, database: &str) -> Result<(), String> {
    if let Some(schema) = config.schema(database) {
        return storage
            .declare_schema(database, &schema)
            .map_err(|e| format!("failed to declare {database} schema: {e}"));
    }

    let stored = storage
        .load_schema(database)
        .map_err(|e| format!("failed to load {database} schema: {e}"))?;
    if stored.is_empty() {
        return Err(format!(
            "no schema for {database}; declare one under [databases.{database}.schema]"
        ));
    }
    Ok(())
}
