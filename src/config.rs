//! Fitsync configuration.
//!
//! Loaded from `~/.fitsync/config.toml` unless `--config` points elsewhere.
//! Every key is optional; a missing default file means default settings.
//!
//! ```toml
//! time-zone = "America/Toronto"
//! window-days = 5
//!
//! [databases.steps.schema]
//! "Activity Type" = "title"
//! "Date" = "date"
//! "Total Steps" = "number"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};

use crate::kind::Settings;
use crate::model::{PropertyType, Schema};
use crate::reconcile::ReconcilerOptions;
use crate::storage::Storage;

/// Fitsync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// The SQLite store. Defaults to `~/.fitsync/store.sqlite`.
    pub store: Option<PathBuf>,

    /// IANA zone for local dates and times. Defaults to the system zone.
    pub time_zone: Option<String>,

    /// Days covered by a sync when no range is given.
    pub window_days: u32,

    /// Whether the default window ends today rather than yesterday.
    pub include_today: bool,

    /// Pause between keys, in milliseconds.
    pub key_delay_ms: u64,

    /// Documents per query page.
    pub page_size: usize,

    /// Date properties that carry a key's date, in lookup order.
    pub preferred_date_fields: Vec<String>,

    /// Date property stamped on every write. Empty disables it.
    pub synced_at_field: String,

    pub sleep_goal_hours: f64,

    /// Declared schemas, by database name.
    pub databases: BTreeMap<String, DatabaseConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// Property name to type. Declared into the store before each sync.
    #[serde(default)]
    pub schema: BTreeMap<String, PropertyType>,
}

impl Default for Config {
    fn default() -> Self {
        let options = ReconcilerOptions::default();
        Self {
            store: None,
            time_zone: None,
            window_days: 5,
            include_today: true,
            key_delay_ms: 50,
            page_size: 100,
            preferred_date_fields: options.preferred_date_fields,
            synced_at_field: options.synced_at_field.unwrap_or_default(),
            sleep_goal_hours: 8.0,
            databases: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load config from `path`, or from `~/.fitsync/config.toml`.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (
                Self::path().ok_or("could not determine home directory")?,
                false,
            ),
        };

        if !path.exists() {
            if explicit {
                return Err(format!("no config file found at {}", path.display()));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| format!("invalid config at {}: {e}", path.display()))?;

        if config.window_days == 0 {
            return Err(format!(
                "window-days must be at least 1 in {}",
                path.display()
            ));
        }
        if config.page_size == 0 {
            return Err(format!("page-size must be at least 1 in {}", path.display()));
        }

        Ok(config)
    }

    /// The config file path: `~/.fitsync/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fitsync").join("config.toml"))
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.store.clone().or_else(Storage::default_path)
    }

    pub fn time_zone(&self) -> Result<TimeZone, String> {
        match self.time_zone.as_deref() {
            Some("UTC") => Ok(TimeZone::UTC),
            Some(name) => {
                TimeZone::get(name).map_err(|e| format!("unknown time-zone {name:?}: {e}"))
            }
            None => Ok(TimeZone::system()),
        }
    }

    pub fn settings(&self) -> Result<Settings, String> {
        Ok(Settings {
            time_zone: self.time_zone()?,
            sleep_goal_hours: self.sleep_goal_hours,
        })
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            preferred_date_fields: self.preferred_date_fields.clone(),
            synced_at_field: Some(self.synced_at_field.clone()).filter(|f| !f.is_empty()),
        }
    }

    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    /// The configured schema of `database`, if one is declared.
    pub fn schema(&self, database: &str) -> Option<Schema> {
        let declared = self.databases.get(database)?;
        if declared.schema.is_empty() {
            return None;
        }
        Some(
            declared
                .schema
                .iter()
                .map(|(name, ty)| (name.clone(), *ty))
                .collect(),
        )
    }
}
