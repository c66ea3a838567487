use std::{collections::BTreeMap, fmt::Display, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::gitlab::RequestOptions;

pub const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Everything the cleaner needs to know about the run. Read-only once built.
#[derive(Debug, Clone)]
pub struct Settings {
    pub registry_url: Url,
    pub token: String,
    pub config_path: PathBuf,
    pub dry_run: bool,
    pub trust_store: Option<PathBuf>,
    pub insecure: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Settings {
    /// Options every registry call starts from.
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions::default()
            .with_timeout(self.timeout)
            .with_max_retries(self.max_retries)
            .with_header(TOKEN_HEADER, self.token.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionUnit {
    Days,
    Hours,
    Minutes,
}

impl RetentionUnit {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "days" => Some(Self::Days),
            "hours" => Some(Self::Hours),
            "minutes" => Some(Self::Minutes),
            _ => None,
        }
    }
}

impl Display for RetentionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days => f.write_str("days"),
            Self::Hours => f.write_str("hours"),
            Self::Minutes => f.write_str("minutes"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionError {
    #[error("no retention unit given, expected one of days, hours or minutes")]
    Empty,
    #[error("exactly one retention unit is allowed, got {0}")]
    MultipleUnits(String),
    #[error("unsupported retention unit {0:?}, expected one of days, hours or minutes")]
    UnsupportedUnit(String),
    #[error("retention must not be negative, got {0}")]
    Negative(i64),
    #[error("retention of {0} {1} is out of range")]
    OutOfRange(i64, RetentionUnit),
}

/// How long a tag is kept: exactly one of days, hours or minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>")]
pub struct Retention {
    unit: RetentionUnit,
    value: i64,
    duration: chrono::Duration,
}

impl Retention {
    pub fn new(unit: RetentionUnit, value: i64) -> Result<Self, RetentionError> {
        if value < 0 {
            return Err(RetentionError::Negative(value));
        }
        let duration = match unit {
            RetentionUnit::Days => chrono::Duration::try_days(value),
            RetentionUnit::Hours => chrono::Duration::try_hours(value),
            RetentionUnit::Minutes => chrono::Duration::try_minutes(value),
        }
        .ok_or(RetentionError::OutOfRange(value, unit))?;

        Ok(Self {
            unit,
            value,
            duration,
        })
    }

    #[cfg(test)]
    pub fn days(value: i64) -> Result<Self, RetentionError> {
        Self::new(RetentionUnit::Days, value)
    }

    #[cfg(test)]
    pub fn hours(value: i64) -> Result<Self, RetentionError> {
        Self::new(RetentionUnit::Hours, value)
    }

    #[cfg(test)]
    pub fn minutes(value: i64) -> Result<Self, RetentionError> {
        Self::new(RetentionUnit::Minutes, value)
    }

    pub fn as_duration(&self) -> chrono::Duration {
        self.duration
    }
}

impl TryFrom<BTreeMap<String, i64>> for Retention {
    type Error = RetentionError;

    fn try_from(units: BTreeMap<String, i64>) -> Result<Self, Self::Error> {
        let mut entries = units.into_iter();
        let (key, value) = match (entries.next(), entries.next()) {
            (None, _) => return Err(RetentionError::Empty),
            (Some(entry), None) => entry,
            (Some((first, _)), Some((second, _))) => {
                let mut keys = vec![first, second];
                keys.extend(entries.map(|(key, _)| key));
                return Err(RetentionError::MultipleUnits(keys.join(", ")));
            }
        };

        let unit = RetentionUnit::parse(&key).ok_or(RetentionError::UnsupportedUnit(key))?;
        Self::new(unit, value)
    }
}

impl Display for Retention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSpec {
    pub name: String,
    pub id: u64,
    pub retention: Retention,
}

#[derive(Deserialize)]
struct ProjectEntry {
    id: u64,
    delete_older_than: Retention,
}

/// Parses a retention file. Projects come back ordered by name.
pub fn parse_projects(json: &str) -> Result<Vec<ProjectSpec>> {
    let entries: BTreeMap<String, ProjectEntry> =
        serde_json::from_str(json).context("Invalid retention config")?;

    Ok(entries
        .into_iter()
        .map(|(name, entry)| ProjectSpec {
            name,
            id: entry.id,
            retention: entry.delete_older_than,
        })
        .collect())
}

pub async fn load_projects(path: &Path) -> Result<Vec<ProjectSpec>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read retention config from {}", path.display()))?;
    parse_projects(&json).context(format!("Failed to load {}", path.display()))
}
