//! Recurrence rules for repeating tasks.
//!
//! A rule is an interval and a unit. The UI offers presets (`daily`,
//! `weekly`, `monthly`); the API also accepts arbitrary intervals.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of a recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    Day,
    Week,
    Month,
}

impl RecurrenceUnit {
    /// String form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceUnit::Day => "day",
            RecurrenceUnit::Week => "week",
            RecurrenceUnit::Month => "month",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(RecurrenceUnit::Day),
            "week" => Some(RecurrenceUnit::Week),
            "month" => Some(RecurrenceUnit::Month),
            _ => None,
        }
    }
}

impl fmt::Display for RecurrenceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat every `interval` `unit`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval: i32,
    pub unit: RecurrenceUnit,
}

impl Recurrence {
    pub fn new(interval: i32, unit: RecurrenceUnit) -> Self {
        Self { interval, unit }
    }

    /// Map a UI preset to a rule. `"none"` maps to `Ok(None)`.
    pub fn from_preset(preset: &str) -> Result<Option<Self>, String> {
        match preset.trim().to_lowercase().as_str() {
            "" | "none" => Ok(None),
            "daily" => Ok(Some(Self::new(1, RecurrenceUnit::Day))),
            "weekly" => Ok(Some(Self::new(1, RecurrenceUnit::Week))),
            "monthly" => Ok(Some(Self::new(1, RecurrenceUnit::Month))),
            other => Err(format!(
                "Unknown repeat option '{}'. Expected none, daily, weekly or monthly",
                other
            )),
        }
    }

    /// The preset name for this rule, if it matches one.
    pub fn preset(&self) -> Option<&'static str> {
        match (self.interval, self.unit) {
            (1, RecurrenceUnit::Day) => Some("daily"),
            (1, RecurrenceUnit::Week) => Some("weekly"),
            (1, RecurrenceUnit::Month) => Some("monthly"),
            _ => None,
        }
    }

    /// The next occurrence strictly after `from`.
    ///
    /// Month steps clamp to the last day of shorter months (Jan 31 + 1 month
    /// is Feb 28/29). Returns `None` for non-positive intervals or when the
    /// result is out of range.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.interval <= 0 {
            return None;
        }
        let n = self.interval as i64;
        match self.unit {
            RecurrenceUnit::Day => from.checked_add_signed(Duration::try_days(n)?),
            RecurrenceUnit::Week => from.checked_add_signed(Duration::try_weeks(n)?),
            RecurrenceUnit::Month => from.checked_add_months(Months::new(self.interval as u32)),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.preset() {
            Some(name) => f.write_str(name),
            None => write!(f, "every {} {}s", self.interval, self.unit),
        }
    }
}
