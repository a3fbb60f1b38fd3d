//! Core types for the nested to-do list.

use crate::recurrence::{Recurrence, RecurrenceUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Task priority. Closed set, ordered Low < Medium < High.
///
/// Serialized as `"Low"`/`"Medium"`/`"High"`; accepted in any case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// String form stored in the database and shown in the UI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    /// Parse a priority, case-insensitively. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Priority::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown priority '{}', expected Low, Medium or High",
                raw
            ))
        })
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub priority: Priority,
    pub is_completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub is_recurring: bool,
    pub recurring_interval: Option<i32>,
    pub recurring_unit: Option<RecurrenceUnit>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The recurrence rule, if the task repeats and the rule is complete.
    pub fn recurrence(&self) -> Option<Recurrence> {
        if !self.is_recurring {
            return None;
        }
        match (self.recurring_interval, self.recurring_unit) {
            (Some(interval), Some(unit)) if interval > 0 => Some(Recurrence::new(interval, unit)),
            _ => None,
        }
    }
}

/// A task with its ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

impl TaskTree {
    /// A leaf node for the given record.
    pub fn leaf(task: Task) -> Self {
        Self {
            task,
            children: Vec::new(),
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

impl NewTask {
    /// A root-level task with default priority and no schedule.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }
}

/// Task counts shown in the page header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: i64,
    pub completed: i64,
}
