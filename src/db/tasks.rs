//! Task CRUD, completion and sibling ordering.

use super::{Database, ms_to_datetime, now_ms};
use crate::error::ApiError;
use crate::recurrence::{Recurrence, RecurrenceUnit};
use crate::tree::{build_task_tree, hide_completed};
use crate::types::{NewTask, Priority, Task, TaskCounts, TaskTree};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, title, parent_id, priority, is_completed, due_date, is_recurring, \
     recurring_interval, recurring_unit, sort_order, created_at, updated_at";

/// Result of toggling completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub task: Task,
    /// Follow-up task created when a recurring task with a due date is completed.
    pub next_occurrence: Option<Task>,
}

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let priority: String = row.get("priority")?;
    let due_date: Option<i64> = row.get("due_date")?;
    let recurring_unit: Option<String> = row.get("recurring_unit")?;
    let created_at: i64 = row.get("created_at")?;
    let updated_at: i64 = row.get("updated_at")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        parent_id: row.get("parent_id")?,
        priority: Priority::parse(&priority).unwrap_or_default(),
        is_completed: row.get("is_completed")?,
        due_date: due_date.map(ms_to_datetime),
        is_recurring: row.get("is_recurring")?,
        recurring_interval: row.get("recurring_interval")?,
        recurring_unit: recurring_unit.as_deref().and_then(RecurrenceUnit::parse),
        sort_order: row.get("sort_order")?,
        created_at: ms_to_datetime(created_at),
        updated_at: ms_to_datetime(updated_at),
    })
}

/// Trimmed, non-empty title.
fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ApiError::missing_field("title").into());
    }
    Ok(trimmed.to_string())
}

fn validate_recurrence(recurrence: Option<Recurrence>) -> Result<Option<Recurrence>> {
    match recurrence {
        Some(rule) if rule.interval < 1 => Err(ApiError::invalid_value(
            "recurrence",
            format!("Recurrence interval must be at least 1, got {}", rule.interval),
        )
        .into()),
        other => Ok(other),
    }
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    let task = conn
        .query_row(&sql, params![task_id], parse_task_row)
        .optional()?;
    Ok(task)
}

fn require_task(conn: &Connection, task_id: &str) -> Result<Task> {
    get_task_internal(conn, task_id)?.ok_or_else(|| ApiError::task_not_found(task_id).into())
}

fn task_exists(conn: &Connection, task_id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Tasks shown at the root level: no parent, or a parent that no longer exists.
const ROOT_LEVEL: &str = "(parent_id IS NULL OR parent_id NOT IN (SELECT id FROM tasks))";

/// Ids of the tasks shown under `parent_id` (the root level for `None`), in
/// sibling order.
fn sibling_ids(conn: &Connection, parent_id: Option<&str>) -> Result<Vec<String>> {
    let order = "ORDER BY sort_order, created_at, id";
    let ids = match parent_id {
        Some(pid) => {
            let sql = format!("SELECT id FROM tasks WHERE parent_id = ?1 {}", order);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![pid], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?
        }
        None => {
            let sql = format!("SELECT id FROM tasks WHERE {} {}", ROOT_LEVEL, order);
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?
        }
    };
    Ok(ids)
}

/// Sort order placing a new task after its existing siblings. A dangling
/// `parent_id` places the task among the root-level tasks.
fn next_sort_order(conn: &Connection, parent_id: Option<&str>) -> Result<i64> {
    let next: i64 = match parent_id {
        Some(pid) if task_exists(conn, pid)? => conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks WHERE parent_id = ?1",
            params![pid],
            |row| row.get(0),
        )?,
        _ => conn.query_row(
            &format!(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM tasks WHERE {}",
                ROOT_LEVEL
            ),
            [],
            |row| row.get(0),
        )?,
    };
    Ok(next)
}

/// Validated fields for a new row.
struct TaskFields<'a> {
    title: &'a str,
    parent_id: Option<&'a str>,
    priority: Priority,
    due_date: Option<DateTime<Utc>>,
    recurrence: Option<Recurrence>,
}

fn insert_task_internal(conn: &Connection, fields: TaskFields<'_>) -> Result<Task> {
    let task_id = Uuid::now_v7().to_string();
    let now = now_ms();
    let sort_order = next_sort_order(conn, fields.parent_id)?;

    conn.execute(
        "INSERT INTO tasks (
            id, title, parent_id, priority, is_completed, due_date,
            is_recurring, recurring_interval, recurring_unit, sort_order, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            &task_id,
            fields.title,
            fields.parent_id,
            fields.priority.as_str(),
            fields.due_date.map(|d| d.timestamp_millis()),
            fields.recurrence.is_some(),
            fields.recurrence.map(|r| r.interval),
            fields.recurrence.map(|r| r.unit.as_str()),
            sort_order,
            now,
        ],
    )?;

    require_task(conn, &task_id)
}

/// Changes applied by [`Database::update_task`]. `None` leaves a field alone;
/// `Some(None)` clears a due date or recurrence rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Option<Recurrence>>,
    pub is_completed: Option<bool>,
}

impl TaskUpdate {
    fn touches_details(&self) -> bool {
        self.title.is_some() || self.priority.is_some()
    }

    fn touches_schedule(&self) -> bool {
        self.due_date.is_some() || self.recurrence.is_some()
    }
}

fn write_details(conn: &Connection, task_id: &str, title: &str, priority: Priority) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tasks SET title = ?1, priority = ?2, updated_at = ?3 WHERE id = ?4",
        params![title, priority.as_str(), now_ms(), task_id],
    )?;
    if changed == 0 {
        return Err(ApiError::task_not_found(task_id).into());
    }
    Ok(())
}

fn write_schedule(
    conn: &Connection,
    task_id: &str,
    due_date: Option<DateTime<Utc>>,
    recurrence: Option<Recurrence>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE tasks SET due_date = ?1, is_recurring = ?2, recurring_interval = ?3,
             recurring_unit = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            due_date.map(|d| d.timestamp_millis()),
            recurrence.is_some(),
            recurrence.map(|r| r.interval),
            recurrence.map(|r| r.unit.as_str()),
            now_ms(),
            task_id,
        ],
    )?;
    if changed == 0 {
        return Err(ApiError::task_not_found(task_id).into());
    }
    Ok(())
}

/// Whether an earlier completion already spawned an occurrence that still exists.
fn occurrence_already_spawned(conn: &Connection, task_id: &str) -> Result<bool> {
    let spawned: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM tasks t JOIN tasks n ON n.id = t.next_occurrence_id
             WHERE t.id = ?1
         )",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(spawned)
}

/// Set the completion flag. Returns the occurrence spawned by completing a
/// recurring task with a due date, at most once per task.
fn write_completion(conn: &Connection, task_id: &str, completed: bool) -> Result<Option<Task>> {
    let before = require_task(conn, task_id)?;

    conn.execute(
        "UPDATE tasks SET is_completed = ?1, updated_at = ?2 WHERE id = ?3",
        params![completed, now_ms(), task_id],
    )?;

    if !completed || before.is_completed {
        return Ok(None);
    }
    let (Some(rule), Some(due)) = (before.recurrence(), before.due_date) else {
        return Ok(None);
    };
    if occurrence_already_spawned(conn, task_id)? {
        debug!(task_id, "Next occurrence already exists");
        return Ok(None);
    }
    let Some(next_due) = rule.next_after(due) else {
        return Ok(None);
    };

    let next = insert_task_internal(
        conn,
        TaskFields {
            title: &before.title,
            parent_id: before.parent_id.as_deref(),
            priority: before.priority,
            due_date: Some(next_due),
            recurrence: Some(rule),
        },
    )?;
    conn.execute(
        "UPDATE tasks SET next_occurrence_id = ?1 WHERE id = ?2",
        params![&next.id, task_id],
    )?;
    debug!(task_id, next_id = %next.id, due = %next_due, "Scheduled next occurrence");
    Ok(Some(next))
}

impl Database {
    /// All tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC, id DESC",
                TASK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map([], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// The assembled forest, optionally without completed subtrees.
    pub fn task_tree(&self, hide_done: bool) -> Result<Vec<TaskTree>> {
        let tasks = self.list_tasks()?;
        let forest = build_task_tree(&tasks);
        Ok(if hide_done {
            hide_completed(forest)
        } else {
            forest
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Create a task, appended after its siblings.
    pub fn create_task(&self, input: NewTask) -> Result<Task> {
        let title = validate_title(&input.title)?;
        let recurrence = validate_recurrence(input.recurrence)?;
        let parent_id = input
            .parent_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let task = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(ref pid) = parent_id
                && !task_exists(&tx, pid)?
            {
                return Err(ApiError::task_not_found(pid).with_field("parentId").into());
            }

            let task = insert_task_internal(
                &tx,
                TaskFields {
                    title: &title,
                    parent_id: parent_id.as_deref(),
                    priority: input.priority.unwrap_or_default(),
                    due_date: input.due_date,
                    recurrence,
                },
            )?;

            tx.commit()?;
            Ok(task)
        })?;

        info!(task_id = %task.id, parent_id = ?task.parent_id, "Created task");
        Ok(task)
    }

    /// Mark a task completed or not.
    ///
    /// Completing a recurring task that has a due date also creates its next
    /// occurrence under the same parent. Unchecking and re-checking the task
    /// does not create another one while the first still exists.
    pub fn set_completed(&self, task_id: &str, completed: bool) -> Result<Completion> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let next_occurrence = write_completion(&tx, task_id, completed)?;
            let task = require_task(&tx, task_id)?;
            tx.commit()?;
            Ok(Completion {
                task,
                next_occurrence,
            })
        })
    }

    /// Change title and priority.
    pub fn update_task_details(
        &self,
        task_id: &str,
        title: &str,
        priority: Priority,
    ) -> Result<Task> {
        let title = validate_title(title)?;
        self.with_conn(|conn| {
            write_details(conn, task_id, &title, priority)?;
            require_task(conn, task_id)
        })
    }

    /// Replace the due date and recurrence rule. `None` clears them.
    pub fn update_schedule(
        &self,
        task_id: &str,
        due_date: Option<DateTime<Utc>>,
        recurrence: Option<Recurrence>,
    ) -> Result<Task> {
        let recurrence = validate_recurrence(recurrence)?;
        self.with_conn(|conn| {
            write_schedule(conn, task_id, due_date, recurrence)?;
            require_task(conn, task_id)
        })
    }

    /// Apply a partial update in one transaction: details, then schedule,
    /// then completion. Either every change is written or none is.
    pub fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Completion> {
        let title = update.title.as_deref().map(validate_title).transpose()?;
        let recurrence = match update.recurrence {
            Some(rule) => Some(validate_recurrence(rule)?),
            None => None,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current = require_task(&tx, task_id)?;

            if update.touches_details() {
                write_details(
                    &tx,
                    task_id,
                    title.as_deref().unwrap_or(&current.title),
                    update.priority.unwrap_or(current.priority),
                )?;
            }
            if update.touches_schedule() {
                write_schedule(
                    &tx,
                    task_id,
                    update.due_date.unwrap_or(current.due_date),
                    recurrence.unwrap_or_else(|| current.recurrence()),
                )?;
            }
            let next_occurrence = match update.is_completed {
                Some(done) => write_completion(&tx, task_id, done)?,
                None => None,
            };

            let task = require_task(&tx, task_id)?;
            tx.commit()?;
            Ok(Completion {
                task,
                next_occurrence,
            })
        })
    }

    /// Delete a task and all of its descendants. Returns the number of rows removed.
    pub fn delete_task(&self, task_id: &str) -> Result<usize> {
        let removed = self.with_conn(|conn| {
            // UNION (not UNION ALL) stops at rows already collected, so a
            // parent cycle cannot loop forever.
            let removed = conn.execute(
                "WITH RECURSIVE subtree(id) AS (
                     SELECT id FROM tasks WHERE id = ?1
                     UNION
                     SELECT t.id FROM tasks t JOIN subtree s ON t.parent_id = s.id
                 )
                 DELETE FROM tasks WHERE id IN (SELECT id FROM subtree)",
                params![task_id],
            )?;
            if removed == 0 {
                return Err(ApiError::task_not_found(task_id).into());
            }
            Ok(removed)
        })?;

        info!(task_id, removed, "Deleted task subtree");
        Ok(removed)
    }

    /// Persist a drag-and-drop reorder: `ordered_ids[i]` gets `sort_order = i`.
    ///
    /// Every id must be shown under `parent_id` in the tree; tasks with a
    /// dangling parent count as root-level. Siblings missing from the list
    /// (for example completed ones hidden from the view) keep their relative
    /// order and are renumbered after the listed ones.
    pub fn reorder_siblings(&self, parent_id: Option<&str>, ordered_ids: &[String]) -> Result<()> {
        if ordered_ids.is_empty() {
            return Err(ApiError::missing_field("orderedIds").into());
        }
        let mut listed = HashSet::with_capacity(ordered_ids.len());
        if let Some(dup) = ordered_ids.iter().find(|id| !listed.insert(id.as_str())) {
            return Err(ApiError::invalid_value(
                "orderedIds",
                format!("Task {} appears more than once", dup),
            )
            .into());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let siblings = sibling_ids(&tx, parent_id)?;
            let shown: HashSet<&str> = siblings.iter().map(String::as_str).collect();

            for id in ordered_ids {
                if shown.contains(id.as_str()) {
                    continue;
                }
                require_task(&tx, id)?;
                return Err(ApiError::invalid_value(
                    "orderedIds",
                    format!(
                        "Task {} is not a child of {}",
                        id,
                        parent_id.unwrap_or("the root level")
                    ),
                )
                .into());
            }

            let unlisted = siblings.iter().filter(|id| !listed.contains(id.as_str()));
            let now = now_ms();
            for (position, id) in ordered_ids.iter().chain(unlisted).enumerate() {
                tx.execute(
                    "UPDATE tasks SET sort_order = ?1, updated_at = ?2 WHERE id = ?3",
                    params![position as i64, now, id],
                )?;
            }

            tx.commit()?;
            Ok(())
        })?;

        debug!(parent_id = ?parent_id, count = ordered_ids.len(), "Reordered siblings");
        Ok(())
    }

    /// Total and completed task counts.
    pub fn task_counts(&self) -> Result<TaskCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_completed), 0) FROM tasks",
                [],
                |row| {
                    Ok(TaskCounts {
                        total: row.get(0)?,
                        completed: row.get(1)?,
                    })
                },
            )?;
            Ok(counts)
        })
    }
}
