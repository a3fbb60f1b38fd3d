//! Nested to-do list library.
//!
//! Tasks form a forest through `parentId` references. The storage layer keeps
//! flat records in SQLite; [`tree::build_task_tree`] assembles them into the
//! ordered forest the web UI and the CLI display.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod recurrence;
pub mod tree;
pub mod types;
pub mod web;
