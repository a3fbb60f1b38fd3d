//! HTML templates for the task page.
//!
//! Templates are embedded at compile time using `include_str!`.

/// The single-page task list with the add-task form.
pub const INDEX_TEMPLATE: &str = include_str!("templates/index.html");
