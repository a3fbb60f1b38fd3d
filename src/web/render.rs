//! HTML fragments for the task page.
//!
//! The page swaps these in with htmx. Rows are nested in per-parent
//! containers so the drag-and-drop script can read sibling order back out of
//! the DOM.

use crate::types::{Priority, TaskCounts, TaskTree};
use std::fmt::Write;

/// Escape HTML special characters.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn priority_badge(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "badge-high",
        Priority::Medium => "badge-medium",
        Priority::Low => "badge-low",
    }
}

/// Render the whole forest, or the empty state when there is nothing to show.
pub fn render_forest(forest: &[TaskTree]) -> String {
    if forest.is_empty() {
        return r#"<div class="empty-state">No tasks yet. Add one above!</div>"#.to_string();
    }
    let mut html = String::new();
    render_siblings(&mut html, forest, None, 0);
    html
}

fn render_siblings(html: &mut String, nodes: &[TaskTree], parent_id: Option<&str>, depth: usize) {
    let parent_attr = parent_id.map(html_escape).unwrap_or_default();
    let _ = write!(html, r#"<div class="siblings" data-parent="{}">"#, parent_attr);
    for node in nodes {
        render_row(html, node, depth);
        if !node.children.is_empty() {
            render_siblings(html, &node.children, Some(&node.task.id), depth + 1);
        }
    }
    html.push_str("</div>");
}

fn render_row(html: &mut String, node: &TaskTree, depth: usize) {
    let task = &node.task;
    let id = html_escape(&task.id);

    let due = task
        .due_date
        .map(|d| format!(r#"<span class="due">{}</span>"#, d.format("%b %-d, %Y")))
        .unwrap_or_default();
    let repeat = task
        .recurrence()
        .map(|r| format!(r#"<span class="repeat">&#8635; {}</span>"#, html_escape(&r.to_string())))
        .unwrap_or_default();
    let toggle = if node.children.is_empty() {
        r#"<span class="toggle invisible"></span>"#
    } else {
        r#"<span class="toggle" onclick="toggleChildren(this)">&#9660;</span>"#
    };

    let _ = write!(
        html,
        r#"<div class="task-row{completed}" draggable="true" data-id="{id}" style="margin-left: {indent}rem">
    {toggle}
    <input type="checkbox" class="task-check" {checked} onchange="setCompleted('{id}', this.checked)">
    <div class="task-body">
        <span class="task-title">{title}</span>
        <div class="task-meta">
            <span class="badge {badge}">{priority}</span>
            {due}{repeat}
            <span class="created">{created}</span>
        </div>
    </div>
    <div class="task-actions">
        <button class="btn btn-sm" onclick="addSubtask('{id}')" title="Add subtask">+</button>
        <button class="btn btn-sm btn-danger" onclick="deleteTask('{id}')" title="Delete">&#128465;</button>
    </div>
</div>"#,
        completed = if task.is_completed { " completed" } else { "" },
        id = id,
        indent = depth as f64 * 1.5,
        toggle = toggle,
        checked = if task.is_completed { "checked" } else { "" },
        title = html_escape(&task.title),
        badge = priority_badge(task.priority),
        priority = task.priority,
        due = due,
        repeat = repeat,
        created = task.created_at.format("%b %-d, %-I:%M %p"),
    );
}

/// Header counts fragment.
pub fn render_counts(counts: TaskCounts) -> String {
    format!(
        r#"<div class="stats">
            <span class="stat"><span class="stat-value">{}</span> tasks</span>
            <span class="stat"><span class="stat-value">{}</span> completed</span>
        </div>"#,
        counts.total, counts.completed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::build_task_tree;
    use crate::types::Task;
    use chrono::{TimeZone, Utc};

    fn task(id: &str, title: &str, parent: Option<&str>, sort_order: i64) -> Task {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 15, 4, 0).unwrap();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: parent.map(str::to_string),
            priority: Priority::High,
            is_completed: false,
            due_date: None,
            is_recurring: false,
            recurring_interval: None,
            recurring_unit: None,
            sort_order,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(
            html_escape(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn empty_forest_renders_empty_state() {
        assert!(render_forest(&[]).contains("No tasks yet"));
    }

    #[test]
    fn children_are_indented_and_grouped_by_parent() {
        let forest = build_task_tree(&[
            task("p", "Parent", None, 0),
            task("c", "Child <script>", Some("p"), 0),
        ]);
        let html = render_forest(&forest);

        assert!(html.contains(r#"data-parent="">"#));
        assert!(html.contains(r#"data-parent="p">"#));
        assert!(html.contains(r#"data-id="c" style="margin-left: 1.5rem""#));
        assert!(html.contains(r#"data-id="p" style="margin-left: 0rem""#));
        assert!(html.contains("Child &lt;script&gt;"));
        assert!(html.find(r#"data-id="p""#) < html.find(r#"data-id="c""#));
    }

    #[test]
    fn row_shows_due_date_and_repeat() {
        let mut t = task("r", "Rent", None, 0);
        t.due_date = Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        t.is_recurring = true;
        t.recurring_interval = Some(1);
        t.recurring_unit = Some(crate::recurrence::RecurrenceUnit::Month);

        let html = render_forest(&build_task_tree(&[t]));
        assert!(html.contains("Apr 1, 2024"));
        assert!(html.contains("monthly"));
        assert!(html.contains("badge-high"));
    }
}
