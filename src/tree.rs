//! Task tree assembly.
//!
//! Converts the flat list of task records read from storage into an ordered
//! forest. Parent links are materialized as containment, every record is
//! placed exactly once, and siblings are ordered by `sort_order` at every
//! level.
//!
//! Records whose `parent_id` does not resolve to a record in the input are
//! placed at the root level rather than dropped, so a task whose parent has
//! gone missing stays visible.

use crate::types::{Task, TaskTree};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// Sibling order: `sort_order`, then `created_at`, then `id`, all ascending.
pub fn sibling_order(a: &Task, b: &Task) -> Ordering {
    a.sort_order
        .cmp(&b.sort_order)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Assemble a flat list of task records into an ordered forest.
///
/// Never fails. Dangling parent references become roots. Records caught in a
/// parent cycle (which no root can reach) are promoted to roots one at a
/// time, smallest sibling key first, until every record has been placed.
pub fn build_task_tree(tasks: &[Task]) -> Vec<TaskTree> {
    let n = tasks.len();

    // First pass: id -> position. The first record wins on duplicate ids.
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, task) in tasks.iter().enumerate() {
        index.entry(task.id.as_str()).or_insert(i);
    }

    // Second pass: link each record under its parent, or at the root.
    let mut roots: Vec<usize> = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, task) in tasks.iter().enumerate() {
        match task.parent_id.as_deref().and_then(|pid| index.get(pid)) {
            Some(&parent) => children[parent].push(i),
            None => roots.push(i),
        }
    }

    let by_key = |a: &usize, b: &usize| sibling_order(&tasks[*a], &tasks[*b]);
    roots.sort_by(by_key);
    for list in &mut children {
        list.sort_by(by_key);
    }

    let mut placed = vec![false; n];
    let mut forest: Vec<TaskTree> = roots
        .iter()
        .map(|&root| build_node(root, tasks, &children, &mut placed))
        .collect();

    if placed.iter().any(|p| !p) {
        let mut unplaced: Vec<usize> = (0..n).filter(|&i| !placed[i]).collect();
        unplaced.sort_by(by_key);
        for i in unplaced {
            if placed[i] {
                continue;
            }
            warn!(
                task_id = %tasks[i].id,
                parent_id = ?tasks[i].parent_id,
                "Task is part of a parent cycle; placing it at the root"
            );
            forest.push(build_node(i, tasks, &children, &mut placed));
        }
        forest.sort_by(|a, b| sibling_order(&a.task, &b.task));
    }

    forest
}

fn build_node(
    i: usize,
    tasks: &[Task],
    children: &[Vec<usize>],
    placed: &mut [bool],
) -> TaskTree {
    placed[i] = true;
    let mut node = TaskTree::leaf(tasks[i].clone());
    for &child in &children[i] {
        if !placed[child] {
            node.children.push(build_node(child, tasks, children, placed));
        }
    }
    node
}

/// Total number of nodes in the forest, descendants included.
pub fn count_nodes(forest: &[TaskTree]) -> usize {
    forest
        .iter()
        .map(|node| 1 + count_nodes(&node.children))
        .sum()
}

/// Walk the forest depth-first (pre-order), passing each node and its depth.
pub fn walk<F>(forest: &[TaskTree], f: &mut F)
where
    F: FnMut(&TaskTree, usize),
{
    fn go<F: FnMut(&TaskTree, usize)>(nodes: &[TaskTree], depth: usize, f: &mut F) {
        for node in nodes {
            f(node, depth);
            go(&node.children, depth + 1, f);
        }
    }
    go(forest, 0, f);
}

/// Flatten a forest back into records, depth-first pre-order.
pub fn flatten(forest: &[TaskTree]) -> Vec<Task> {
    let mut out = Vec::with_capacity(count_nodes(forest));
    walk(forest, &mut |node, _| out.push(node.task.clone()));
    out
}

/// Drop completed tasks. A completed task is removed with its whole subtree.
pub fn hide_completed(forest: Vec<TaskTree>) -> Vec<TaskTree> {
    forest
        .into_iter()
        .filter(|node| !node.task.is_completed)
        .map(|mut node| {
            node.children = hide_completed(node.children);
            node
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashSet;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str, parent: Option<&str>, sort_order: i64) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {}", id),
            parent_id: parent.map(str::to_string),
            priority: Priority::Medium,
            is_completed: false,
            due_date: None,
            is_recurring: false,
            recurring_interval: None,
            recurring_unit: None,
            sort_order,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }

    fn ids(nodes: &[TaskTree]) -> Vec<&str> {
        nodes.iter().map(|n| n.task.id.as_str()).collect()
    }

    fn find<'a>(forest: &'a [TaskTree], id: &str) -> Option<&'a TaskTree> {
        for node in forest {
            if node.task.id == id {
                return Some(node);
            }
            if let Some(found) = find(&node.children, id) {
                return Some(found);
            }
        }
        None
    }

    /// (parent id or None for root, child id) for every edge in the forest.
    fn edges(forest: &[TaskTree]) -> Vec<(Option<String>, String)> {
        fn go(nodes: &[TaskTree], parent: Option<&str>, out: &mut Vec<(Option<String>, String)>) {
            for node in nodes {
                out.push((parent.map(str::to_string), node.task.id.clone()));
                go(&node.children, Some(&node.task.id), out);
            }
        }
        let mut out = Vec::new();
        go(forest, None, &mut out);
        out
    }

    fn assert_siblings_sorted(nodes: &[TaskTree]) {
        for pair in nodes.windows(2) {
            assert!(
                pair[0].task.sort_order <= pair[1].task.sort_order,
                "{} ({}) before {} ({})",
                pair[0].task.id,
                pair[0].task.sort_order,
                pair[1].task.id,
                pair[1].task.sort_order
            );
        }
        for node in nodes {
            assert_siblings_sorted(&node.children);
        }
    }

    #[test]
    fn empty_input_gives_empty_forest() {
        assert!(build_task_tree(&[]).is_empty());
    }

    #[test]
    fn roots_sorted_and_children_attached() {
        let tasks = vec![
            task("A", None, 1),
            task("B", Some("A"), 0),
            task("C", None, 0),
        ];
        let forest = build_task_tree(&tasks);

        assert_eq!(ids(&forest), vec!["C", "A"]);
        assert_eq!(ids(&forest[1].children), vec!["B"]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn dangling_parent_becomes_root() {
        let forest = build_task_tree(&[task("X", Some("missing"), 0)]);
        assert_eq!(ids(&forest), vec!["X"]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn orphans_sort_among_real_roots() {
        let tasks = vec![
            task("root", None, 5),
            task("orphan", Some("deleted"), 2),
            task("child", Some("root"), 0),
        ];
        let forest = build_task_tree(&tasks);
        assert_eq!(ids(&forest), vec!["orphan", "root"]);
        assert_eq!(ids(&forest[1].children), vec!["child"]);
    }

    #[test]
    fn children_sorted_at_every_level_regardless_of_input_order() {
        let tasks = vec![
            task("g2", Some("c1"), 9),
            task("c2", Some("r"), 4),
            task("g1", Some("c1"), -1),
            task("r", None, 0),
            task("c1", Some("r"), 1),
            task("g3", Some("c1"), 3),
        ];
        let forest = build_task_tree(&tasks);

        assert_eq!(ids(&forest), vec!["r"]);
        assert_eq!(ids(&forest[0].children), vec!["c1", "c2"]);
        assert_eq!(ids(&forest[0].children[0].children), vec!["g1", "g3", "g2"]);
        assert_siblings_sorted(&forest);
    }

    #[test]
    fn ties_break_on_created_at_then_id() {
        let mut late = task("a-late", None, 0);
        late.created_at = epoch() + Duration::minutes(5);
        let early = task("z-early", None, 0);
        let same_time_b = task("b", None, 0);
        let same_time_a = task("a", None, 0);

        let forest = build_task_tree(&[late, same_time_b, early, same_time_a]);
        assert_eq!(ids(&forest), vec!["a", "b", "z-early", "a-late"]);
    }

    #[test]
    fn self_parent_is_placed_once_at_root() {
        let forest = build_task_tree(&[task("loop", Some("loop"), 0), task("ok", None, 1)]);
        assert_eq!(ids(&forest), vec!["loop", "ok"]);
        assert!(forest[0].children.is_empty());
        assert_eq!(count_nodes(&forest), 2);
    }

    #[test]
    fn parent_cycle_is_broken_at_smallest_member() {
        let tasks = vec![
            task("b", Some("a"), 1),
            task("a", Some("c"), 0),
            task("c", Some("b"), 2),
            task("hangs-off-cycle", Some("c"), 0),
            task("root", None, 7),
        ];
        let forest = build_task_tree(&tasks);

        assert_eq!(count_nodes(&forest), tasks.len());
        assert_eq!(ids(&forest), vec!["a", "root"]);
        let a = &forest[0];
        assert_eq!(ids(&a.children), vec!["b"]);
        assert_eq!(ids(&a.children[0].children), vec!["c"]);
        assert_eq!(ids(&a.children[0].children[0].children), vec!["hangs-off-cycle"]);
    }

    #[test]
    fn duplicate_ids_each_keep_a_node() {
        let tasks = vec![
            task("dup", None, 0),
            task("dup", None, 1),
            task("kid", Some("dup"), 0),
        ];
        let forest = build_task_tree(&tasks);
        assert_eq!(count_nodes(&forest), 3);
        assert_eq!(ids(&forest[0].children), vec!["kid"]);
        assert!(forest[1].children.is_empty());
    }

    #[test]
    fn input_is_left_untouched() {
        let tasks = vec![task("b", None, 1), task("a", None, 0)];
        let before = tasks.clone();
        let _ = build_task_tree(&tasks);
        assert_eq!(tasks, before);
    }

    #[test]
    fn flatten_and_rebuild_keeps_edges_and_order() {
        let tasks = vec![
            task("p", None, 2),
            task("q", None, 1),
            task("p1", Some("p"), 1),
            task("p0", Some("p"), 0),
            task("q0", Some("q"), 0),
            task("p1a", Some("p1"), 0),
            task("lost", Some("gone"), 0),
        ];
        let forest = build_task_tree(&tasks);
        let flat = flatten(&forest);
        assert_eq!(flat.len(), tasks.len());

        let rebuilt = build_task_tree(&flat);
        assert_eq!(edges(&rebuilt), edges(&forest));
        assert_eq!(rebuilt, forest);
    }

    #[test]
    fn walk_reports_depth() {
        let tasks = vec![
            task("r", None, 0),
            task("c", Some("r"), 0),
            task("g", Some("c"), 0),
            task("s", None, 1),
        ];
        let forest = build_task_tree(&tasks);
        let mut seen = Vec::new();
        walk(&forest, &mut |node, depth| seen.push((node.task.id.clone(), depth)));
        assert_eq!(
            seen,
            vec![
                ("r".to_string(), 0),
                ("c".to_string(), 1),
                ("g".to_string(), 2),
                ("s".to_string(), 0),
            ]
        );
    }

    #[test]
    fn hide_completed_drops_completed_subtrees() {
        let mut done_parent = task("done", None, 0);
        done_parent.is_completed = true;
        let mut done_leaf = task("done-leaf", Some("open"), 1);
        done_leaf.is_completed = true;
        let tasks = vec![
            done_parent,
            task("under-done", Some("done"), 0),
            task("open", None, 1),
            task("open-leaf", Some("open"), 0),
            done_leaf,
        ];

        let visible = hide_completed(build_task_tree(&tasks));
        assert_eq!(ids(&visible), vec!["open"]);
        assert_eq!(ids(&visible[0].children), vec!["open-leaf"]);
        assert!(find(&visible, "under-done").is_none());
    }

    /// Small deterministic generator so shape checks cover many inputs.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    fn random_tasks(rng: &mut Lcg, n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                let parent = match rng.next(4) {
                    0 => None,
                    1 => Some("nowhere".to_string()),
                    _ if i > 0 => Some(format!("t{}", rng.next(i as u64))),
                    _ => None,
                };
                let mut t = task(&format!("t{}", i), None, rng.next(5) as i64);
                t.parent_id = parent;
                t.created_at = epoch() + Duration::seconds(rng.next(3) as i64);
                t
            })
            .collect()
    }

    #[test]
    fn generated_inputs_keep_every_record_once_in_the_right_place() {
        let mut rng = Lcg(42);
        for round in 0..200 {
            let n = (round % 25) as usize;
            let mut tasks = random_tasks(&mut rng, n);
            // Shuffle so input order carries no structure.
            for i in (1..tasks.len()).rev() {
                let j = rng.next(i as u64 + 1) as usize;
                tasks.swap(i, j);
            }

            let forest = build_task_tree(&tasks);
            assert_eq!(count_nodes(&forest), tasks.len());

            let placed: HashSet<String> = flatten(&forest).into_iter().map(|t| t.id).collect();
            assert_eq!(placed.len(), tasks.len());

            let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
            for (parent, child) in edges(&forest) {
                let record = tasks.iter().find(|t| t.id == child).unwrap();
                match record.parent_id.as_deref() {
                    Some(pid) if known.contains(pid) => {
                        assert_eq!(parent.as_deref(), Some(pid), "{} misplaced", child)
                    }
                    _ => assert_eq!(parent, None, "{} should be a root", child),
                }
            }
            assert_siblings_sorted(&forest);

            let rebuilt = build_task_tree(&flatten(&forest));
            assert_eq!(edges(&rebuilt), edges(&forest));
        }
    }
}
