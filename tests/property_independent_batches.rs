//! Property tests for the scheduler's parallel batching.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use proptest::prelude::*;
use uuid::Uuid;

use conductor::domain::models::Task;
use conductor::services::DependencyResolver;

/// Build an acyclic task set: task i may only depend on tasks with a
/// smaller index, so cycles are impossible by construction.
fn dag_strategy() -> impl Strategy<Value = Vec<Task>> {
    (2usize..12)
        .prop_flat_map(|n| {
            let edges = proptest::collection::vec(
                (0usize..n, 0usize..n).prop_filter("forward edges only", |(a, b)| a < b),
                0..n * 2,
            );
            (Just(n), edges)
        })
        .prop_map(|(n, edges)| {
            let now = Utc::now();
            let ticket = Uuid::new_v4();
            let phase = Uuid::new_v4();
            let mut tasks: Vec<Task> = (0..n)
                .map(|i| Task::new(ticket, phase, format!("t{i}"), "d", now))
                .collect();
            for (from, to) in edges {
                let dep = tasks[from].id;
                tasks[to].depends_on.insert(dep);
            }
            tasks
        })
}

fn reachable(from: Uuid, to: Uuid, graph: &HashMap<Uuid, Vec<Uuid>>) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if seen.insert(node) {
            if let Some(deps) = graph.get(&node) {
                stack.extend(deps.iter().copied());
            }
        }
    }
    false
}

proptest! {
    #[test]
    fn independent_subset_has_no_internal_dependencies(tasks in dag_strategy(), limit in 1usize..8) {
        let resolver = DependencyResolver::new();
        let batch = resolver.independent_subset(&tasks, &tasks, limit);

        prop_assert!(batch.len() <= limit);

        let graph: HashMap<Uuid, Vec<Uuid>> = tasks
            .iter()
            .map(|t| (t.id, t.depends_on.iter().copied().collect()))
            .collect();

        for a in &batch {
            for b in &batch {
                if a.id != b.id {
                    prop_assert!(
                        !reachable(a.id, b.id, &graph),
                        "{} can reach {} through the dependency graph",
                        a.title,
                        b.title,
                    );
                }
            }
        }
    }

    #[test]
    fn independent_subset_preserves_input_order(tasks in dag_strategy()) {
        let resolver = DependencyResolver::new();
        let batch = resolver.independent_subset(&tasks, &tasks, tasks.len());

        let positions: Vec<usize> = batch
            .iter()
            .map(|t| tasks.iter().position(|x| x.id == t.id).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        prop_assert_eq!(positions, sorted);
    }

    #[test]
    fn cycle_detection_never_fires_on_forward_dags(tasks in dag_strategy()) {
        let resolver = DependencyResolver::new();
        prop_assert!(resolver.detect_cycle(&tasks).is_none());
    }
}
