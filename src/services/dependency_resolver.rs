//! Dependency resolution over the task DAG.
//!
//! Cycle detection runs at submission time so a dependency cycle is
//! refused before it can ever deadlock the scheduler; the independence
//! check backs parallel batching.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::Task;

/// Service for validating task dependencies and carving independent batches.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

fn detect_cycle_util(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Ensure every dependency of `task` names an existing task.
    pub fn validate_dependencies(&self, task: &Task, existing: &[Task]) -> KernelResult<()> {
        let known: HashSet<Uuid> = existing.iter().map(|t| t.id).collect();
        for dep_id in &task.depends_on {
            if !known.contains(dep_id) && *dep_id != task.id {
                return Err(KernelError::NotFound { entity: "task", id: dep_id.to_string() });
            }
        }
        Ok(())
    }

    /// Detect a circular dependency over a set of tasks. Returns the
    /// cycle path when one exists.
    pub fn detect_cycle(&self, tasks: &[Task]) -> Option<Vec<Uuid>> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in tasks {
            graph.entry(task.id).or_default().extend(task.depends_on.iter().copied());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for task_id in graph.keys() {
            if !visited.contains(task_id)
                && detect_cycle_util(*task_id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }

        None
    }

    /// Refuse a submission that would close a cycle.
    pub fn check_acyclic_with(&self, candidate: &Task, existing: &[Task]) -> KernelResult<()> {
        let mut tasks = existing.to_vec();
        tasks.push(candidate.clone());
        if self.detect_cycle(&tasks).is_some() {
            return Err(KernelError::DependencyCycle(candidate.id));
        }
        Ok(())
    }

    /// Select up to `limit` mutually independent tasks from `ready`,
    /// preserving the input order.
    ///
    /// Two tasks are dependent when one can reach the other through the
    /// dependency graph of `all`. The result is safe to dispatch in one
    /// parallel batch.
    pub fn independent_subset(&self, ready: &[Task], all: &[Task], limit: usize) -> Vec<Task> {
        let mut reachability: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        let graph: HashMap<Uuid, Vec<Uuid>> =
            all.iter().map(|t| (t.id, t.depends_on.iter().copied().collect())).collect();

        fn ancestors(
            id: Uuid,
            graph: &HashMap<Uuid, Vec<Uuid>>,
            memo: &mut HashMap<Uuid, HashSet<Uuid>>,
        ) -> HashSet<Uuid> {
            if let Some(cached) = memo.get(&id) {
                return cached.clone();
            }
            let mut set = HashSet::new();
            if let Some(deps) = graph.get(&id) {
                for &dep in deps {
                    set.insert(dep);
                    set.extend(ancestors(dep, graph, memo));
                }
            }
            memo.insert(id, set.clone());
            set
        }

        let mut selected: Vec<Task> = Vec::new();
        for task in ready {
            if selected.len() >= limit {
                break;
            }
            let task_ancestors = ancestors(task.id, &graph, &mut reachability);
            let conflicts = selected.iter().any(|picked| {
                task_ancestors.contains(&picked.id)
                    || ancestors(picked.id, &graph, &mut reachability).contains(&task.id)
            });
            if !conflicts {
                selected.push(task.clone());
            }
        }
        selected
    }
}
