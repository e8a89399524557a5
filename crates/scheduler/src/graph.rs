use std::collections::VecDeque;

use crate::action::ActionId;
use crate::error::GraphError;

/// Check a dependency graph given as one dependency list per action.
///
/// Every referenced id must exist, and the graph must be acyclic (Kahn's
/// algorithm). On success returns the actions in a valid execution order.
pub fn topological_order(dependencies: &[Vec<ActionId>]) -> Result<Vec<ActionId>, GraphError> {
    let registered = dependencies.len();
    let mut in_degree = vec![0usize; registered];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); registered];

    for (index, deps) in dependencies.iter().enumerate() {
        for &dependency in deps {
            if dependency.0 >= registered {
                return Err(GraphError::UnknownDependency {
                    action: ActionId(index),
                    dependency,
                    registered,
                });
            }
            dependents[dependency.0].push(index);
            in_degree[index] += 1;
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(index, _)| index)
        .collect();
    let mut sorted = Vec::with_capacity(registered);

    while let Some(node) = queue.pop_front() {
        sorted.push(ActionId(node));
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if sorted.len() != registered {
        let in_cycle = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(index, _)| ActionId(index))
            .collect();
        return Err(GraphError::CircularDependency(in_cycle));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[usize]) -> Vec<ActionId> {
        raw.iter().map(|&i| ActionId(i)).collect()
    }

    #[test]
    fn empty_graph() {
        assert!(topological_order(&[]).unwrap().is_empty());
    }

    #[test]
    fn forward_references_are_ordered() {
        // 0 depends on 2, 2 depends on 1
        let graph = vec![ids(&[2]), ids(&[]), ids(&[1])];
        assert_eq!(topological_order(&graph).unwrap(), ids(&[1, 2, 0]));
    }

    #[test]
    fn diamond() {
        let graph = vec![ids(&[]), ids(&[0]), ids(&[0]), ids(&[1, 2])];
        let order = topological_order(&graph).unwrap();
        assert_eq!(order.first(), Some(&ActionId(0)));
        assert_eq!(order.last(), Some(&ActionId(3)));
    }

    #[test]
    fn cycle_is_reported() {
        let graph = vec![ids(&[]), ids(&[2]), ids(&[1]), ids(&[0])];
        assert_eq!(
            topological_order(&graph).unwrap_err(),
            GraphError::CircularDependency(ids(&[1, 2]))
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let graph = vec![ids(&[0])];
        assert!(matches!(
            topological_order(&graph),
            Err(GraphError::CircularDependency(_))
        ));
    }

    #[test]
    fn unknown_dependency() {
        let graph = vec![ids(&[]), ids(&[5])];
        assert_eq!(
            topological_order(&graph).unwrap_err(),
            GraphError::UnknownDependency {
                action: ActionId(1),
                dependency: ActionId(5),
                registered: 2,
            }
        );
    }
}
