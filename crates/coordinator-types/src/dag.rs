//! Dependency-graph validation for manifest groups.
//!
//! A manifest group may declare other groups as dependencies (all manifests
//! in a dependent group are gated on their declared parents' groups having
//! completed). The graph of group dependencies must be acyclic; this is
//! checked once at configuration load time via Kahn's algorithm, the same
//! approach used for dependency-ordered task graphs elsewhere in the corpus.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagValidatorError {
    #[error("manifest group dependency graph contains a cycle involving: {0:?}")]
    CycleDetected(Vec<Uuid>),
    #[error("manifest group {0} declares a dependency on itself")]
    SelfDependency(Uuid),
}

/// Validates and topologically orders a manifest-group dependency graph.
///
/// Edges point from a group to the groups it depends on (parent ->
/// dependent is the opposite direction of `child_depends_on`; callers add
/// edges as `add_edge(child, parent)`).
#[derive(Debug, Default)]
pub struct DagValidator {
    nodes: HashSet<Uuid>,
    // child -> set of parents it depends on
    edges: HashMap<Uuid, HashSet<Uuid>>,
}

impl DagValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: Uuid) {
        self.nodes.insert(id);
        self.edges.entry(id).or_default();
    }

    /// Record that `child` depends on `parent` (parent must complete/exist
    /// before child is eligible).
    pub fn add_edge(&mut self, child: Uuid, parent: Uuid) -> Result<(), DagValidatorError> {
        if child == parent {
            return Err(DagValidatorError::SelfDependency(child));
        }
        self.add_node(child);
        self.add_node(parent);
        self.edges.entry(child).or_default().insert(parent);
        Ok(())
    }

    /// Run Kahn's algorithm over the parent-of edges and return nodes in
    /// dependency order (parents before children). Returns
    /// `CycleDetected` naming every node left unresolved when the queue of
    /// zero-remaining-dependency nodes drains early.
    pub fn validate(&self) -> Result<Vec<Uuid>, DagValidatorError> {
        let mut remaining: HashMap<Uuid, usize> = self
            .nodes
            .iter()
            .map(|&n| (n, self.edges.get(&n).map(HashSet::len).unwrap_or(0)))
            .collect();

        // children[parent] = nodes that depend on parent
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (&child, parents) in &self.edges {
            for &parent in parents {
                children.entry(parent).or_default().push(child);
            }
        }

        let mut queue: VecDeque<Uuid> = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut ordered = Vec::with_capacity(self.nodes.len());
        while let Some(node) = queue.pop_front() {
            ordered.push(node);
            if let Some(dependents) = children.get(&node) {
                for &dependent in dependents {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(dependent);
                        }
                    }
                }
            }
        }

        if ordered.len() != self.nodes.len() {
            let unresolved = self
                .nodes
                .iter()
                .filter(|n| !ordered.contains(n))
                .copied()
                .collect();
            return Err(DagValidatorError::CycleDetected(unresolved));
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn empty_graph_validates_to_empty_order() {
        let validator = DagValidator::new();
        assert_eq!(validator.validate().unwrap(), Vec::<Uuid>::new());
    }

    #[test]
    fn linear_chain_orders_parents_before_children() {
        let (a, b, c) = (uuid(1), uuid(2), uuid(3));
        let mut validator = DagValidator::new();
        validator.add_edge(b, a).unwrap();
        validator.add_edge(c, b).unwrap();

        let order = validator.validate().unwrap();
        let pos = |id: Uuid| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn self_dependency_is_rejected_at_insertion() {
        let a = uuid(1);
        let mut validator = DagValidator::new();
        assert_eq!(
            validator.add_edge(a, a).unwrap_err(),
            DagValidatorError::SelfDependency(a)
        );
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let (a, b) = (uuid(1), uuid(2));
        let mut validator = DagValidator::new();
        validator.add_edge(a, b).unwrap();
        validator.add_edge(b, a).unwrap();

        let err = validator.validate().unwrap_err();
        match err {
            DagValidatorError::CycleDetected(mut members) => {
                members.sort();
                let mut expected = vec![a, b];
                expected.sort();
                assert_eq!(members, expected);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn disconnected_acyclic_components_both_validate() {
        let (a, b, c, d) = (uuid(1), uuid(2), uuid(3), uuid(4));
        let mut validator = DagValidator::new();
        validator.add_edge(b, a).unwrap();
        validator.add_edge(d, c).unwrap();

        let order = validator.validate().unwrap();
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn diamond_shaped_graph_validates() {
        let (a, b, c, d) = (uuid(1), uuid(2), uuid(3), uuid(4));
        let mut validator = DagValidator::new();
        validator.add_edge(b, a).unwrap();
        validator.add_edge(c, a).unwrap();
        validator.add_edge(d, b).unwrap();
        validator.add_edge(d, c).unwrap();

        let order = validator.validate().unwrap();
        let pos = |id: Uuid| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }
}
