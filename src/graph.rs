//! Resource dependency graph.
//!
//! Nodes are the resources the orchestrator rolls out: workloads created by Helm releases and
//! local resources run on the host. An edge `a -> b` means `a` must not start rolling out until
//! `b` reports ready.

// System
use std::collections::{BTreeMap, BTreeSet};

// Third Party
use serde::Serialize;
use thiserror::Error;

// Local
use crate::helm::WorkloadKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource `{0}` is declared more than once")]
    DuplicateResource(String),
    #[error("no workload named `{0}` has been declared")]
    UnknownWorkload(String),
    #[error("resource `{resource}` depends on unknown resource `{dependency}`")]
    UnknownDependency {
        resource: String,
        dependency: String,
    },
    #[error("dependency cycle between resources: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Workload(WorkloadKind),
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNode {
    pub name: String,
    /// The release or local resource that brings this resource into existence.
    pub owner: String,
    pub kind: ResourceKind,
    pub depends_on: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceGraph {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    #[serde(skip)]
    index: BTreeMap<String, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(
        &mut self,
        name: &str,
        owner: &str,
        kind: ResourceKind,
    ) -> Result<(), GraphError> {
        if self.index.contains_key(name) {
            return Err(GraphError::DuplicateResource(name.to_string()));
        }
        self.index.insert(name.to_string(), self.nodes.len());
        self.nodes.push(ResourceNode {
            name: name.to_string(),
            owner: owner.to_string(),
            kind,
            depends_on: BTreeSet::new(),
        });
        Ok(())
    }

    /// Declare that `resource` waits for `dependency`. `resource` must already be declared;
    /// `dependency` is only checked by [`ResourceGraph::validate`] so it may be declared later.
    pub fn add_dependency(&mut self, resource: &str, dependency: &str) -> Result<(), GraphError> {
        let index = *self
            .index
            .get(resource)
            .ok_or_else(|| GraphError::UnknownWorkload(resource.to_string()))?;
        self.nodes[index]
            .depends_on
            .insert(dependency.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&index| &self.nodes[index])
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|node| node.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dependency in &node.depends_on {
                if !self.index.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        resource: node.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        self.rollout_order().map(|_| ())
    }

    /// A topological order of all resources. Among resources that are ready to roll out at the
    /// same time, the one declared first comes first, so the order is stable across runs.
    pub fn rollout_order(&self) -> Result<Vec<&ResourceNode>, GraphError> {
        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| {
                node.depends_on
                    .iter()
                    .filter(|dependency| self.index.contains_key(*dependency))
                    .count()
            })
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for dependency in &node.depends_on {
                if let Some(&dependency_index) = self.index.get(dependency) {
                    dependents[dependency_index].push(index);
                }
            }
        }

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| index)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(index) = ready.pop_first() {
            order.push(&self.nodes[index]);
            for &dependent in &dependents[index] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = remaining
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(index, _)| self.nodes[index].name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let stateful = ResourceKind::Workload(WorkloadKind::StatefulSet);
        graph.add_resource("redis-master", "redis", stateful).unwrap();
        graph.add_resource("redis-replicas", "redis", stateful).unwrap();
        graph
            .add_resource("mev-inspect", "mev-inspect", stateful)
            .unwrap();
        graph
            .add_resource(
                "mev-inspect-workers",
                "mev-inspect-workers",
                ResourceKind::Workload(WorkloadKind::Deployment),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_rollout_waits_for_dependencies() {
        let mut graph = ResourceGraph::new();
        let stateful = ResourceKind::Workload(WorkloadKind::StatefulSet);
        // Declared before its dependency on purpose.
        graph.add_resource("mev-inspect", "mev-inspect", stateful).unwrap();
        graph.add_resource("redis-master", "redis", stateful).unwrap();
        graph.add_dependency("mev-inspect", "redis-master").unwrap();
        graph.validate().unwrap();

        let order: Vec<&str> = graph
            .rollout_order()
            .unwrap()
            .iter()
            .map(|node| node.name.as_str())
            .collect();
        assert_eq!(order, vec!["redis-master", "mev-inspect"]);
        assert_eq!(graph.dependencies_of("mev-inspect"), vec!["redis-master"]);
        assert!(graph.dependencies_of("redis-master").is_empty());
        assert!(graph.dependencies_of("missing").is_empty());
    }

    #[test]
    fn test_independent_resources_keep_declaration_order() {
        let mut graph = redis_graph();
        graph.add_dependency("mev-inspect", "redis-master").unwrap();
        graph
            .add_dependency("mev-inspect-workers", "redis-master")
            .unwrap();
        let order: Vec<&str> = graph
            .rollout_order()
            .unwrap()
            .iter()
            .map(|node| node.name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "redis-master",
                "redis-replicas",
                "mev-inspect",
                "mev-inspect-workers"
            ]
        );
    }

    #[test]
    fn test_dependency_on_undeclared_workload() {
        let mut graph = redis_graph();
        assert_eq!(
            graph.add_dependency("mev-inspect-prices", "redis-master"),
            Err(GraphError::UnknownWorkload("mev-inspect-prices".to_string()))
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let mut graph = redis_graph();
        graph.add_dependency("mev-inspect", "postgresql").unwrap();
        assert_eq!(
            graph.validate(),
            Err(GraphError::UnknownDependency {
                resource: "mev-inspect".to_string(),
                dependency: "postgresql".to_string()
            })
        );
    }

    #[test]
    fn test_cycle() {
        let mut graph = redis_graph();
        graph.add_dependency("mev-inspect", "mev-inspect-workers").unwrap();
        graph.add_dependency("mev-inspect-workers", "mev-inspect").unwrap();
        assert_eq!(
            graph.validate(),
            Err(GraphError::Cycle(vec![
                "mev-inspect".to_string(),
                "mev-inspect-workers".to_string()
            ]))
        );
    }

    #[test]
    fn test_duplicate_resource() {
        let mut graph = redis_graph();
        assert_eq!(
            graph.add_resource("redis-master", "other", ResourceKind::Local),
            Err(GraphError::DuplicateResource("redis-master".to_string()))
        );
    }
}
