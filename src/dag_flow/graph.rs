//! Dependency graph inferred from node inputs and outputs.
//!
//! An edge `producer -> consumer` exists whenever a consumer's input map reads
//! a value-store name that the producer's output map writes. Inputs nobody
//! produces create no edge; they are expected among the run inputs.

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

use super::config::RunSpec;
use crate::core::errors::{DagError, Result};

/// A node of the adjacency structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub name: String,
    /// Number of distinct producers this node consumes from
    pub indegree: usize,
    /// Consumers of this node's outputs, in edge insertion order
    pub followers: Vec<String>,
}

impl GraphNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indegree: 0,
            followers: Vec::new(),
        }
    }
}

/// Adjacency list keyed by node name
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a run spec.
    ///
    /// Fails with `InvalidConfig` when a node's name differs from its key in
    /// the node map, and with `DuplicateOutputName` when two nodes write the
    /// same value.
    pub fn build(spec: &RunSpec) -> Result<Self> {
        for (key, node) in &spec.nodes {
            if node.name != *key {
                return Err(DagError::InvalidConfig(format!(
                    "node '{}' is configured under key '{}'",
                    node.name, key
                )));
            }
        }

        let mut producers: HashMap<&str, &str> = HashMap::new();
        for node in spec.nodes.values() {
            for output in node.output.keys() {
                if let Some(first) = producers.insert(output.as_str(), node.name.as_str()) {
                    return Err(DagError::DuplicateOutputName {
                        output: output.clone(),
                        first: first.to_string(),
                        second: node.name.clone(),
                    });
                }
            }
        }

        let mut graph = Self::new();
        for node in spec.nodes.values() {
            graph.add_node(&node.name);
        }

        for node in spec.nodes.values() {
            for store_name in node.input.values() {
                if let Some(producer) = producers.get(store_name.as_str()) {
                    graph.add_edge(producer, &node.name);
                }
            }
        }

        debug!(
            run = %spec.name,
            nodes = graph.len(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Add a node; an existing node of the same name is kept
    pub fn add_node(&mut self, name: &str) {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| GraphNode::new(name));
    }

    /// Add a directed edge. Repeated edges between the same pair are ignored
    /// so that each producer notifies a consumer exactly once.
    ///
    /// Returns false if either endpoint is unknown.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if !self.nodes.contains_key(to) {
            return false;
        }
        let Some(from_node) = self.nodes.get_mut(from) else {
            return false;
        };
        if from_node.followers.iter().any(|f| f == to) {
            return true;
        }
        from_node.followers.push(to.to_string());
        if let Some(to_node) = self.nodes.get_mut(to) {
            to_node.indegree += 1;
        }
        true
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.followers.len()).sum()
    }

    /// Names of the nodes `name` depends on
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.followers.iter().any(|f| f == name))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Kahn's algorithm. Works on a copy of the indegree counters so the graph
    /// stays usable for wiring afterwards.
    ///
    /// Fails with `CyclicDependency` naming every node left unresolved.
    pub fn toposort(&self) -> Result<Vec<&GraphNode>> {
        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .values()
            .map(|n| (n.name.as_str(), n.indegree))
            .collect();

        let mut ready: VecDeque<&GraphNode> =
            self.nodes.values().filter(|n| n.indegree == 0).collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_front() {
            sorted.push(node);
            for follower in &node.followers {
                let Some(remaining) = indegree.get_mut(follower.as_str()) else {
                    continue;
                };
                *remaining -= 1;
                if *remaining == 0 {
                    if let Some(next) = self.nodes.get(follower) {
                        ready.push_back(next);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let mut unresolved: Vec<String> = indegree
                .into_iter()
                .filter(|(_, remaining)| *remaining > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            unresolved.sort();
            return Err(DagError::CyclicDependency { nodes: unresolved });
        }
        Ok(sorted)
    }

    /// Group nodes by their longest distance from a root
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let order = self.toposort()?;
        let mut depth: HashMap<&str, usize> = HashMap::with_capacity(order.len());
        for node in &order {
            let level = *depth.entry(node.name.as_str()).or_insert(0);
            for follower in &node.followers {
                let entry = depth.entry(follower.as_str()).or_insert(0);
                *entry = (*entry).max(level + 1);
            }
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        for node in order {
            let level = depth[node.name.as_str()];
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(node.name.clone());
        }
        for level in levels.iter_mut() {
            level.sort();
        }
        Ok(levels)
    }

    /// Render the graph in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        let mut graph: DiGraph<&str, &str> = DiGraph::new();
        let indices: HashMap<&str, NodeIndex> = self
            .nodes
            .keys()
            .map(|name| (name.as_str(), graph.add_node(name.as_str())))
            .collect();
        for node in self.nodes.values() {
            for follower in &node.followers {
                graph.add_edge(indices[node.name.as_str()], indices[follower.as_str()], "");
            }
        }
        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}
