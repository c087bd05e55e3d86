//! Workflow validation and port routing.
//!
//! A `RoutingTable` is built once per run from a `Workflow`. Building it
//! validates the definition:
//! - Node ids are unique
//! - Every connection refers to known nodes
//! - The graph is acyclic (checked with petgraph)
//!
//! Block type existence is checked separately by the runner, since only the
//! invoker knows which executables exist.

use crate::definition::{NodeId, Workflow};
use crate::error::GraphError;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Static `(node, port) -> successors` lookup for a validated workflow.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<(NodeId, String), Vec<NodeId>>,
    start_nodes: Vec<NodeId>,
}

impl RoutingTable {
    /// Validates the workflow and builds its routing table.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first validation failure found.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index_map: HashMap<NodeId, NodeIndex> = HashMap::new();

        for node in &workflow.nodes {
            if index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(node.id.clone());
            index_map.insert(node.id.clone(), index);
        }

        let mut routes: HashMap<(NodeId, String), Vec<NodeId>> = HashMap::new();
        let mut has_inbound: HashSet<&NodeId> = HashSet::new();

        for connection in &workflow.connections {
            let from = index_map
                .get(&connection.from)
                .ok_or_else(|| GraphError::UnknownNode {
                    node_id: connection.from.clone(),
                })?;
            let to = index_map
                .get(&connection.to)
                .ok_or_else(|| GraphError::UnknownNode {
                    node_id: connection.to.clone(),
                })?;

            graph.add_edge(*from, *to, ());
            has_inbound.insert(&connection.to);

            let successors = routes
                .entry((connection.from.clone(), connection.port.clone()))
                .or_default();
            if !successors.contains(&connection.to) {
                successors.push(connection.to.clone());
            }
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let node_id = graph
                .node_weight(cycle.node_id())
                .cloned()
                .unwrap_or_else(|| NodeId::from("?"));
            return Err(GraphError::CycleDetected { node_id });
        }

        let start_nodes = workflow
            .nodes
            .iter()
            .filter(|n| !has_inbound.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();

        Ok(Self {
            routes,
            start_nodes,
        })
    }

    /// Nodes with no inbound connection, in declaration order.
    #[must_use]
    pub fn start_nodes(&self) -> &[NodeId] {
        &self.start_nodes
    }

    /// Successors wired to `port` on `node`. Empty when the port is unwired.
    #[must_use]
    pub fn successors(&self, node: &NodeId, port: &str) -> &[NodeId] {
        self.routes
            .get(&(node.clone(), port.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns true if `port` on `node` has at least one connection.
    #[must_use]
    pub fn is_wired(&self, node: &NodeId, port: &str) -> bool {
        !self.successors(node, port).is_empty()
    }
}
