//! Workflow definition types.
//!
//! A workflow is a named automation that consists of:
//! - An ordered list of nodes, each bound to a block type
//! - Connections from a node's output port to a successor node
//!
//! Definitions are immutable while a run is in progress; the runner works
//! from a shared `Arc<Workflow>`.

use blockflow_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The port a block reports when its response omits one.
pub const DEFAULT_PORT: &str = "default";

/// The port that receives a node's failure instead of failing the run.
pub const ERROR_PORT: &str = "error";

/// Identifier of a node, unique within its workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single step in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the workflow.
    pub id: NodeId,
    /// Block type, e.g. `std/delay`. Maps to an executable under the blocks directory.
    #[serde(rename = "type")]
    pub block: String,
    /// Block configuration. String leaves may contain `{{ $node.<id>.<path> }}` references.
    #[serde(default)]
    pub config: JsonValue,
    /// Overrides the invoker's default deadline for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Node {
    /// Creates a node with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, block: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block: block.into(),
            config: JsonValue::Object(serde_json::Map::new()),
            timeout_ms: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    /// Sets the per-node deadline.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// A directed connection `(from, port) -> to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Source node.
    pub from: NodeId,
    /// Output port on the source node.
    #[serde(default = "default_port")]
    pub port: String,
    /// Successor node.
    pub to: NodeId,
}

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

impl Connection {
    /// Creates a connection on the given port.
    #[must_use]
    pub fn new(from: impl Into<NodeId>, port: impl Into<String>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            port: port.into(),
            to: to.into(),
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    #[serde(default)]
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Port-labelled connections between nodes.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Creates an empty workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Appends a connection.
    #[must_use]
    pub fn with_connection(
        mut self,
        from: impl Into<NodeId>,
        port: impl Into<String>,
        to: impl Into<NodeId>,
    ) -> Self {
        self.connections.push(Connection::new(from, port, to));
        self
    }

    /// Returns the node with the given id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
