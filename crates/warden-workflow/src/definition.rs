//! The declarative workflow data model.

use crate::{validate, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use warden_types::{DefinitionId, NodeId};

/// Per-step retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// A condition gating node execution on the recorded output of a
/// previously executed node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WhenClause {
    /// The node whose recorded output is examined.
    #[serde(rename = "ref")]
    pub source: NodeId,
    /// Dot-separated path into that output.
    pub path: String,
    /// Required value at the path.
    pub equals: Value,
}

impl WhenClause {
    /// Whether `output` satisfies this clause.
    pub fn matches(&self, output: &Value) -> bool {
        lookup_path(output, &self.path) == Some(&self.equals)
    }
}

/// Resolve a dot-separated path through objects and array indices.
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A declared secret requirement. The engine never reads the value; it
/// only asserts that the hosting environment provides it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequiredSecret {
    pub name: String,
    #[serde(default = "default_secret_source")]
    pub source: String,
    #[serde(default)]
    pub notes: String,
}

fn default_secret_source() -> String {
    "env".to_string()
}

/// One unit of declared work: an action against one capability, with
/// its own routing, condition, and retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    /// Capability tag identifying the adapter this node targets.
    pub uses: String,
    pub action: String,
    #[serde(default)]
    pub args: Value,
    /// Predecessors that must complete before this node may start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenClause>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Resource whose pre-state should be captured as evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub estimated_cost: f64,
    /// Caller-supplied idempotency key; generated per job run when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, uses: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            uses: uses.into(),
            action: action.into(),
            args: Value::Object(Default::default()),
            depends_on: Vec::new(),
            on_success: None,
            on_failure: None,
            when: None,
            retry: RetryPolicy::default(),
            timeout_ms: None,
            resource: None,
            estimated_cost: 0.0,
            idempotency_key: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = NodeId>) -> Self {
        self.depends_on = deps.into_iter().collect();
        self
    }

    pub fn with_on_success(mut self, target: impl Into<String>) -> Self {
        self.on_success = Some(NodeId::new(target));
        self
    }

    pub fn with_on_failure(mut self, target: impl Into<String>) -> Self {
        self.on_failure = Some(NodeId::new(target));
        self
    }

    pub fn with_when(mut self, source: impl Into<String>, path: impl Into<String>, equals: Value) -> Self {
        self.when = Some(WhenClause {
            source: NodeId::new(source),
            path: path.into(),
            equals,
        });
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.retry = RetryPolicy {
            max_attempts,
            backoff_ms,
        };
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// How a definition's nodes are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduling {
    /// No node declares dependencies: nodes run in array order, with
    /// explicit `on_success`/`on_failure` overrides.
    Sequential,
    /// At least one node declares `depends_on`: nodes are scheduled by
    /// the dependency graph, and independent branches may run in
    /// parallel.
    Graph,
}

/// The declarative blueprint for a multi-step automation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: DefinitionId,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    /// Declared capability scopes; every node's `uses` must be covered.
    #[serde(default)]
    pub uses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_secrets: Vec<RequiredSecret>,
    pub nodes: Vec<WorkflowNode>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DefinitionId::new(id),
            name: name.into(),
            version: 1,
            vars: HashMap::new(),
            uses: Vec::new(),
            required_secrets: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_uses(mut self, uses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uses = uses.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Parse a JSON document without validating it.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse and validate in one step.
    pub fn load(json: &str) -> Result<Self, WorkflowError> {
        let definition = Self::from_json(json)?;
        validate(&definition).map_err(WorkflowError::Validation)?;
        Ok(definition)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn node_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.id == id)
    }

    /// The implicit array-order successor of a node, if any.
    pub fn successor_of(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.node_index(id).and_then(|i| self.nodes.get(i + 1))
    }

    pub fn scheduling(&self) -> Scheduling {
        if self.nodes.iter().any(|n| !n.depends_on.is_empty()) {
            Scheduling::Graph
        } else {
            Scheduling::Sequential
        }
    }

    /// Entry nodes: in graph scheduling, every node with no
    /// dependencies; in sequential scheduling, the first node.
    pub fn entry_nodes(&self) -> Vec<&WorkflowNode> {
        match self.scheduling() {
            Scheduling::Graph => self
                .nodes
                .iter()
                .filter(|n| n.depends_on.is_empty())
                .collect(),
            Scheduling::Sequential => self.nodes.first().into_iter().collect(),
        }
    }

    /// Nodes that list `id` as a dependency.
    pub fn dependents_of(&self, id: &NodeId) -> Vec<&WorkflowNode> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.contains(id))
            .collect()
    }
}
