//! Pre-execution definition validation.
//!
//! Pure and side-effect-free: all checks run to completion and the full
//! itemized issue list comes back. No ledger entry is ever written for
//! a rejected definition.

use crate::{Scheduling, WorkflowDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use warden_types::NodeId;

/// What kind of check a validation issue came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    EmptyField,
    BadRetry,
    DuplicateNodeId,
    UnknownTarget,
    UnknownDependency,
    UnknownWhenRef,
    SelfReference,
    UndeclaredCapability,
    NoEntryNode,
    UnreachableNode,
    DependencyCycle,
}

/// One itemized validation failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            code,
            node_id,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "[{:?}] node '{}': {}", self.code, node, self.message),
            None => write!(f, "[{:?}] {}", self.code, self.message),
        }
    }
}

/// Run every check against a definition. `Ok` means fully accepted;
/// `Err` carries the complete issue list.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if definition.nodes.is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::NoEntryNode,
            None,
            "definition has no nodes",
        ));
        return Err(issues);
    }

    let ids: HashSet<&NodeId> = definition.nodes.iter().map(|n| &n.id).collect();
    let declared: HashSet<&str> = definition.uses.iter().map(String::as_str).collect();

    check_shapes(definition, &mut issues);
    check_duplicates(definition, &mut issues);
    check_references(definition, &ids, &mut issues);
    check_scopes(definition, &declared, &mut issues);
    check_cycles(definition, &mut issues);
    check_reachability(definition, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn check_shapes(definition: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
    for node in &definition.nodes {
        for (field, value) in [
            ("id", node.id.as_str()),
            ("uses", node.uses.as_str()),
            ("action", node.action.as_str()),
        ] {
            if value.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    IssueCode::EmptyField,
                    Some(node.id.clone()),
                    format!("field '{field}' must not be empty"),
                ));
            }
        }

        if node.retry.max_attempts == 0 {
            issues.push(ValidationIssue::new(
                IssueCode::BadRetry,
                Some(node.id.clone()),
                "retry.max_attempts must be at least 1",
            ));
        }
    }
}

fn check_duplicates(definition: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for node in &definition.nodes {
        if !seen.insert(&node.id) {
            issues.push(ValidationIssue::new(
                IssueCode::DuplicateNodeId,
                Some(node.id.clone()),
                "node id declared more than once",
            ));
        }
    }
}

fn check_references(
    definition: &WorkflowDefinition,
    ids: &HashSet<&NodeId>,
    issues: &mut Vec<ValidationIssue>,
) {
    for node in &definition.nodes {
        for (label, target) in [("on_success", &node.on_success), ("on_failure", &node.on_failure)]
        {
            if let Some(target) = target {
                if !ids.contains(target) {
                    issues.push(ValidationIssue::new(
                        IssueCode::UnknownTarget,
                        Some(node.id.clone()),
                        format!("{label} targets unknown node '{target}'"),
                    ));
                }
            }
        }

        for dep in &node.depends_on {
            if !ids.contains(dep) {
                issues.push(ValidationIssue::new(
                    IssueCode::UnknownDependency,
                    Some(node.id.clone()),
                    format!("depends_on references unknown node '{dep}'"),
                ));
            } else if dep == &node.id {
                issues.push(ValidationIssue::new(
                    IssueCode::SelfReference,
                    Some(node.id.clone()),
                    "node depends on itself",
                ));
            }
        }

        if let Some(when) = &node.when {
            if !ids.contains(&when.source) {
                issues.push(ValidationIssue::new(
                    IssueCode::UnknownWhenRef,
                    Some(node.id.clone()),
                    format!("when.ref references unknown node '{}'", when.source),
                ));
            } else if when.source == node.id {
                issues.push(ValidationIssue::new(
                    IssueCode::SelfReference,
                    Some(node.id.clone()),
                    "when.ref references the node itself",
                ));
            }
        }
    }
}

fn check_scopes(
    definition: &WorkflowDefinition,
    declared: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    for node in &definition.nodes {
        if !node.uses.trim().is_empty() && !declared.contains(node.uses.as_str()) {
            issues.push(ValidationIssue::new(
                IssueCode::UndeclaredCapability,
                Some(node.id.clone()),
                format!("capability '{}' is not covered by declared uses", node.uses),
            ));
        }
    }
}

fn check_cycles(definition: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
    // Kahn's algorithm over the dependency edges; leftover nodes sit on
    // a cycle.
    let mut indegree: HashMap<&NodeId, usize> = definition
        .nodes
        .iter()
        .map(|n| {
            let valid_deps = n
                .depends_on
                .iter()
                .filter(|d| definition.get_node(d).is_some() && *d != &n.id)
                .count();
            (&n.id, valid_deps)
        })
        .collect();

    let mut queue: VecDeque<&NodeId> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut resolved = 0usize;

    while let Some(current) = queue.pop_front() {
        resolved += 1;
        for dependent in definition.dependents_of(current) {
            if let Some(deg) = indegree.get_mut(&dependent.id) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(&dependent.id);
                }
            }
        }
    }

    if resolved < definition.nodes.len() {
        let mut stuck: Vec<String> = indegree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        stuck.sort();
        issues.push(ValidationIssue::new(
            IssueCode::DependencyCycle,
            None,
            format!("dependency cycle involving: {}", stuck.join(", ")),
        ));
    }
}

fn check_reachability(definition: &WorkflowDefinition, issues: &mut Vec<ValidationIssue>) {
    let entries = definition.entry_nodes();
    if entries.is_empty() {
        issues.push(ValidationIssue::new(
            IssueCode::NoEntryNode,
            None,
            "no node is eligible to start (every node has dependencies)",
        ));
        return;
    }

    // BFS over routing edges, implicit successors (sequential mode),
    // and dependency edges (graph mode).
    let sequential = definition.scheduling() == Scheduling::Sequential;
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = entries.iter().map(|n| n.id.clone()).collect();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(node) = definition.get_node(&current) else {
            continue;
        };

        let mut targets: Vec<NodeId> = Vec::new();
        if let Some(t) = &node.on_success {
            targets.push(t.clone());
        }
        if let Some(t) = &node.on_failure {
            targets.push(t.clone());
        }
        if sequential && node.on_success.is_none() {
            if let Some(next) = definition.successor_of(&current) {
                targets.push(next.id.clone());
            }
        }
        for dependent in definition.dependents_of(&current) {
            targets.push(dependent.id.clone());
        }

        for target in targets {
            if !visited.contains(&target) {
                queue.push_back(target);
            }
        }
    }

    for node in &definition.nodes {
        if !visited.contains(&node.id) {
            issues.push(ValidationIssue::new(
                IssueCode::UnreachableNode,
                Some(node.id.clone()),
                "node is not reachable from any entry node",
            ));
        }
    }
}
