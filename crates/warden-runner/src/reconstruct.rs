//! Resume-from-history reconstruction.
//!
//! A pure function so resume logic is testable without a running job:
//! given a definition and the history recorded so far, return exactly
//! the unexecuted remainder. A node already present in history is never
//! returned, whatever its status.

use std::collections::{HashMap, HashSet};
use warden_types::{NodeId, StepRecord, StepStatus};
use warden_workflow::{Scheduling, WorkflowDefinition};

/// The node ids still to run, in the order a fresh runner would reach
/// them. Sequential definitions are walked along their routing edges,
/// assuming the success path for nodes not yet recorded; graph
/// definitions return unrecorded nodes in declaration order, since the
/// scheduler orders them by dependency at run time.
pub fn reconstruct(definition: &WorkflowDefinition, history: &[StepRecord]) -> Vec<NodeId> {
    let recorded: HashMap<&NodeId, &StepRecord> =
        history.iter().map(|r| (&r.node_id, r)).collect();

    match definition.scheduling() {
        Scheduling::Graph => definition
            .nodes
            .iter()
            .filter(|n| !recorded.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect(),
        Scheduling::Sequential => {
            let mut remaining = Vec::new();
            let mut seen = HashSet::new();
            let mut cursor = definition.nodes.first().map(|n| n.id.clone());

            while let Some(id) = cursor {
                if !seen.insert(id.clone()) {
                    break;
                }
                let Some(node) = definition.get_node(&id) else {
                    break;
                };

                let next_on_success = || {
                    node.on_success
                        .clone()
                        .or_else(|| definition.successor_of(&id).map(|n| n.id.clone()))
                };

                cursor = match recorded.get(&id) {
                    Some(record) => match record.status {
                        StepStatus::Completed => next_on_success(),
                        StepStatus::Failed | StepStatus::Skipped => node.on_failure.clone(),
                    },
                    None => {
                        remaining.push(id.clone());
                        next_on_success()
                    }
                };
            }
            remaining
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_workflow::WorkflowNode;

    fn completed(node: &str) -> StepRecord {
        StepRecord {
            node_id: NodeId::new(node),
            status: StepStatus::Completed,
            receipt_id: None,
            output: None,
            attempts: 1,
            finished_at: Utc::now(),
        }
    }

    fn failed(node: &str) -> StepRecord {
        StepRecord {
            status: StepStatus::Failed,
            ..completed(node)
        }
    }

    fn pipeline() -> WorkflowDefinition {
        WorkflowDefinition::new("d", "Pipeline")
            .with_uses(["records"])
            .add_node(WorkflowNode::new("a", "records", "read"))
            .add_node(WorkflowNode::new("b", "records", "transform"))
            .add_node(WorkflowNode::new("c", "records", "write"))
    }

    #[test]
    fn test_empty_history_returns_whole_plan() {
        let ids = reconstruct(&pipeline(), &[]);
        assert_eq!(ids, vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")]);
    }

    #[test]
    fn test_completed_prefix_returns_suffix() {
        let ids = reconstruct(&pipeline(), &[completed("a")]);
        assert_eq!(ids, vec![NodeId::new("b"), NodeId::new("c")]);
    }

    #[test]
    fn test_completed_node_is_never_rerun() {
        let ids = reconstruct(&pipeline(), &[completed("a"), completed("b"), completed("c")]);
        assert!(ids.is_empty());
    }

    #[test]
    fn test_failure_edge_is_followed() {
        let definition = WorkflowDefinition::new("d", "Recovery")
            .with_uses(["records"])
            .add_node(WorkflowNode::new("risky", "records", "write").with_on_failure("cleanup"))
            .add_node(WorkflowNode::new("publish", "records", "write"))
            .add_node(WorkflowNode::new("cleanup", "records", "delete"));

        let ids = reconstruct(&definition, &[failed("risky")]);
        assert_eq!(ids, vec![NodeId::new("cleanup")]);
    }

    #[test]
    fn test_failed_node_without_edge_ends_plan() {
        let ids = reconstruct(&pipeline(), &[failed("a")]);
        assert!(ids.is_empty());
    }

    #[test]
    fn test_graph_mode_returns_unrecorded_nodes() {
        let definition = WorkflowDefinition::new("d", "Fanout")
            .with_uses(["records"])
            .add_node(WorkflowNode::new("seed", "records", "read"))
            .add_node(
                WorkflowNode::new("left", "records", "transform")
                    .with_depends_on([NodeId::new("seed")]),
            )
            .add_node(
                WorkflowNode::new("right", "records", "transform")
                    .with_depends_on([NodeId::new("seed")]),
            );

        let ids = reconstruct(&definition, &[completed("seed"), completed("left")]);
        assert_eq!(ids, vec![NodeId::new("right")]);
    }
}
