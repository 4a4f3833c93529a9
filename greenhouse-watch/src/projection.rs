//! Read-side projection of the cluster state for display.

use greenhouse_core::crd::{Cluster, Condition, CONDITION_FALSE, CONDITION_TRUE, READY_CONDITION};

pub const ICON_READY: &str = "checkCircle";
pub const ICON_NOT_READY: &str = "error";
pub const ICON_UNKNOWN: &str = "help";

/// A node of a cluster together with its conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatusEntry {
    pub node_name: String,
    pub conditions: Vec<Condition>,
}

/// Project the given cluster into its list of nodes & their conditions.
///
/// Nodes are yielded in node name order, which depends only on the set of node names, so that
/// repeated projections of unchanged data never reorder. A node without conditions projects to
/// an empty list of conditions.
pub fn project(cluster: &Cluster) -> Vec<NodeStatusEntry> {
    let nodes = match &cluster.status {
        Some(status) => &status.nodes,
        None => return vec![],
    };
    nodes
        .iter()
        .map(|(name, node)| NodeStatusEntry {
            node_name: name.clone(),
            conditions: node.status_conditions.as_ref().map(|conds| conds.conditions.clone()).unwrap_or_default(),
        })
        .collect()
}

/// A display row of the node list: status icon, name, state & message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStatusRow {
    pub icon: &'static str,
    pub name: String,
    pub state: &'static str,
    pub message: String,
}

impl From<&NodeStatusEntry> for NodeStatusRow {
    fn from(entry: &NodeStatusEntry) -> Self {
        let ready = entry.conditions.iter().find(|cond| cond.r#type == READY_CONDITION);
        let (icon, state) = match ready.map(|cond| cond.status.as_str()) {
            Some(CONDITION_TRUE) => (ICON_READY, "Ready"),
            Some(CONDITION_FALSE) => (ICON_NOT_READY, "Not Ready"),
            _ => (ICON_UNKNOWN, "Unknown"),
        };
        // Without a message on the Ready condition, fall back to whatever the failing conditions report.
        let message = match ready.map(|cond| cond.message.as_str()) {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => entry
                .conditions
                .iter()
                .filter(|cond| !cond.is_true() && !cond.message.is_empty())
                .map(|cond| cond.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        };
        Self {
            icon,
            name: entry.node_name.clone(),
            state,
            message,
        }
    }
}
