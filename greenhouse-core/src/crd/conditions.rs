//! Status conditions shared by clusters and nodes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The condition type reporting overall readiness.
pub const READY_CONDITION: &str = "Ready";
/// The condition type reporting headscale connectivity.
pub const HEADSCALE_READY_CONDITION: &str = "HeadscaleReady";
/// The condition type reporting the validity of the stored kubeconfig.
pub const KUBE_CONFIG_VALID_CONDITION: &str = "KubeConfigValid";
/// The condition type reporting whether every node of a cluster is ready.
pub const ALL_NODES_READY_CONDITION: &str = "AllNodesReady";

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// A single status condition.
///
/// All fields are passed through as reported by the API server; nothing here is reinterpreted.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The type of this condition, e.g. `Ready`.
    pub r#type: String,
    /// The status of this condition, one of `True`, `False` or `Unknown`.
    pub status: String,
    /// The last time the status of this condition changed, RFC 3339 formatted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// A machine readable reason for the condition's last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// A human readable message with details about the last transition.
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Create a new condition of the given type & status.
    pub fn new(r#type: impl Into<String>, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            status: status.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Check if this condition is semantically equal to the other, ignoring its transition time.
    pub fn equal(&self, other: &Self) -> bool {
        self.r#type == other.r#type && self.status == other.status && self.reason == other.reason && self.message == other.message
    }

    /// Check if the status of this condition is `True`.
    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

/// An ordered list of conditions, at most one per type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusConditions {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl StatusConditions {
    /// Get the condition of the given type, if any.
    pub fn get(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|condition| condition.r#type == r#type)
    }

    /// Check if the `Ready` condition is present and true.
    pub fn is_ready_true(&self) -> bool {
        self.get(READY_CONDITION).map(Condition::is_true).unwrap_or(false)
    }

    /// Set the given conditions.
    ///
    /// Conditions of a new type are appended. An existing condition keeps its transition time
    /// unless its status changes, in which case it is replaced wholesale.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            let existing = match self.conditions.iter_mut().find(|existing| existing.r#type == condition.r#type) {
                Some(existing) => existing,
                None => {
                    self.conditions.push(condition);
                    continue;
                }
            };
            if existing.equal(&condition) {
                continue;
            }
            if existing.status == condition.status {
                existing.reason = condition.reason;
                existing.message = condition.message;
            } else {
                *existing = condition;
            }
        }
    }
}
