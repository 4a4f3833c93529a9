//! Greenhouse CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns

mod cluster;
mod conditions;

use kube::Resource;

pub use cluster::{Cluster, ClusterAccessMode, ClusterSpec, ClusterStatus, NodeStatus};
pub use conditions::{
    Condition, StatusConditions, ALL_NODES_READY_CONDITION, CONDITION_FALSE, CONDITION_TRUE, CONDITION_UNKNOWN, HEADSCALE_READY_CONDITION,
    KUBE_CONFIG_VALID_CONDITION, READY_CONDITION,
};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;
}

impl RequiredMetadata for Cluster {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }
}
