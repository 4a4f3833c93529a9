//! Cluster CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::conditions::StatusConditions;

pub type Cluster = ClusterCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the Cluster resource.
///
/// A Cluster represents a Kubernetes cluster onboarded to Greenhouse. The Greenhouse operator
/// continuously reports the state of the cluster and each of its nodes into the CR's status,
/// which is what the watch components of this project consume.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "ClusterCRD",
    status = "ClusterStatus",
    group = "greenhouse.sap",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "cluster",
    printcolumn = r#"{"name":"AccessMode","type":"string","jsonPath":".spec.accessMode"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.kubernetesVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// The mode by which Greenhouse reaches the cluster's API server.
    #[serde(default)]
    pub access_mode: ClusterAccessMode,
}

/// The access mode of a cluster.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClusterAccessMode {
    /// The API server is reached directly.
    Direct,
    /// The API server is reached through the headscale VPN.
    Headscale,
}

impl Default for ClusterAccessMode {
    fn default() -> Self {
        Self::Direct
    }
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// The Kubernetes version reported by the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    /// Conditions describing the cluster as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_conditions: Option<StatusConditions>,
    /// The status of each node of the cluster, keyed by node name.
    ///
    /// A sorted map is used so that iteration order depends only on the set of node names,
    /// never on the order in which the API server happened to serialize them.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStatus>,
}

/// The status of a single cluster node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// The conditions reported for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_conditions: Option<StatusConditions>,
    /// Whether the node was last reported as ready.
    #[serde(default)]
    pub ready: bool,
}

