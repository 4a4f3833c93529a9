//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port on which Prometheus metrics are served.
    #[serde(default = "Config::default_metrics_port")]
    pub metrics_port: u16,

    /// The Kubernetes namespace of the watched Cluster CR.
    pub namespace: String,
    /// The name of the Cluster CR to watch.
    pub cluster_name: String,

    /// The identity of the consumer on whose behalf the cluster is watched.
    pub consumer_id: String,
    /// The encoded addressable state to start from, as produced by `UrlState::encode`.
    #[serde(default)]
    pub url_state: Option<String>,
    /// The key of the addressable state under which the consumer identity is bound.
    #[serde(default = "Config::default_url_state_key")]
    pub url_state_key: String,

    /// The number of seconds to wait before the K8s watcher is polled again after an error.
    #[serde(default = "Config::default_watch_retry_seconds")]
    pub watch_retry_seconds: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    fn default_metrics_port() -> u16 {
        7002
    }

    fn default_url_state_key() -> String {
        "consumer".into()
    }

    fn default_watch_retry_seconds() -> u64 {
        10
    }
}
