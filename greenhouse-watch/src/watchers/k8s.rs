use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{WatchError, WatchResult};
use crate::identity::ConsumerIdentity;
use crate::watchers::{TransportSubscription, WatchTransport};
use greenhouse_core::crd::{Cluster, RequiredMetadata};

const METRIC_CLUSTER_WATCHER_ERRORS: &str = "greenhouse_cluster_watcher_errors";

/// A result type used for CR events coming from K8s.
pub type ClusterCREventResult = std::result::Result<Event<Cluster>, WatcherError>;

/// A transport which watches the configured Cluster CR through the K8s API.
pub struct KubeClusterTransport {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
}

impl KubeClusterTransport {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        metrics::register_counter!(METRIC_CLUSTER_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors from the cluster watcher");
        Self { client, config }
    }

    fn list_params(&self) -> ListParams {
        ListParams {
            field_selector: Some(format!("metadata.name={}", &self.config.cluster_name)),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl WatchTransport for KubeClusterTransport {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn subscribe(&self, consumer: &ConsumerIdentity) -> WatchResult<TransportSubscription> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let params = self.list_params();

        // The initial list acts as the subscription's acknowledgement. The watcher itself is lazy
        // and would otherwise swallow an unreachable or forbidden API into its retry loop.
        api.list(&params).await.map_err(|err| WatchError::SubscribeFailed {
            consumer: consumer.clone(),
            source: anyhow::Error::from(err).context(format!("error listing Cluster CR {}/{}", &self.config.namespace, &self.config.cluster_name)),
        })?;

        let (cancel_tx, mut cancel_rx) = broadcast::channel::<()>(1);
        let retry = Duration::from_secs(self.config.watch_retry_seconds);
        let events = watcher(api, params)
            .take_until(async move {
                let _res = cancel_rx.recv().await;
            })
            .filter_map(move |res| handle_k8s_event(res, retry))
            .boxed();

        tracing::info!(%consumer, cluster = %self.config.cluster_name, "Cluster CR watcher initialized");
        Ok(TransportSubscription {
            events,
            cancel: Box::new(move || {
                let _res = cancel_tx.send(());
            }),
        })
    }
}

/// Handle watcher events coming from K8s.
///
/// Watcher errors are retried here, after a delay, rather than surfaced as terminal.
#[tracing::instrument(level = "debug", skip(res))]
pub(super) async fn handle_k8s_event(res: ClusterCREventResult, retry: Duration) -> Option<anyhow::Result<Cluster>> {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            tracing::error!(error = ?err, "error from k8s watch stream");
            metrics::increment_counter!(METRIC_CLUSTER_WATCHER_ERRORS);
            tokio::time::sleep(retry).await;
            return None;
        }
    };
    match event {
        Event::Applied(cluster) => Some(Ok(cluster)),
        Event::Deleted(cluster) => {
            tracing::warn!(name = cluster.name(), "Cluster CR deleted, keeping last known snapshot");
            None
        }
        Event::Restarted(clusters) => {
            tracing::debug!(len = clusters.len(), "Cluster CR watcher restarted");
            clusters.into_iter().next().map(Ok)
        }
    }
}
