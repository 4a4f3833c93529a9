use futures::stream::BoxStream;

use crate::error::WatchResult;
use crate::identity::ConsumerIdentity;
use greenhouse_core::crd::Cluster;

/// A stream of cluster snapshots.
///
/// An `Err` item or the end of the stream is terminal.
pub type ClusterEventStream = BoxStream<'static, anyhow::Result<Cluster>>;

/// A function which terminates a subscription & releases its resources.
pub type TransportCancel = Box<dyn Fn() + Send + Sync>;

/// A subscription established by a `WatchTransport`.
pub struct TransportSubscription {
    /// The stream of cluster snapshots of this subscription.
    pub events: ClusterEventStream,
    /// The cancellation function of this subscription.
    pub cancel: TransportCancel,
}

/// A remote source of cluster snapshots.
///
/// Any retry policy belongs to the implementation; callers treat a failure to subscribe and
/// the end of an event stream as final.
#[async_trait::async_trait]
pub trait WatchTransport: Send + Sync {
    /// Subscribe to cluster snapshots on behalf of the given consumer.
    ///
    /// Returns `WatchError::SubscribeFailed` if the subscription could not be established.
    async fn subscribe(&self, consumer: &ConsumerIdentity) -> WatchResult<TransportSubscription>;
}
