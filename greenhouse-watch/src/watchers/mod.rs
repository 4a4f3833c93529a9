//! Cluster watch subscriptions.

mod k8s;
mod manager;
#[cfg(test)]
mod manager_test;
mod transport;

pub use k8s::KubeClusterTransport;
pub use manager::{CancellationHandle, Subscription, TerminationRx, WatchManager, WatchState};
pub use transport::{ClusterEventStream, TransportCancel, TransportSubscription, WatchTransport};
