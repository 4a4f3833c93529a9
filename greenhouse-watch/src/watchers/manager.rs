//! The watch lifecycle manager.
//!
//! A `WatchManager` binds at most one live subscription to one consumer identity at a time:
//!
//! - `Idle --start(id)--> Active(id)`: only for a non-empty identity. Starting the identity which
//!   is already active is a no-op; starting another identity stops the current subscription
//!   before the next one is requested.
//! - `Active --stop()--> Idle`: invokes the subscription's cancellation exactly once.
//!
//! Cancellation is synchronous, so there is no distinct terminating state: once `cancel` returns
//! the subscription's store epoch is sealed and no further event of it can reach the store.
//!
//! Events of an active subscription are applied by a forwarder task, one full snapshot replace
//! per event, in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::StreamExt;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{WatchError, WatchResult};
use crate::identity::ConsumerIdentity;
use crate::store::{ClusterStore, Epoch};
use crate::watchers::{ClusterEventStream, TransportCancel, TransportSubscription, WatchTransport};
use greenhouse_core::crd::Cluster;

const METRIC_SUBSCRIPTIONS_STARTED: &str = "greenhouse_watch_subscriptions_started";
const METRIC_SUBSCRIPTIONS_CANCELLED: &str = "greenhouse_watch_subscriptions_cancelled";
const METRIC_SUBSCRIPTIONS_TERMINATED: &str = "greenhouse_watch_subscriptions_terminated";
const METRIC_EVENTS_APPLIED: &str = "greenhouse_watch_events_applied";
const METRIC_STALE_EVENTS_DISCARDED: &str = "greenhouse_watch_stale_events_discarded";

/// A receiver of terminal errors of established subscriptions.
pub type TerminationRx = mpsc::Receiver<WatchError>;
type TerminationTx = mpsc::Sender<WatchError>;

/// The lifecycle state of a `WatchManager`.
pub enum WatchState {
    /// No subscription.
    Idle,
    /// A subscription was started & has not been stopped by this manager.
    ///
    /// The subscription may still have been terminated by the remote or cancelled through a
    /// clone of its handle; see `CancellationHandle::is_live`.
    Active(Subscription),
}

/// An active watch subscription.
pub struct Subscription {
    consumer: ConsumerIdentity,
    handle: CancellationHandle,
    created_at: OffsetDateTime,
}

impl Subscription {
    pub fn consumer(&self) -> &ConsumerIdentity {
        &self.consumer
    }

    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

/// A handle used to cancel a watch subscription.
///
/// Cancelling is synchronous and idempotent: the first call seals the subscription's store epoch,
/// stops its forwarder and releases the transport subscription; later calls do nothing.
#[derive(Clone, Default)]
pub struct CancellationHandle {
    inner: Option<Arc<HandleInner>>,
}

struct HandleInner {
    consumer: ConsumerIdentity,
    epoch: Epoch,
    store: ClusterStore,

    /// Set once the caller has cancelled this subscription.
    cancelled: AtomicBool,
    /// Set once the remote has terminated this subscription.
    terminated: AtomicBool,
    /// Set once the subscription's resources have been released, for either reason.
    released: AtomicBool,

    /// A channel used for stopping the forwarder task.
    shutdown: broadcast::Sender<()>,
    transport_cancel: TransportCancel,
}

impl CancellationHandle {
    /// A handle which is not bound to any subscription; cancelling it does nothing.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Cancel the subscription.
    ///
    /// Returns `true` if this call released the subscription, `false` if it was a no-op.
    pub fn cancel(&self) -> bool {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return false,
        };
        if inner.cancelled.swap(true, Ordering::SeqCst) || !inner.release() {
            tracing::trace!(consumer = %inner.consumer, "watch already released, cancel is a no-op");
            return false;
        }
        metrics::increment_counter!(METRIC_SUBSCRIPTIONS_CANCELLED);
        tracing::debug!(consumer = %inner.consumer, epoch = inner.epoch.get(), "watch cancelled");
        true
    }

    /// Check if this handle is a no-op handle.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Check if the subscription is still running, i.e. neither cancelled nor terminated.
    pub fn is_live(&self) -> bool {
        self.inner.as_ref().map(|inner| !inner.released.load(Ordering::SeqCst)).unwrap_or(false)
    }

    /// Check if the subscription was terminated by the remote.
    pub fn is_terminated(&self) -> bool {
        self.inner.as_ref().map(|inner| inner.terminated.load(Ordering::SeqCst)).unwrap_or(false)
    }

    /// The consumer of the subscription, if any.
    pub fn consumer(&self) -> Option<&ConsumerIdentity> {
        self.inner.as_ref().map(|inner| &inner.consumer)
    }
}

impl HandleInner {
    /// Release the subscription's resources, exactly once.
    ///
    /// The store epoch is sealed first, so that no event can be applied once this returns.
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.store.seal(self.epoch);
        let _res = self.shutdown.send(());
        (self.transport_cancel)();
        true
    }

    /// Apply an inbound event to the store.
    fn apply(&self, cluster: Cluster) {
        match self.store.replace(self.epoch, cluster) {
            Ok(revision) => {
                metrics::increment_counter!(METRIC_EVENTS_APPLIED);
                tracing::debug!(consumer = %self.consumer, revision, "cluster snapshot applied");
            }
            Err(err) => {
                metrics::increment_counter!(METRIC_STALE_EVENTS_DISCARDED);
                tracing::trace!(consumer = %self.consumer, error = %err);
            }
        }
    }

    /// Handle the remote end of the event stream.
    async fn terminate(&self, reason: String, terminations: &TerminationTx) {
        // A cancelled subscription's stream ending is expected, not a termination.
        if self.cancelled.load(Ordering::SeqCst) || !self.release() {
            return;
        }
        self.terminated.store(true, Ordering::SeqCst);
        metrics::increment_counter!(METRIC_SUBSCRIPTIONS_TERMINATED);
        tracing::error!(consumer = %self.consumer, %reason, "watch stream terminated by remote");
        let _res = terminations
            .send(WatchError::StreamTerminated {
                consumer: self.consumer.clone(),
                reason,
            })
            .await;
    }
}

/// Forward the events of a subscription into the store until it is cancelled or terminated.
async fn forward(inner: Arc<HandleInner>, mut events: ClusterEventStream, mut shutdown: BroadcastStream<()>, terminations: TerminationTx) {
    tracing::debug!(consumer = %inner.consumer, epoch = inner.epoch.get(), "watch forwarder started");
    let reason = loop {
        tokio::select! {
            biased;
            _ = shutdown.next() => {
                tracing::debug!(consumer = %inner.consumer, "watch forwarder stopped");
                return;
            }
            event = events.next() => match event {
                Some(Ok(cluster)) => inner.apply(cluster),
                Some(Err(err)) => break format!("{:#}", err),
                None => break String::from("remote closed the watch stream"),
            },
        }
    };
    inner.terminate(reason, &terminations).await;
}

/// Manages the lifecycle of the watch subscription of a consumer.
///
/// Dropping the manager stops its subscription.
pub struct WatchManager {
    /// The remote source of cluster snapshots.
    transport: Arc<dyn WatchTransport>,
    /// The store populated by this manager's subscriptions.
    store: ClusterStore,
    state: WatchState,
    /// A channel of terminal errors of established subscriptions.
    terminations: TerminationTx,
}

impl WatchManager {
    /// Create a new instance.
    pub fn new(transport: Arc<dyn WatchTransport>, store: ClusterStore) -> (Self, TerminationRx) {
        metrics::register_counter!(METRIC_SUBSCRIPTIONS_STARTED, metrics::Unit::Count, "watch subscriptions started");
        metrics::register_counter!(METRIC_SUBSCRIPTIONS_CANCELLED, metrics::Unit::Count, "watch subscriptions cancelled by their owner");
        metrics::register_counter!(METRIC_SUBSCRIPTIONS_TERMINATED, metrics::Unit::Count, "watch subscriptions terminated by the remote");
        metrics::register_counter!(METRIC_EVENTS_APPLIED, metrics::Unit::Count, "cluster snapshots applied to the store");
        metrics::register_counter!(METRIC_STALE_EVENTS_DISCARDED, metrics::Unit::Count, "events of superseded subscriptions discarded");
        let (tx, rx) = mpsc::channel(10);
        (
            Self {
                transport,
                store,
                state: WatchState::Idle,
                terminations: tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    /// The consumer of the live subscription, if any.
    pub fn active_consumer(&self) -> Option<&ConsumerIdentity> {
        match &self.state {
            WatchState::Active(sub) if sub.handle.is_live() => Some(&sub.consumer),
            _ => None,
        }
    }

    /// Watch the cluster on behalf of the given consumer.
    ///
    /// An empty identity makes this a no-op which returns a no-op handle, so callers need not
    /// check for an identity first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn watch(&mut self, consumer: &ConsumerIdentity) -> WatchResult<CancellationHandle> {
        match self.start(consumer).await {
            Err(WatchError::IdentityMissing) => {
                tracing::debug!("no consumer identity bound, watch is a no-op");
                Ok(CancellationHandle::noop())
            }
            res => res,
        }
    }

    /// Start a subscription for the given consumer.
    ///
    /// Suspends until the transport has acknowledged the subscription. A failure to subscribe is
    /// returned as is; nothing is retried here.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn start(&mut self, consumer: &ConsumerIdentity) -> WatchResult<CancellationHandle> {
        if consumer.is_empty() {
            return Err(WatchError::IdentityMissing);
        }
        if let WatchState::Active(sub) = &self.state {
            if &sub.consumer == consumer && sub.handle.is_live() {
                tracing::debug!("watch already active for consumer");
                return Ok(sub.handle.clone());
            }
        }

        // The previous subscription must be fully stopped before the next is requested.
        self.stop();

        let epoch = self.store.begin_epoch(consumer);
        let TransportSubscription { events, cancel } = self.transport.subscribe(consumer).await?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let inner = Arc::new(HandleInner {
            consumer: consumer.clone(),
            epoch,
            store: self.store.clone(),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            released: AtomicBool::new(false),
            shutdown,
            transport_cancel: cancel,
        });
        tokio::spawn(forward(inner.clone(), events, BroadcastStream::new(shutdown_rx), self.terminations.clone()));

        let handle = CancellationHandle { inner: Some(inner) };
        self.state = WatchState::Active(Subscription {
            consumer: consumer.clone(),
            handle: handle.clone(),
            created_at: OffsetDateTime::now_utc(),
        });
        metrics::increment_counter!(METRIC_SUBSCRIPTIONS_STARTED);
        tracing::info!(epoch = epoch.get(), "watch started");
        Ok(handle)
    }

    /// Stop the current subscription, if any.
    ///
    /// Returns `true` if a subscription was released by this call.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.state, WatchState::Idle) {
            WatchState::Active(sub) => sub.handle.cancel(),
            WatchState::Idle => false,
        }
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        self.stop();
    }
}
