use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{WatchError, WatchResult};
use crate::identity::ConsumerIdentity;
use crate::store::ClusterStore;
use crate::watchers::{TransportSubscription, WatchTransport};
use greenhouse_core::crd::{Cluster, ClusterSpec, ClusterStatus, Condition, NodeStatus, StatusConditions};

/// Build a cluster CR bearing the given nodes, each with its optional list of conditions.
pub fn cluster(name: &str, nodes: Vec<(&str, Option<Vec<Condition>>)>) -> Cluster {
    let mut cluster = Cluster::new(name, ClusterSpec::default());
    cluster.status = Some(ClusterStatus {
        nodes: nodes
            .into_iter()
            .map(|(node, conditions)| {
                let status = NodeStatus {
                    status_conditions: conditions.map(|conditions| StatusConditions { conditions }),
                    ready: false,
                };
                (node.to_string(), status)
            })
            .collect(),
        ..Default::default()
    });
    cluster
}

/// Wait until the given store reaches at least the given revision.
pub async fn wait_for_revision(store: &ClusterStore, revision: u64) -> Result<()> {
    let mut changes = store.changes();
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.revision() < revision {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .with_context(|| format!("timeout waiting for store to reach revision {}", revision))
}

/// Give spawned tasks a chance to process anything already queued for them.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// An operation observed by the `MockTransport`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportOp {
    Subscribe(String),
    Cancel(String),
}

type EventTx = mpsc::UnboundedSender<anyhow::Result<Cluster>>;

/// A scripted in-memory transport.
///
/// Every subscription is backed by a channel whose sender is retained here, so tests decide
/// exactly which events each subscription sees & when its stream ends.
#[derive(Clone, Default)]
pub struct MockTransport {
    ops: Arc<Mutex<Vec<TransportOp>>>,
    senders: Arc<Mutex<HashMap<String, Vec<EventTx>>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All observed operations, in order of occurrence.
    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().expect("ops lock poisoned").clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, TransportOp::Subscribe(_))).count()
    }

    pub fn cancel_count(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, TransportOp::Cancel(_))).count()
    }

    /// The number of live subscriptions, i.e. those subscribed but not yet cancelled.
    pub fn live_count(&self) -> usize {
        self.subscribe_count() - self.cancel_count()
    }

    /// The event sender of the most recent subscription of the given consumer.
    pub fn sender(&self, consumer: &str) -> EventTx {
        let senders = self.senders.lock().expect("senders lock poisoned");
        senders.get(consumer).and_then(|txs| txs.last()).cloned().expect("no subscription found for consumer")
    }

    /// Emit an event on the most recent subscription of the given consumer.
    pub fn emit(&self, consumer: &str, cluster: Cluster) {
        let _res = self.sender(consumer).send(Ok(cluster));
    }

    /// Close all streams of the given consumer, as if the remote hung up.
    pub fn close(&self, consumer: &str) {
        self.senders.lock().expect("senders lock poisoned").remove(consumer);
    }

    /// Cause the next subscribe call to fail.
    pub fn fail_next_subscribe(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl WatchTransport for MockTransport {
    async fn subscribe(&self, consumer: &ConsumerIdentity) -> WatchResult<TransportSubscription> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(WatchError::SubscribeFailed {
                consumer: consumer.clone(),
                source: anyhow::anyhow!("remote rejected the subscription"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.ops.lock().expect("ops lock poisoned").push(TransportOp::Subscribe(consumer.to_string()));
        self.senders.lock().expect("senders lock poisoned").entry(consumer.to_string()).or_default().push(tx);

        let (ops, id) = (self.ops.clone(), consumer.to_string());
        Ok(TransportSubscription {
            events: UnboundedReceiverStream::new(rx).boxed(),
            cancel: Box::new(move || ops.lock().expect("ops lock poisoned").push(TransportOp::Cancel(id.clone()))),
        })
    }
}
