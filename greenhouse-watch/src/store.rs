//! The local cluster state store.
//!
//! The store holds the latest known `Cluster` snapshot. Readers never block and never observe a
//! partially applied update: every write swaps in a whole new `Snapshot`.
//!
//! Writes are tagged with a writer epoch. Each subscription writes under the epoch opened for
//! it, and an epoch is sealed the moment its subscription is cancelled. A write carrying any
//! epoch other than the current one is refused, which is what keeps an in-flight event of a
//! superseded subscription from overwriting the state of its replacement.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::error::{WatchError, WatchResult};
use crate::identity::ConsumerIdentity;
use greenhouse_core::crd::Cluster;

/// A writer epoch of the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// An immutable view of the store's state.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// The writer epoch under which writes are currently accepted.
    epoch: u64,
    /// Whether the current epoch has been sealed against further writes.
    sealed: bool,
    /// A counter incremented on every change to `cluster`.
    revision: u64,
    /// The consumer which opened the current epoch.
    owner: Option<ConsumerIdentity>,
    /// The latest known cluster.
    cluster: Option<Arc<Cluster>>,
}

impl Snapshot {
    pub fn cluster(&self) -> Option<&Arc<Cluster>> {
        self.cluster.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn owner(&self) -> Option<&ConsumerIdentity> {
        self.owner.as_ref()
    }
}

/// The in-memory store of the latest known cluster snapshot.
///
/// Clones share the same underlying state.
#[derive(Clone)]
pub struct ClusterStore {
    inner: Arc<ArcSwap<Snapshot>>,
    /// Revision notifications, used by readers which need to react to changes.
    changes_tx: Arc<watch::Sender<u64>>,
    changes_rx: watch::Receiver<u64>,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    /// Create a new, empty instance.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            inner: Default::default(),
            changes_tx: Arc::new(tx),
            changes_rx: rx,
        }
    }

    /// The latest known cluster, or `None` if no event has been applied yet.
    pub fn current(&self) -> Option<Arc<Cluster>> {
        self.inner.load().cluster.clone()
    }

    /// The full current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.load_full()
    }

    /// The revision of the current snapshot.
    pub fn revision(&self) -> u64 {
        self.inner.load().revision
    }

    /// A receiver of revision change notifications.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes_rx.clone()
    }

    /// Open a new writer epoch on behalf of the given consumer.
    ///
    /// If the previous epoch belonged to a different consumer, the current cluster is cleared so
    /// that the new consumer never observes state which belongs to another.
    pub(crate) fn begin_epoch(&self, owner: &ConsumerIdentity) -> Epoch {
        let changes_owner = |snap: &Snapshot| snap.owner.as_ref() != Some(owner) && snap.cluster.is_some();
        let prev = self.inner.rcu(|snap| Snapshot {
            epoch: snap.epoch + 1,
            sealed: false,
            revision: if changes_owner(&**snap) { snap.revision + 1 } else { snap.revision },
            owner: Some(owner.clone()),
            cluster: if changes_owner(&**snap) { None } else { snap.cluster.clone() },
        });
        if changes_owner(&*prev) {
            tracing::debug!(%owner, "consumer changed, cleared cluster snapshot");
            self.notify(prev.revision + 1);
        }
        Epoch(prev.epoch + 1)
    }

    /// Seal the given epoch so that no further write tagged with it is accepted.
    ///
    /// A no-op if the epoch has already been superseded or sealed. Returns `true` if this call
    /// sealed the epoch.
    pub(crate) fn seal(&self, epoch: Epoch) -> bool {
        self.update_if(|snap| {
            if snap.epoch != epoch.0 || snap.sealed {
                return None;
            }
            Some(Snapshot { sealed: true, ..snap.clone() })
        })
        .is_some()
    }

    /// Replace the current cluster with the given one, as the writer of the given epoch.
    ///
    /// The write is refused if the epoch is no longer current or has been sealed.
    pub(crate) fn replace(&self, epoch: Epoch, cluster: Cluster) -> WatchResult<u64> {
        let cluster = Arc::new(cluster);
        let mut current = 0;
        let res = self.update_if(|snap| {
            current = snap.epoch;
            if snap.epoch != epoch.0 || snap.sealed {
                return None;
            }
            Some(Snapshot {
                revision: snap.revision + 1,
                cluster: Some(cluster.clone()),
                ..snap.clone()
            })
        });
        match res {
            Some(snap) => {
                self.notify(snap.revision);
                Ok(snap.revision)
            }
            None => Err(WatchError::StaleEventDiscarded { epoch: epoch.0, current }),
        }
    }

    /// Atomically swap in the snapshot produced by `f`, unless `f` declines to produce one.
    fn update_if<F>(&self, mut f: F) -> Option<Arc<Snapshot>>
    where
        F: FnMut(&Snapshot) -> Option<Snapshot>,
    {
        let mut cur = self.inner.load();
        loop {
            let next = Arc::new(f(&cur)?);
            let prev = self.inner.compare_and_swap(&*cur, next.clone());
            if Arc::ptr_eq(&*prev, &*cur) {
                return Some(next);
            }
            cur = prev;
        }
    }

    fn notify(&self, revision: u64) {
        let _res = self.changes_tx.send(revision);
    }
}
