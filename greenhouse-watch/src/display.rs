//! A log-rendering display of the cluster's node list.
//!
//! Renders the fixed four column node table (status icon, name, state, message) every time the
//! store changes. It only ever reads the store.

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::identity::ConsumerIdentity;
use crate::projection::{project, NodeStatusRow};
use crate::store::ClusterStore;
use greenhouse_core::crd::{Cluster, RequiredMetadata};

/// The header of the node table; the first column holds the status icon.
const HEADER: [&str; 4] = ["monitorHeart", "Name", "State", "Message"];

/// A display task rendering the node list of the watched cluster.
pub struct NodeListDisplay {
    /// The store to render.
    store: ClusterStore,
    /// A channel used for triggering graceful shutdown.
    shutdown: BroadcastStream<()>,
}

impl NodeListDisplay {
    /// Create a new instance.
    pub fn new(store: ClusterStore, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            store,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut changes = WatchStream::new(self.store.changes());
        tracing::info!("node list display initialized");
        self.render();
        loop {
            tokio::select! {
                Some(_revision) = changes.next() => self.render(),
                _ = self.shutdown.next() => break,
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn render(&self) {
        let snapshot = self.store.snapshot();
        let cluster = match snapshot.cluster() {
            Some(cluster) => cluster,
            None => {
                tracing::info!("waiting for the first cluster snapshot");
                return;
            }
        };
        let rows = rows(cluster);
        tracing::info!(
            cluster = cluster.name(),
            consumer = ?snapshot.owner().map(ConsumerIdentity::as_str),
            revision = snapshot.revision(),
            nodes = rows.len(),
            "node list\n{}",
            render_table(&rows)
        );
    }
}

/// Build the display rows of the given cluster.
pub fn rows(cluster: &Cluster) -> Vec<NodeStatusRow> {
    project(cluster).iter().map(NodeStatusRow::from).collect()
}

/// Render the given rows as an aligned text table, header first.
pub fn render_table(rows: &[NodeStatusRow]) -> String {
    let cells: Vec<[&str; 4]> = std::iter::once(HEADER)
        .chain(rows.iter().map(|row| [row.icon, row.name.as_str(), row.state, row.message.as_str()]))
        .collect();
    let mut widths = [0usize; 4];
    for line in cells.iter() {
        for (width, cell) in widths.iter_mut().zip(line.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }
    cells
        .iter()
        .map(|line| {
            let padded: Vec<String> = line.iter().zip(widths.iter()).map(|(cell, width)| format!("{:<width$}", cell, width = width)).collect();
            padded.join("  ").trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
