use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::display::NodeListDisplay;
use crate::error::WatchError;
use crate::identity::{ConsumerIdentity, ConsumerIdentityBinding, UrlState};
use crate::server::spawn_prom_server;
use crate::store::ClusterStore;
use crate::utils::RetryTimer;
use crate::watchers::{KubeClusterTransport, Subscription, TerminationRx, WatchManager, WatchState};
use crate::worker::WatchWorker;

/// The application object of the cluster watch daemon.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The addressable state holding the bound consumer identity.
    url_state: UrlState,
    /// The worker keeping the consumer's watch alive.
    worker: WatchWorker,
    /// A channel of abnormal watch terminations.
    terminations: TerminationRx,
    /// The timer after which a terminated watch is re-established.
    retry: RetryTimer,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the node list display.
    display_handle: JoinHandle<Result<()>>,
    /// The join handle of the metrics server.
    metrics_server: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let transport = Arc::new(KubeClusterTransport::new(client, config.clone()));

        let url_state = match config.url_state.as_deref() {
            Some(token) => UrlState::decode(token).context("error decoding URL state")?,
            None => UrlState::new(),
        };
        let binding = ConsumerIdentityBinding::new(Arc::new(url_state.param(config.url_state_key.clone())));

        let (manager, terminations) = WatchManager::new(transport, ClusterStore::new());
        let display_handle = NodeListDisplay::new(manager.store().clone(), shutdown_tx.subscribe()).spawn();
        let metrics_server = spawn_prom_server(&config, shutdown_tx.subscribe());

        let mut worker = WatchWorker::new(binding, manager);
        worker
            .mount(&ConsumerIdentity::new(config.consumer_id.clone()))
            .await
            .context("error mounting cluster watch")?;
        match worker.manager().state() {
            WatchState::Active(sub) => log_established(sub),
            WatchState::Idle => tracing::warn!("no consumer identity configured, cluster is not watched"),
        }
        match url_state.encode() {
            Ok(token) => tracing::info!(url_state = %token, "consumer identity bound"),
            Err(err) => tracing::warn!(error = ?err, "error encoding URL state"),
        }

        Ok(Self {
            config,
            url_state,
            worker,
            terminations,
            retry: RetryTimer::new(),
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            display_handle,
            metrics_server,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        let mut res = Ok(());
        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                Some(err) = self.terminations.recv() => self.handle_termination(err),
                _ = self.retry.fired() => {
                    if let Err(err) = self.resync().await {
                        tracing::error!(error = ?err, "cluster watch could not be re-established, beginning shutdown");
                        res = Err(err);
                        let _ = self.shutdown_tx.send(());
                        break;
                    }
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("cluster watch is shutting down");
        self.worker.unmount();
        tracing::debug!(url_state = ?self.url_state.get(&self.config.url_state_key), "consumer binding at shutdown");
        if let Err(err) = self.display_handle.await.context("error joining node list display handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down node list display");
        }
        if let Err(err) = self.metrics_server.await.context("error joining metrics server handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down metrics server");
        }

        tracing::debug!("cluster watch shutdown complete");
        res
    }

    /// Handle the abnormal termination of the active watch.
    ///
    /// The watch is re-established for the currently bound identity once the retry timer fires.
    /// The last known snapshot stays readable in the meantime.
    #[tracing::instrument(level = "debug", skip(self, err))]
    fn handle_termination(&mut self, err: WatchError) {
        let manager = self.worker.manager();
        let terminated = matches!(manager.state(), WatchState::Active(sub) if sub.handle().is_terminated());
        let delay = Duration::from_secs(self.config.watch_retry_seconds);
        tracing::warn!(
            error = %err,
            terminated,
            revision = manager.store().revision(),
            has_snapshot = manager.store().current().is_some(),
            "cluster watch terminated, re-establishing in {:?}",
            delay
        );
        self.retry.schedule(delay);
    }

    /// Re-establish the watch of the currently bound identity. Only a failure to re-subscribe
    /// is fatal.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resync(&mut self) -> Result<()> {
        if self.worker.sync().await.context("error re-establishing cluster watch")? {
            tracing::info!(consumer = ?self.worker.manager().active_consumer().map(ConsumerIdentity::as_str), "cluster watch re-established");
        }
        Ok(())
    }
}

fn log_established(sub: &Subscription) {
    tracing::info!(consumer = %sub.consumer(), since = %sub.created_at(), "cluster watch established");
}
