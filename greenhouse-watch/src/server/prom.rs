//! Prometheus exposition of the watch lifecycle counters.
//!
//! Serves subscription starts, cancellations & remote terminations, applied & discarded cluster
//! events, and K8s watcher errors, each labelled with the watched namespace & cluster.

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::get_metrics_recorder;

const METRICS_PATH: &str = "/metrics";
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Spawn the metrics server on `METRICS_PORT`, stopping once shutdown is signalled.
pub fn spawn_prom_server(config: &Config, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<Result<()>> {
    let handle = get_metrics_recorder(config).handle();
    let app = Router::new().route(METRICS_PATH, get(scrape_watch_metrics)).layer(AddExtensionLayer::new(handle));
    let server = axum::Server::bind(&([0, 0, 0, 0], config.metrics_port).into())
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _res = shutdown.recv().await;
        });
    tracing::info!(port = config.metrics_port, path = METRICS_PATH, "watch metrics server listening");
    tokio::spawn(server.map_err(anyhow::Error::from))
}

async fn scrape_watch_metrics(Extension(handle): Extension<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static(TEXT_FORMAT));
    (StatusCode::OK, headers, handle.render())
}
