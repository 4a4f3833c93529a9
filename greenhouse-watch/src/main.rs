//! The Greenhouse cluster watch daemon.
//!
//! Watches a single Cluster CR on behalf of a consumer & renders its node list.

mod app;
mod config;
mod display;
mod error;
#[cfg(test)]
mod fixtures;
mod identity;
mod projection;
mod server;
mod store;
mod utils;
mod watchers;
mod worker;

use std::io::Write;
use std::mem::MaybeUninit;
use std::sync::{Arc, Once};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use tokio::sync::broadcast;
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    let recorder = get_metrics_recorder(&cfg);
    metrics::set_recorder(recorder).context("error setting prometheus metrics recorder")?;

    tracing::info!(
        namespace = %cfg.namespace,
        cluster = %cfg.cluster_name,
        consumer = %cfg.consumer_id,
        metrics_port = %cfg.metrics_port,
        "starting Greenhouse cluster watch",
    );
    let (shutdown_tx, _) = broadcast::channel(10);
    let res = App::new(cfg, shutdown_tx)
        .await?
        .spawn()
        .await
        .context("error joining app task")
        .and_then(|res| res);
    if let Err(err) = &res {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}

/// Get a handle to the metrics recorder, initializing it as needed.
pub fn get_metrics_recorder(config: &Config) -> &'static PrometheusRecorder {
    static mut RECORDER: MaybeUninit<PrometheusRecorder> = MaybeUninit::uninit();
    static ONCE: Once = Once::new();
    unsafe {
        ONCE.call_once(|| {
            RECORDER.write(
                PrometheusBuilder::new()
                    .add_global_label("namespace", config.namespace.clone())
                    .add_global_label("cluster", config.cluster_name.clone())
                    .build(),
            );
        });
        RECORDER.assume_init_ref()
    }
}
