//! Prometheus metrics for the ingestion service.
//!
//! Call [`init_metrics`] once at startup, then [`start_metrics_server`]
//! to expose the `/metrics` endpoint. Recording sites use the `metrics`
//! macros directly; descriptions are registered here so scrapes carry
//! help text.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed
/// once per process).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");
    register_metrics();
    handle
}

/// Like [`init_metrics`] but returns `None` when a recorder is already
/// installed. Used by tests.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Serve the `/metrics` endpoint on `port`. Spawns a background task and
/// returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(%err, "metrics server exited");
        }
    });

    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "ingest_messages_processed_total",
        "Messages materialized into entity tables (label: category)"
    );
    describe_counter!(
        "ingest_messages_failed_total",
        "Messages retired with a permanent error (label: category)"
    );
    describe_gauge!(
        "ingest_sync_height",
        "Height of the last materialized message (label: category)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_metrics_idempotent() {
        let first = try_init_metrics();
        let second = try_init_metrics();
        // At most one install can succeed.
        assert!(first.is_none() || second.is_none());
    }

    #[test]
    fn test_register_metrics_does_not_panic() {
        let _ = try_init_metrics();
        register_metrics();
        register_metrics();
    }
}
