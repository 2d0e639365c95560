//! Prometheus metrics for the job log server.
//!
//! Installs the process-global `metrics` recorder and serves its rendered output
//! at `GET /metrics` on a listener separate from the ingress routes.
//!
//! Metric names:
//!
//! | Name                                 | Kind    | Updated by            |
//! |--------------------------------------|---------|-----------------------|
//! | `jataka_events_recorded_total`       | counter | writer task           |
//! | `jataka_record_failures_total`       | counter | writer task           |
//! | `jataka_events_rejected_total`       | counter | ingress (`reason`)    |
//! | `jataka_reads_total`                 | counter | ingress (`route`)     |
//! | `jataka_replay_skipped_lines_total`  | counter | recovery              |
//! | `jataka_jobs`                        | gauge   | store                 |
//! | `jataka_records`                     | gauge   | store                 |
//! | `jataka_log_bytes`                   | gauge   | store                 |

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;

/// Error type for metrics installation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global metrics recorder has already been installed.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,
    /// The exporter refused to build or register the recorder.
    #[error("failed to install metrics recorder: {0}")]
    Build(String),
}

/// Cheaply cloneable handle to the installed Prometheus recorder.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    inner: Arc<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render the current metrics snapshot in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

static RECORDER_HANDLE: OnceLock<MetricsHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder.
///
/// Must be called once at startup before any `metrics` macro fires if their
/// values should be exported. A second call returns
/// [`MetricsError::AlreadyInstalled`].
///
/// # Errors
///
/// Returns [`MetricsError::AlreadyInstalled`] if a recorder from this module is
/// already installed, or [`MetricsError::Build`] if the exporter fails.
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    if RECORDER_HANDLE.get().is_some() {
        return Err(MetricsError::AlreadyInstalled);
    }

    let prom_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Build(e.to_string()))?;
    let handle = MetricsHandle {
        inner: Arc::new(prom_handle),
    };

    RECORDER_HANDLE
        .set(handle.clone())
        .map_err(|_| MetricsError::AlreadyInstalled)?;
    Ok(handle)
}

/// Returns the previously installed [`MetricsHandle`], if any.
pub fn get_installed_handle() -> Option<MetricsHandle> {
    RECORDER_HANDLE.get().cloned()
}

/// Build the axum [`Router`] that serves Prometheus metrics at `GET /metrics`.
pub fn metrics_router(handle: MetricsHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move {
                (
                    [(
                        axum::http::header::CONTENT_TYPE,
                        "text/plain; version=0.0.4",
                    )],
                    h.render(),
                )
            }
        }),
    )
}

/// Spawn an axum HTTP server serving `GET /metrics` on an already-bound listener.
///
/// Errors from the server are logged; the returned task then completes.
pub fn serve_metrics(handle: MetricsHandle, listener: tokio::net::TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => tracing::info!(addr = %addr, "Metrics server listening"),
            Err(e) => tracing::warn!(error = %e, "Metrics listener has no local address"),
        }

        if let Err(e) = axum::serve(listener, metrics_router(handle)).await {
            tracing::error!(error = %e, "Metrics server error");
        }
    })
}
