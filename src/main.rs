use std::future::IntoFuture;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use jataka_log::metrics::{install_recorder, serve_metrics};
use jataka_log::{AppState, Store, build_router, spawn_writer};

/// Server configuration parsed from environment variables.
///
/// # Environment Variables
///
/// | Variable                 | Required | Default                  | Description                      |
/// |--------------------------|----------|--------------------------|----------------------------------|
/// | `JATAKA_DATA`            | No       | `./_data/all_data.jsonl` | Path to the job log file         |
/// | `JATAKA_LISTEN`          | No       | `0.0.0.0:8989`           | HTTP socket address              |
/// | `JATAKA_METRICS_LISTEN`  | No       | --                       | Prometheus endpoint (off if unset) |
/// | `JATAKA_WRITER_CAPACITY` | No       | `64`                     | Writer channel bound             |
/// | `JATAKA_SHUTDOWN_TIMEOUT_MS` | No   | `5000`                   | Drain time for open connections  |
#[derive(Debug, Clone, PartialEq)]
struct Config {
    /// Path to the append-only job log file.
    data_path: PathBuf,
    /// Socket address the HTTP server listens on.
    listen_addr: SocketAddr,
    /// Socket address for `GET /metrics`. `None` disables the exporter.
    metrics_addr: Option<SocketAddr>,
    /// Bound on the writer task's request channel.
    writer_capacity: NonZeroUsize,
    /// How long open connections may keep running after a shutdown signal.
    shutdown_timeout: Duration,
}

/// Default log path when `JATAKA_DATA` is not set.
const DEFAULT_DATA_PATH: &str = "./_data/all_data.jsonl";

/// Default socket address when `JATAKA_LISTEN` is not set.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8989";

/// Default writer channel capacity when `JATAKA_WRITER_CAPACITY` is not set.
const DEFAULT_WRITER_CAPACITY: usize = 64;

/// Default drain time when `JATAKA_SHUTDOWN_TIMEOUT_MS` is not set.
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

impl Config {
    /// Parse server configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if:
    /// - `JATAKA_LISTEN` or `JATAKA_METRICS_LISTEN` is set but not a valid `SocketAddr`
    /// - `JATAKA_WRITER_CAPACITY` is set but not a valid nonzero `usize`
    /// - `JATAKA_SHUTDOWN_TIMEOUT_MS` is set but not a valid `u64`
    fn from_env() -> Result<Config, String> {
        let data_path = std::env::var("JATAKA_DATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_PATH));

        let listen_addr = match std::env::var("JATAKA_LISTEN") {
            Ok(val) => val
                .parse::<SocketAddr>()
                .map_err(|e| format!("JATAKA_LISTEN is not a valid socket address: {e}"))?,
            Err(_) => DEFAULT_LISTEN_ADDR
                .parse::<SocketAddr>()
                .expect("default listen address is valid"),
        };

        let metrics_addr = match std::env::var("JATAKA_METRICS_LISTEN") {
            Ok(val) => Some(val.parse::<SocketAddr>().map_err(|e| {
                format!("JATAKA_METRICS_LISTEN is not a valid socket address: {e}")
            })?),
            Err(_) => None,
        };

        let writer_capacity = match std::env::var("JATAKA_WRITER_CAPACITY") {
            Ok(val) => {
                let raw: usize = val
                    .parse()
                    .map_err(|e| format!("JATAKA_WRITER_CAPACITY is not a valid usize: {e}"))?;
                NonZeroUsize::new(raw)
                    .ok_or_else(|| "JATAKA_WRITER_CAPACITY must be nonzero".to_string())?
            }
            Err(_) => NonZeroUsize::new(DEFAULT_WRITER_CAPACITY)
                .expect("default writer capacity is nonzero"),
        };

        let shutdown_timeout = match std::env::var("JATAKA_SHUTDOWN_TIMEOUT_MS") {
            Ok(val) => Duration::from_millis(val.parse::<u64>().map_err(|e| {
                format!("JATAKA_SHUTDOWN_TIMEOUT_MS is not a valid u64: {e}")
            })?),
            Err(_) => Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        };

        Ok(Config {
            data_path,
            listen_addr,
            metrics_addr,
            writer_capacity,
            shutdown_timeout,
        })
    }
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads `RUST_LOG`, defaulting to `"info"`. Uses `try_init()` so a second call
/// is a silent no-op.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Waits for a shutdown signal: SIGINT on all platforms, plus SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing.
    init_tracing();

    // 2. Read configuration from environment variables.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    tracing::info!(data_path = %config.data_path.display(), "Data path");
    tracing::info!(listen_addr = %config.listen_addr, "Listen address");
    tracing::info!(writer_capacity = config.writer_capacity.get(), "Writer capacity");

    // 3. Install the metrics recorder before the store emits its first gauges.
    if let Some(metrics_addr) = config.metrics_addr {
        let handle = install_recorder().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to install metrics recorder");
            std::process::exit(1);
        });
        let listener = tokio::net::TcpListener::bind(metrics_addr)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(addr = %metrics_addr, error = %e, "Failed to bind metrics listener");
                std::process::exit(1);
            });
        serve_metrics(handle, listener);
    }

    // 4. Open the store and replay the log.
    let store = match Store::open(&config.data_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open store");
            std::process::exit(1);
        }
    };

    // 5. Hand the store to the writer task.
    let (writer_handle, read_index, mut join_handle) =
        spawn_writer(store, config.writer_capacity.get());

    // 6. Bind and serve.
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(addr = %config.listen_addr, error = %e, "Failed to bind listener");
            std::process::exit(1);
        });
    let addr = listener
        .local_addr()
        .expect("bound listener should have a local address");
    tracing::info!("Server listening on {addr}");

    let app = build_router(AppState::new(writer_handle.clone(), read_index));
    let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signal_tx.send(());
            })
            .into_future(),
    );

    // The writer only finishes early after a fatal store error. A server that
    // stops on its own drops `signal_tx`, which also ends the wait.
    tokio::select! {
        biased;
        _ = signal_rx => {}
        outcome = &mut join_handle => {
            match outcome {
                Ok(Err(e)) => tracing::error!(error = %e, "Writer stopped"),
                Ok(Ok(())) => tracing::error!("Writer stopped unexpectedly"),
                Err(e) => tracing::error!(error = %e, "Writer task panicked"),
            }
            std::process::exit(1);
        }
    }

    // 7. Give in-flight requests a bounded time to finish, then abandon them.
    tracing::info!("Shutting down");
    let mut exit_code = 0;
    match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "Server error");
            exit_code = 1;
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Server task panicked");
            exit_code = 1;
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = config.shutdown_timeout.as_millis() as u64,
                "Connections still open after shutdown timeout, abandoning them"
            );
            server.abort();
        }
    }

    // 8. Abandoned connections may still hold writer handles, so close the
    // writer explicitly and wait for the flush.
    writer_handle.close();
    drop(writer_handle);
    match join_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Final flush failed");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Writer task panicked");
            std::process::exit(1);
        }
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::remove_var("JATAKA_DATA") };
        unsafe { std::env::remove_var("JATAKA_LISTEN") };
        unsafe { std::env::remove_var("JATAKA_METRICS_LISTEN") };
        unsafe { std::env::remove_var("JATAKA_WRITER_CAPACITY") };
        unsafe { std::env::remove_var("JATAKA_SHUTDOWN_TIMEOUT_MS") };
    }

    #[test]
    #[serial]
    fn from_env_defaults_when_nothing_set() {
        clear_env();

        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.data_path, PathBuf::from("./_data/all_data.jsonl"));
        assert_eq!(
            config.listen_addr,
            "0.0.0.0:8989".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.metrics_addr, None);
        assert_eq!(config.writer_capacity.get(), 64);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(5000));
    }

    #[test]
    #[serial]
    fn from_env_custom_values() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_DATA", "/tmp/jobs.jsonl") };
        unsafe { std::env::set_var("JATAKA_LISTEN", "127.0.0.1:9999") };
        unsafe { std::env::set_var("JATAKA_METRICS_LISTEN", "127.0.0.1:9100") };
        unsafe { std::env::set_var("JATAKA_WRITER_CAPACITY", "8") };
        unsafe { std::env::set_var("JATAKA_SHUTDOWN_TIMEOUT_MS", "250") };

        let config = Config::from_env().expect("should succeed");
        assert_eq!(config.data_path, PathBuf::from("/tmp/jobs.jsonl"));
        assert_eq!(
            config.listen_addr,
            "127.0.0.1:9999".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            config.metrics_addr,
            Some("127.0.0.1:9100".parse::<SocketAddr>().unwrap())
        );
        assert_eq!(config.writer_capacity.get(), 8);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_invalid_listen_addr_returns_err() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_LISTEN", "not-an-addr") };

        let msg = Config::from_env().unwrap_err();
        assert!(msg.contains("JATAKA_LISTEN"), "got: {msg}");
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_invalid_metrics_addr_returns_err() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_METRICS_LISTEN", "localhost") };

        let msg = Config::from_env().unwrap_err();
        assert!(msg.contains("JATAKA_METRICS_LISTEN"), "got: {msg}");
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_zero_writer_capacity_returns_err() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_WRITER_CAPACITY", "0") };

        let msg = Config::from_env().unwrap_err();
        assert!(msg.contains("nonzero"), "got: {msg}");
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_non_numeric_writer_capacity_returns_err() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_WRITER_CAPACITY", "lots") };

        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_invalid_shutdown_timeout_returns_err() {
        clear_env();
        // SAFETY: serial test -- no concurrent env mutation.
        unsafe { std::env::set_var("JATAKA_SHUTDOWN_TIMEOUT_MS", "soon") };

        let msg = Config::from_env().unwrap_err();
        assert!(msg.contains("JATAKA_SHUTDOWN_TIMEOUT_MS"), "got: {msg}");
        clear_env();
    }

    #[test]
    fn init_tracing_does_not_panic() {
        init_tracing();
        init_tracing();
    }
}
