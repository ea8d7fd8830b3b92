//! contactlink HTTP server
//!
//! Opens (or creates) the contact database, then serves the identify API
//! until Ctrl-C or SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use contactlink::config::ServerConfig;
use contactlink::storage::{open_database, ContactStore, PersistentContactStore, StorageError};
use contactlink::transport;
use contactlink::IdentityResolver;

/// Open the database, retrying up to `init_retries` times.
async fn open_with_retry(config: &ServerConfig) -> Result<PersistentContactStore, StorageError> {
    let mut attempt = 1;
    loop {
        match open_database(&config.data_dir, Some(config.persistent_config())) {
            Ok(store) => return Ok(store),
            Err(e) if attempt < config.init_retries => {
                tracing::warn!(
                    attempt,
                    retries = config.init_retries,
                    error = %e,
                    "failed to open database; retrying"
                );
                attempt += 1;
                tokio::time::sleep(config.retry_delay()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("contactlink=info")),
        )
        .init();

    let config = ServerConfig::parse();

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(host = %config.host, port = config.port, error = %e, "invalid bind address");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(data_dir = %config.data_dir.display(), "opening database");
    let store = match open_with_retry(&config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, retries = config.init_retries, "could not open database");
            return ExitCode::FAILURE;
        }
    };
    match store.len() {
        Ok(n) => tracing::info!(contacts = n, "database ready"),
        Err(e) => tracing::warn!(error = %e, "database opened but could not be counted"),
    }

    let resolver = Arc::new(IdentityResolver::new(store.clone()));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "contactlink server listening");

    if let Err(e) = transport::serve(listener, resolver, shutdown_signal()).await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    match store.compact() {
        Ok(result) => tracing::info!(
            contacts = result.contacts_compacted,
            wal_size_after = result.wal_size_after,
            "final compaction done"
        ),
        Err(e) => tracing::warn!(error = %e, "final compaction failed; WAL will be replayed on next start"),
    }

    ExitCode::SUCCESS
}
