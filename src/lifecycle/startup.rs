//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize subsystems in dependency order
//! - Start background tasks (sweeper, config watcher, metrics)
//! - Bind listeners and begin accepting traffic
//! - Tear everything down in reverse on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - The reputation store is flushed even when the server exits with an error

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinError;

use crate::admin::admin_router;
use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, load_from_env, ConfigError, ShieldConfig};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::{SecurityGateway, StoreError};

/// Fatal startup and run-time errors of the gateway process.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("reputation store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// Load from `path`, or from defaults plus environment when no file is given.
pub fn load(path: Option<&Path>) -> Result<ShieldConfig, GatewayError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    Ok(config)
}

async fn bind(address: &str) -> Result<TcpListener, GatewayError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| GatewayError::Bind {
            address: address.to_string(),
            source,
        })
}

/// Run the gateway until Ctrl+C / SIGTERM or until the server fails.
pub async fn run(config: ShieldConfig, config_path: Option<PathBuf>) -> Result<(), GatewayError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(SecurityGateway::open(&config.security).await?);
    let shutdown = Shutdown::new();
    let sweeper = gateway.spawn_sweeper(shutdown.subscribe());

    // Hot reload. The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &config_path {
        Some(path) => match ConfigWatcher::start(path) {
            Ok((watcher, rx)) => (Some(watcher), rx),
            Err(e) => {
                tracing::warn!(error = %e, path = ?path, "Config watcher unavailable, hot reload disabled");
                let (_tx, rx) = mpsc::unbounded_channel();
                (None, rx)
            }
        },
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let admin_task = if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        let router = admin_router(gateway.clone(), &config.admin.api_key);
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await
        }))
    } else {
        None
    };

    let listener = bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        environment = %config.security.environment,
        "Gateway listening"
    );
    let server = HttpServer::new(&config, gateway.clone());
    let mut server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    let finished = tokio::select! {
        _ = shutdown.trigger_on_signal() => None,
        result = &mut server_task => Some(result),
    };
    shutdown.trigger();

    let served = match finished {
        Some(result) => result,
        None => server_task.await,
    };
    if let Some(admin) = admin_task {
        if let Ok(Err(e)) = admin.await {
            tracing::warn!(error = %e, "Admin API stopped with error");
        }
    }
    let _ = sweeper.await;

    gateway.close().await?;
    tracing::info!("Shutdown complete");

    served??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let err = bind(&address).await.unwrap_err();
        assert!(matches!(err, GatewayError::Bind { .. }));
        assert!(err.to_string().contains(&address));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load(Some(Path::new("/nonexistent/request-shield.toml"))).unwrap_err();
        assert!(matches!(err, GatewayError::Config(ConfigError::Io(_))));
    }
}
