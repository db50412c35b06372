mod api;
mod artifacts;
mod bootstrap;
mod config;
mod conflict;
mod error;
mod reconcile;
mod reload;
mod status;
mod watch;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::artifacts::ArtifactStore;
use crate::bootstrap::Advertiser;
use crate::config::Config;
use crate::reconcile::Reconciler;
use crate::reload::{CommandReloader, ReloadGate};
use crate::status::StatusSnapshot;
use crate::watch::{KubeServiceApi, WatchSource};

#[tokio::main]
async fn main() -> Result<()> {
    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let (config, config_path) = Config::resolve(explicit, |key| std::env::var(key).ok())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("avahi_advertiserd={}", config.log.level))
            }),
        )
        .init();

    tracing::info!("Starting avahi-advertiserd");
    match &config_path {
        Some(path) => tracing::info!("Loaded config from {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    let store = ArtifactStore::open(&config.avahi)?;
    let mut reconciler = Reconciler::new(store);
    reconciler
        .recover()
        .context("Failed to read existing advertisements")?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let api = KubeServiceApi::new(client, config.watch.watch_timeout_secs);

    let node = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let (status_tx, status_rx) = tokio::sync::watch::channel(StatusSnapshot::starting(node.clone()));

    let gate = ReloadGate::new(CommandReloader::from_config(&config.avahi));
    let mut advertiser = Advertiser::new(reconciler, gate, status_tx, node, config.avahi.reload_retry());

    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signals: {}", e),
        }
        signal_cancel.cancel();
    });

    let server_handle = if config.api.enabled {
        let app = api::routes::router(api::routes::AppState { status_rx });
        let listener = tokio::net::TcpListener::bind(&config.api.listen)
            .await
            .with_context(|| format!("Failed to bind to {}", config.api.listen))?;
        tracing::info!("Status API listening on {}", config.api.listen);

        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        }))
    } else {
        None
    };

    let resource_version = advertiser
        .bootstrap(&api)
        .await
        .context("Failed to list services")?;

    let mut source = WatchSource::new(api, &config.watch, resource_version);
    advertiser.run(&mut source, &cancel).await;

    cancel.cancel();
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
