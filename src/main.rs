use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crhub::config::Config;
use crhub::gate::ReviewGate;
use crhub::github::OctocrabClient;
use crhub::poller::Poller;
use crhub::server::{AppState, build_router};
use crhub::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "crhub.toml".to_string());
    let config = Arc::new(
        Config::load(Path::new(&config_path))
            .with_context(|| format!("loading configuration from {config_path}"))?,
    );

    let store = Store::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let client = OctocrabClient::from_token(config.github_token.clone())
        .context("building GitHub client")?;

    let gate = Arc::new(ReviewGate::new(
        Arc::clone(&config),
        store,
        client.clone(),
    ));

    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        Arc::clone(&gate),
        client,
        Arc::clone(&config),
        shutdown.clone(),
    );
    let poller_task = tokio::spawn(poller.run());

    let app = build_router(AppState::new(gate, config.webhook_secret.clone()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, repos = config.repos.len(), "listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    poller_task.await.context("poller task panicked")?;
    Ok(())
}
