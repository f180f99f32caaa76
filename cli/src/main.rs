//! slipstream - binary entry point.
//!
//! Loads configuration, opens the account store, assembles the shared
//! state, and serves the gateway until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use slipstream_config::Config;
use slipstream_pool::JsonFileStore;
use slipstream_server::AppState;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut config = Config::load().context("load configuration")?;
    config.apply_env_overrides();

    let accounts_path = config.proxy.accounts_path();
    let store = JsonFileStore::new(&accounts_path);
    tracing::info!(path = %accounts_path.display(), "using account store");

    let bind = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(
        AppState::new(config, store)
            .await
            .context("assemble gateway state")?,
    );

    let account_count = state.pool.account_count().await;
    if account_count == 0 {
        tracing::warn!("no accounts in the store; every request will fail until one is added");
    } else {
        tracing::info!(account_count, "account pool ready");
    }

    let router = slipstream_server::router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(addr = %bind, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
}
