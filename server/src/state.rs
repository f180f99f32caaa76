//! Shared per-process state.

use std::sync::Arc;
use std::time::Duration;

use slipstream_config::Config;
use slipstream_pool::{AccountPool, AccountStore, OAuthClient, PoolError};
use slipstream_translate::signature::SignatureCache;
use slipstream_types::ModelRegistry;
use slipstream_upstream::{UpstreamClient, resolve_endpoint};

/// How often the signature-cache sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct AppState<S: AccountStore> {
    pub config: Config,
    pub registry: ModelRegistry,
    pub cache: Arc<SignatureCache>,
    pub pool: AccountPool<S>,
    pub upstream: UpstreamClient,
}

impl<S: AccountStore> AppState<S> {
    /// Assemble the state from configuration and a loaded store. Spawns the
    /// cache sweeper; the task dies with the state.
    pub async fn new(config: Config, store: S) -> Result<Self, PoolError> {
        let registry = ModelRegistry::new(
            config.proxy.route_pairs(),
            config.proxy.default_model.clone(),
        );

        let endpoints = config
            .proxy
            .endpoint_order()
            .iter()
            .filter_map(|alias| {
                let endpoint = resolve_endpoint(alias);
                if endpoint.is_none() {
                    tracing::warn!(alias = %alias, "unknown endpoint alias in config; skipping");
                }
                endpoint
            })
            .collect();

        let oauth = match (&config.proxy.oauth_client_id, &config.proxy.oauth_client_secret) {
            (Some(id), Some(secret)) => {
                OAuthClient::new(slipstream_pool::DEFAULT_TOKEN_URL, id.clone(), secret.clone())
            }
            _ => OAuthClient::default(),
        };

        let pool =
            AccountPool::load(store, oauth, config.proxy.fallback_project_id.clone()).await?;

        let cache = Arc::new(SignatureCache::new());
        let _sweeper = SignatureCache::spawn_sweeper(&cache, SWEEP_INTERVAL);

        Ok(Self {
            registry,
            cache,
            pool,
            upstream: UpstreamClient::new(endpoints),
            config,
        })
    }
}
