use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use config::Config;
use secrecy::SecretString;
use tracing::info;

use crate::catalog::CatalogClient;
use crate::config::ShopWindowConfig;
use crate::handler;
use crate::query::QueryCache;
use crate::state::AppState;
use crate::store::CacheStore;

pub async fn run_server(config_path: PathBuf) -> Result<()> {
    // Load configuration
    let config_str = config_path.display().to_string();
    let config = Config::builder()
        .add_source(config::File::with_name(&config_str))
        .build()
        .with_context(|| format!("Failed to load config from: {}", config_str))?;

    let shopwindow_config: ShopWindowConfig = config
        .try_deserialize()
        .with_context(|| format!("Failed to parse config from: {}", config_str))?;

    info!(
        "Loaded config from {}: upstream {}, cache {} (max_entries: {}, ttl_secs: {:?})",
        config_str,
        shopwindow_config.upstream.products_url,
        shopwindow_config.cache.eviction,
        shopwindow_config.cache.max_entries,
        shopwindow_config.cache.ttl_secs,
    );

    // Optional upstream credential, kept out of the config file
    let api_key = std::env::var("SHOPWINDOW_API_KEY")
        .ok()
        .map(SecretString::from);
    if api_key.is_some() {
        info!("Using upstream API key from SHOPWINDOW_API_KEY");
    }

    let catalog = CatalogClient::new(shopwindow_config.upstream.products_url.clone(), api_key);
    let queries = QueryCache::new(CacheStore::new(shopwindow_config.cache.policy()));

    let listen_addr = shopwindow_config.listen_addr.clone();
    let state = Arc::new(AppState {
        config: shopwindow_config,
        catalog,
        queries,
    });

    let app = Router::new()
        .route("/", get(handler::products_page))
        .route("/products.json", get(handler::products_json))
        .route("/refetch", post(handler::refetch))
        .route("/status", get(handler::status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Server running on http://{}", listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
