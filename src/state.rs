use crate::catalog::{CatalogClient, Product};
use crate::config::ShopWindowConfig;
use crate::query::QueryCache;

/// Shared application state
pub struct AppState {
    pub config: ShopWindowConfig,
    pub catalog: CatalogClient,
    /// Process-wide fetch cache; every handler consumes the same keys, so a
    /// refetch through one route replaces what the others serve
    pub queries: QueryCache<Vec<Product>>,
}
