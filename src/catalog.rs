use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;

/// One product in the remote catalog
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Product {
    pub id: u64,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub category: String,
    pub image: String,
    pub rating: Rating,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Rating {
    pub rate: f64,
    pub count: u64,
}

/// Client for the upstream product catalog.
///
/// Clones share the underlying connection pool, so handlers can hand an
/// owned copy to a fetch producer.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    products_url: String,
    api_key: Option<SecretString>,
}

impl CatalogClient {
    pub fn new(products_url: String, api_key: Option<SecretString>) -> Self {
        Self {
            client: reqwest::Client::new(),
            products_url,
            api_key,
        }
    }

    /// Fetch the product list, optionally scoped to a single category.
    pub async fn fetch_products(&self, category: Option<&str>) -> Result<Vec<Product>, FetchError> {
        let url = match category {
            Some(category) => format!(
                "{}/category/{category}",
                self.products_url.trim_end_matches('/')
            ),
            None => self.products_url.clone(),
        };
        debug!(url = %url, "Fetching products");

        let mut request = self.client.get(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            );
        }

        let products = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Product>>()
            .await?;

        debug!(count = products.len(), "Fetched products");
        Ok(products)
    }
}
