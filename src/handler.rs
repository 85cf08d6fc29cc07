use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use minijinja::Environment;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::catalog::Product;
use crate::error::FetchError;
use crate::state::AppState;
use crate::utils::{format_price, product_key};

const PRODUCTS_PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Shop Window</title></head>
<body>
<h1>Products{% if category %}: {{ category }}{% endif %}</h1>
<form method="post" action="/refetch{% if category %}?category={{ category }}{% endif %}">
  <button type="submit">Refetch</button>
</form>
{% for product in products %}
<div class="product">
  <h2>{{ product.title }}</h2>
  <p>{{ product.price | price }}</p>
  <p>{{ product.category }}</p>
</div>
{% endfor %}
</body>
</html>"#;

/// Creates a minijinja environment with the listing and error page templates
fn create_template_env() -> Environment<'static> {
    let mut env = Environment::new();

    env.add_template("products_page", PRODUCTS_PAGE_TEMPLATE)
        .expect("Failed to add products_page template");

    env.add_template(
        "error_page",
        "<h1>Error loading products</h1><p>{{ error }}</p>",
    )
    .expect("Failed to add error_page template");

    env.add_filter("price", format_price);

    env
}

#[derive(Debug, Deserialize)]
pub struct ListingParams {
    category: Option<String>,
}

impl ListingParams {
    fn category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Fetches the listing for `category` through the shared query cache.
///
/// Every route funnels through this, so concurrent page and JSON requests
/// for the same key share one upstream call.
async fn fetch_listing(
    state: &AppState,
    category: Option<&str>,
) -> Result<Vec<Product>, FetchError> {
    let key = product_key(category);
    let catalog = state.catalog.clone();
    let category = category.map(str::to_string);

    state
        .queries
        .fetch(&key, move || async move {
            catalog.fetch_products(category.as_deref()).await
        })
        .await
}

fn error_page(err: &FetchError) -> Response {
    warn!(error = %err, "Fetch failed");

    let env = create_template_env();
    let error_html = env
        .get_template("error_page")
        .and_then(|tmpl| tmpl.render(minijinja::context! { error => err.to_string() }))
        .unwrap_or_else(|_| format!("<h1>Error loading products</h1><p>{}</p>", err));
    (StatusCode::BAD_GATEWAY, Html(error_html)).into_response()
}

#[tracing::instrument(skip(state))]
pub async fn products_page(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListingParams>,
) -> Response {
    let category = params.category();

    match fetch_listing(&state, category).await {
        Ok(products) => {
            let env = create_template_env();
            let rendered = env.get_template("products_page").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    products => products,
                    category => category,
                })
            });

            match rendered {
                Ok(html) => Html(html).into_response(),
                Err(e) => {
                    warn!(error = %e, "Failed to render products page");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render page").into_response()
                }
            }
        }
        Err(err) => error_page(&err),
    }
}

#[tracing::instrument(skip(state))]
pub async fn products_json(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListingParams>,
) -> Response {
    match fetch_listing(&state, params.category()).await {
        Ok(products) => Json(products).into_response(),
        Err(err) => {
            warn!(error = %err, "Fetch failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// Explicit invalidation path: drops the cached listing and fetches it
/// fresh, for this and every other consumer of the key.
#[tracing::instrument(skip(state))]
pub async fn refetch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListingParams>,
) -> Response {
    let category = params.category();
    let key = product_key(category);
    let catalog = state.catalog.clone();
    let owned_category = category.map(str::to_string);

    info!(key = %key, "Refetch requested");

    let result = state
        .queries
        .refetch(&key, move || async move {
            catalog.fetch_products(owned_category.as_deref()).await
        })
        .await;

    match result {
        Ok(_) => {
            let target = match category {
                Some(category) => format!("/?category={category}"),
                None => "/".to_string(),
            };
            Redirect::to(&target).into_response()
        }
        Err(err) => error_page(&err),
    }
}

/// Cache observability for one listing key
#[tracing::instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListingParams>,
) -> Json<serde_json::Value> {
    let key = product_key(params.category());

    Json(json!({
        "key": key,
        "cached": state.queries.is_cached(&key),
        "loading": state.queries.is_loading(&key),
        "entries": state.queries.len(),
        "upstream": state.config.upstream.products_url,
    }))
}
