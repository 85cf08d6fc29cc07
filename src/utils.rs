/// Builds the query key for a product listing.
///
/// The uncategorized listing uses the bare `products` key; each category
/// gets its own key so listings are cached and de-duplicated independently.
/// Blank categories collapse to the uncategorized key.
pub fn product_key(category: Option<&str>) -> String {
    match category.map(str::trim).filter(|c| !c.is_empty()) {
        Some(category) => format!("products:{}", category.to_lowercase()),
        None => "products".to_string(),
    }
}

/// Formats a price for display
pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_key() {
        // Uncategorized listings share one key
        assert_eq!(product_key(None), "products");
        assert_eq!(product_key(Some("")), "products");
        assert_eq!(product_key(Some("   ")), "products");

        // Categories are normalized into their own keys
        assert_eq!(product_key(Some("electronics")), "products:electronics");
        assert_eq!(product_key(Some("Electronics")), "products:electronics");
        assert_eq!(product_key(Some(" jewelery ")), "products:jewelery");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0.0), "$0.00");
        assert_eq!(format_price(9.99), "$9.99");
        assert_eq!(format_price(109.95), "$109.95");
        assert_eq!(format_price(3.5), "$3.50");
    }
}
