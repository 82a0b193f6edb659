//! Cache key layout.
//!
//! Response keys are `{prefix}:{method}:{path}[?query]`. The prefix names the resource, so a
//! single `{prefix}:*` pattern drops every cached view of it.

use axum::http::{Method, Uri};

pub fn response_key(prefix: &str, method: &Method, uri: &Uri) -> String {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    format!("{prefix}:{method}:{target}")
}

/// Every cached response of a resource.
pub fn collection_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

/// The cached GET of one item path, with and without a query string.
pub fn item_patterns(prefix: &str, path: &str) -> [String; 2] {
    let path = escape_glob(path);
    [
        format!("{prefix}:GET:{path}"),
        format!("{prefix}:GET:{path}\\?*"),
    ]
}

/// Every cached view that shows order `order_id`: the listings and the item itself.
pub fn order_patterns(order_id: &str) -> [String; 3] {
    let [exact, with_query] = item_patterns("order", &format!("/api/orders/{order_id}"));
    [collection_pattern("orders"), exact, with_query]
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::matches_pattern;

    #[test]
    fn key_keeps_path_and_query() {
        let uri: Uri = "/api/orders?status=pending&limit=5".parse().expect("uri");
        assert_eq!(
            response_key("orders", &Method::GET, &uri),
            "orders:GET:/api/orders?status=pending&limit=5"
        );
    }

    #[test]
    fn item_patterns_match_the_item_only() {
        let [exact, with_query] = item_patterns("product", "/api/products/42");

        assert!(matches_pattern(&exact, "product:GET:/api/products/42"));
        assert!(matches_pattern(&with_query, "product:GET:/api/products/42?fields=name"));
        assert!(!matches_pattern(&exact, "product:GET:/api/products/421"));
        assert!(!matches_pattern(&with_query, "product:GET:/api/products/421?x=1"));
    }

    #[test]
    fn collection_pattern_covers_every_view() {
        let pattern = collection_pattern("orders");
        assert!(matches_pattern(&pattern, "orders:GET:/api/orders"));
        assert!(matches_pattern(&pattern, "orders:GET:/api/orders?user_id=1"));
        assert!(!matches_pattern(&pattern, "order:GET:/api/orders/1"));
    }

    #[test]
    fn order_patterns_cover_listings_and_the_one_order() {
        let patterns = order_patterns("7");
        let hit = |key: &str| patterns.iter().any(|pattern| matches_pattern(pattern, key));

        assert!(hit("orders:GET:/api/orders?status=pending"));
        assert!(hit("order:GET:/api/orders/7"));
        assert!(hit("order:GET:/api/orders/7?expand=items"));
        assert!(!hit("order:GET:/api/orders/70"));
        assert!(!hit("products:GET:/api/products"));
    }
}
