//! Request matching against recorded interactions

use hyper::Uri;
use sha2::{Digest, Sha256};

use crate::cassette::Request;

/// Normalize a URL for exact comparison
///
/// Scheme and authority are lowercased and an empty path becomes `/`.
/// The query string is kept byte for byte; parameters are not re-sorted.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();

    let Ok(uri) = trimmed.parse::<Uri>() else {
        return trimmed.to_string();
    };

    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => {
            let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
            let path_and_query = if path_and_query.starts_with('/') {
                path_and_query.to_string()
            } else {
                format!("/{path_and_query}")
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                authority.as_str().to_ascii_lowercase(),
                path_and_query
            )
        }
        _ => trimmed.to_string(),
    }
}

/// Find a header value by case-insensitive name
#[must_use]
pub fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Check whether a live request is equivalent to a stored one
///
/// Method, URL and body must be identical. Headers are compared only for
/// names in `headers_to_check`.
#[must_use]
pub fn requests_match(stored: &Request, live: &Request, headers_to_check: &[String]) -> bool {
    if stored.method != live.method {
        return false;
    }

    if normalize_url(&stored.url) != normalize_url(&live.url) {
        return false;
    }

    if stored.body != live.body {
        return false;
    }

    headers_to_check
        .iter()
        .all(|name| find_header(&stored.headers, name) == find_header(&live.headers, name))
}

/// Human-readable key for a request, used in logs and mismatch errors
#[must_use]
pub fn request_debug_key(request: &Request) -> String {
    match &request.body {
        Some(body) => format!(
            "{} {} body_sha256={}",
            request.method,
            request.url,
            short_sha256(body)
        ),
        None => format!("{} {} body_sha256=<none>", request.method, request.url),
    }
}

fn short_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_request() -> Request {
        Request::get("https://api.example.com/items")
    }

    #[test]
    fn test_identical_requests_match() {
        let request = test_request();
        assert!(requests_match(&request, &request.clone(), &[]));
    }

    #[test]
    fn test_method_is_case_sensitive() {
        let stored = test_request();
        let live = Request::new("get", "https://api.example.com/items");

        assert!(!requests_match(&stored, &live, &[]));
    }

    #[test]
    fn test_query_must_match_exactly() {
        let stored = test_request();
        let live = Request::get("https://api.example.com/items?x=1");

        assert!(!requests_match(&stored, &live, &[]));
    }

    #[test]
    fn test_query_order_is_significant() {
        let stored = Request::get("https://api.example.com/items?a=1&b=2");
        let live = Request::get("https://api.example.com/items?b=2&a=1");

        assert!(!requests_match(&stored, &live, &[]));
    }

    #[test]
    fn test_body_presence() {
        let stored = Request::new("POST", "https://api.example.com/items");
        let live = stored.clone().with_body(&b"{}"[..]);

        assert!(!requests_match(&stored, &live, &[]));
        assert!(!requests_match(&live, &stored, &[]));
        assert!(requests_match(&live, &live.clone(), &[]));
    }

    #[test]
    fn test_headers_ignored_without_allow_list() {
        let stored = test_request().with_header("Authorization", "Bearer a");
        let live = test_request().with_header("Authorization", "Bearer b");

        assert!(requests_match(&stored, &live, &[]));
    }

    #[test]
    fn test_header_allow_list() {
        let check = vec!["Authorization".to_string()];
        let stored = test_request()
            .with_header("Authorization", "Bearer a")
            .with_header("X-Trace-Id", "1");

        let other_trace = test_request()
            .with_header("authorization", "Bearer a")
            .with_header("X-Trace-Id", "2");
        assert!(requests_match(&stored, &other_trace, &check));

        let other_auth = test_request()
            .with_header("Authorization", "Bearer b")
            .with_header("X-Trace-Id", "1");
        assert!(!requests_match(&stored, &other_auth, &check));

        let missing_auth = test_request().with_header("X-Trace-Id", "1");
        assert!(!requests_match(&stored, &missing_auth, &check));
    }

    #[test]
    fn test_url_normalization() {
        assert_eq!(
            normalize_url("https://api.example.com/items"),
            "https://api.example.com/items"
        );
        assert_eq!(
            normalize_url("HTTPS://API.EXAMPLE.COM"),
            "https://api.example.com/"
        );
        assert_eq!(
            normalize_url("  https://api.example.com/Items?B=2&a=1  "),
            "https://api.example.com/Items?B=2&a=1"
        );
        assert_eq!(normalize_url("/relative/path"), "/relative/path");
    }

    #[test]
    fn test_debug_key() {
        let key = request_debug_key(&test_request());
        assert_eq!(key, "GET https://api.example.com/items body_sha256=<none>");

        let key = request_debug_key(&test_request().with_body(&b"abc"[..]));
        assert!(key.starts_with("GET https://api.example.com/items body_sha256="));
        assert_eq!(key.len(), "GET https://api.example.com/items body_sha256=".len() + 16);
    }

    proptest! {
        #[test]
        fn proptest_unlisted_headers_never_affect_matching(
            name in "X-[A-Za-z]{1,12}",
            stored_value in "[ -~]{0,24}",
            live_value in "[ -~]{0,24}",
        ) {
            let check = vec!["Authorization".to_string()];
            let stored = test_request()
                .with_header("Authorization", "Bearer token")
                .with_header(name.clone(), stored_value);
            let live = test_request()
                .with_header("Authorization", "Bearer token")
                .with_header(name, live_value);

            prop_assert!(requests_match(&stored, &live, &check));
        }

        #[test]
        fn proptest_listed_header_values_must_be_equal(
            stored_value in "[a-z0-9]{1,16}",
            live_value in "[a-z0-9]{1,16}",
        ) {
            let check = vec!["Authorization".to_string()];
            let stored = test_request().with_header("Authorization", stored_value.clone());
            let live = test_request().with_header("Authorization", live_value.clone());

            prop_assert_eq!(requests_match(&stored, &live, &check), stored_value == live_value);
        }
    }
}
