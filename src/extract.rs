//! Pull the presented secret out of an incoming request.
//!
//! Accepted, in order of precedence:
//! 1. `Authorization: Bearer <secret>`
//! 2. `X-API-Key: <secret>`
//! 3. `api_key` or `token` query parameter

use reqwest::header::{HeaderMap, AUTHORIZATION};

pub const API_KEY_HEADER: &str = "x-api-key";
const QUERY_PARAMS: [&str; 2] = ["api_key", "token"];

pub fn presented_secret(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    bearer(headers)
        .or_else(|| api_key_header(headers))
        .or_else(|| query.and_then(query_secret))
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = auth.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_empty(rest)
}

fn api_key_header(headers: &HeaderMap) -> Option<String> {
    non_empty(headers.get(API_KEY_HEADER)?.to_str().ok()?)
}

fn query_secret(query: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    QUERY_PARAMS.iter().find_map(|name| {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| non_empty(v))
    })
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_bearer_wins_over_everything() {
        let h = headers(&[("authorization", "Bearer from-bearer"), ("x-api-key", "from-header")]);
        assert_eq!(
            presented_secret(&h, Some("api_key=from-query")).as_deref(),
            Some("from-bearer")
        );
    }

    #[test]
    fn test_api_key_header_then_query() {
        let h = headers(&[("x-api-key", "from-header")]);
        assert_eq!(presented_secret(&h, Some("token=q")).as_deref(), Some("from-header"));

        let empty = HeaderMap::new();
        assert_eq!(
            presented_secret(&empty, Some("?token=t%2Bsecret&x=1")).as_deref(),
            Some("t+secret")
        );
        // api_key beats token regardless of order in the string
        assert_eq!(
            presented_secret(&empty, Some("token=second&api_key=first")).as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz"), ("x-api-key", "k")]);
        assert_eq!(presented_secret(&h, None).as_deref(), Some("k"));

        let lower = headers(&[("authorization", "bearer abc")]);
        assert_eq!(presented_secret(&lower, None).as_deref(), Some("abc"));
    }

    #[test]
    fn test_nothing_presented() {
        assert!(presented_secret(&HeaderMap::new(), None).is_none());
        assert!(presented_secret(&headers(&[("authorization", "Bearer   ")]), Some("api_key=")).is_none());
    }
}
