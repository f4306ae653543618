//! Building the next hop from a redirect response.

use bytes::Bytes;
use hyper::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION};
use hyper::{Method, StatusCode};
use url::Url;

use crate::error::GuardError;
use crate::transport::Hop;

/// Resolve `location` against the current hop's URL.
pub fn resolve_location(current: &Url, location: &str) -> Result<Url, GuardError> {
    let mut next = current
        .join(location.trim())
        .map_err(|e| GuardError::invalid_uri(location, e))?;
    // A fragment-less Location inherits the original fragment (RFC 9110 §10.2.2).
    if next.fragment().is_none() {
        next.set_fragment(current.fragment());
    }
    Ok(next)
}

/// The hop to issue after `current` answered `status` pointing at `next`.
///
/// 303, and 301/302 after anything but GET/HEAD, become a body-less GET.
/// Credentials are dropped when the origin changes.
pub fn next_hop(current: &Hop, status: StatusCode, next: Url) -> Hop {
    let mut hop = Hop {
        url: next,
        ..current.clone()
    };

    let to_get = match status {
        StatusCode::SEE_OTHER => hop.method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            hop.method != Method::GET && hop.method != Method::HEAD
        }
        _ => false,
    };
    if to_get {
        hop.method = Method::GET;
        hop.body = Bytes::new();
        for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING] {
            hop.headers.remove(name);
        }
    }

    if hop.url.origin() != current.url.origin() {
        for name in [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE] {
            hop.headers.remove(name);
        }
    }

    hop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DefaultPolicy;
    use hyper::HeaderMap;
    use std::sync::Arc;

    fn hop(url: &str, method: Method) -> Hop {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer secret".parse().unwrap());
        headers.insert(COOKIE, "session=1".parse().unwrap());
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        Hop {
            url: url.parse().unwrap(),
            method,
            headers,
            body: Bytes::from_static(b"{}"),
            decompress: true,
            policy: Arc::new(DefaultPolicy::new()),
        }
    }

    #[test]
    fn test_resolve_relative_location() {
        let current: Url = "https://example.com/a/b#top".parse().unwrap();
        assert_eq!(resolve_location(&current, "../c").unwrap().as_str(), "https://example.com/c#top");
        assert_eq!(
            resolve_location(&current, "//other.example/x").unwrap().as_str(),
            "https://other.example/x#top"
        );
        assert!(matches!(
            resolve_location(&current, "http://[::1"),
            Err(GuardError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_see_other_switches_to_get() {
        let current = hop("https://example.com/form", Method::POST);
        let next = next_hop(&current, StatusCode::SEE_OTHER, "https://example.com/done".parse().unwrap());
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_empty());
        assert!(next.headers.get(CONTENT_TYPE).is_none());
        // Same origin keeps credentials.
        assert!(next.headers.get(AUTHORIZATION).is_some());
    }

    #[test]
    fn test_temporary_redirect_keeps_method_and_body() {
        let current = hop("https://example.com/upload", Method::PUT);
        let next = next_hop(&current, StatusCode::TEMPORARY_REDIRECT, "https://example.com/v2".parse().unwrap());
        assert_eq!(next.method, Method::PUT);
        assert_eq!(next.body, "{}");
    }

    #[test]
    fn test_cross_origin_drops_credentials() {
        let current = hop("https://example.com/", Method::GET);
        let next = next_hop(&current, StatusCode::FOUND, "https://cdn.example.net/".parse().unwrap());
        assert!(next.headers.get(AUTHORIZATION).is_none());
        assert!(next.headers.get(COOKIE).is_none());
        assert_eq!(next.method, Method::GET);
    }
}
