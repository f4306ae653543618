//! Redirect handling: every hop is re-validated before it is contacted.

use safe_fetch::policy::Validator;
use safe_fetch::{GuardError, RequestOptions};

mod common;
use common::{Reply, get, local, ok, redirect, start_backend};

#[tokio::test]
async fn test_follows_chain_to_final_body() {
    let backend = start_backend(|path| {
        let reply = match path {
            "/start" => redirect("301 Moved Permanently", "/next", 0),
            "/next" => redirect("307 Temporary Redirect", "final?x=1", 0),
            "/final?x=1" => ok(b"arrived"),
            _ => common::response("404 Not Found", &[], b""),
        };
        vec![Reply::Bytes(reply)]
    })
    .await;

    let done = common::client().fetch(get(&backend, "/start")).await;

    assert!(done.error.is_none(), "{:?}", done.error);
    assert_eq!(done.body.unwrap().as_bytes(), b"arrived");
    let response = done.response.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.url.path(), "/final");
    assert_eq!(backend.paths(), ["/start", "/next", "/final?x=1"]);
}

#[tokio::test]
async fn test_redirect_to_localhost_is_vetoed() {
    for target in ["http://localhost:{port}/secret", "http://[::1]:{port}/secret", "http://169.254.169.254/latest/meta-data"] {
        let backend = start_backend(move |path| {
            let reply = match path {
                "/start" => redirect("302 Found", &target.replace("{port}", "1"), 0),
                _ => ok(b"internal data"),
            };
            vec![Reply::Bytes(reply)]
        })
        .await;

        let done = common::client().fetch(get(&backend, "/start")).await;

        assert!(
            matches!(done.error, Some(GuardError::UrlPolicyViolation { .. })),
            "{target}: {:?}",
            done.error
        );
        assert_eq!(done.stats.encoded, 0);
        assert!(done.body.is_none());
        assert!(done.response.is_none());
        assert_eq!(backend.paths(), ["/start"]);
    }
}

#[tokio::test]
async fn test_too_many_redirects() {
    let backend = start_backend(|path| {
        let n: u32 = path.trim_start_matches("/loop").parse().unwrap_or(0);
        vec![Reply::Bytes(redirect("302 Found", &format!("/loop{}", n + 1), 0))]
    })
    .await;

    let done = common::client().fetch(get(&backend, "/loop0").max_redirects(3)).await;

    assert!(matches!(done.error, Some(GuardError::TooManyRedirects { max: 3 })), "{:?}", done.error);
    assert_eq!(backend.paths(), ["/loop0", "/loop1", "/loop2", "/loop3"]);
}

#[tokio::test]
async fn test_zero_redirects_allowed() {
    let backend = start_backend(|_| vec![Reply::Bytes(redirect("302 Found", "/elsewhere", 0))]).await;

    let done = common::client().fetch(get(&backend, "/").max_redirects(0)).await;

    assert!(matches!(done.error, Some(GuardError::TooManyRedirects { max: 0 })));
    // An intercepted redirect is never reported as the response.
    assert!(done.response.is_none());
}

#[tokio::test]
async fn test_see_other_turns_post_into_get() {
    let backend = start_backend(|path| {
        let reply = match path {
            "/form" => redirect("303 See Other", "/thanks", 0),
            _ => ok(b"thanks"),
        };
        vec![Reply::Bytes(reply)]
    })
    .await;

    let options = local(
        &backend,
        RequestOptions::new(backend.url("/form"))
            .method(hyper::Method::POST)
            .body("name=value"),
    );
    let done = common::client().fetch(options).await;

    assert!(done.error.is_none(), "{:?}", done.error);
    assert_eq!(backend.hits(), ["POST /form", "GET /thanks"]);
}

#[tokio::test]
async fn test_redirect_without_location_is_a_response() {
    let backend = start_backend(|_| vec![Reply::Bytes(common::response("302 Found", &[], b"no location"))]).await;

    let done = common::client().fetch(get(&backend, "/")).await;

    assert!(done.error.is_none());
    assert_eq!(done.response.unwrap().status, 302);
    assert_eq!(done.body.unwrap().as_bytes(), b"no location");
}

#[tokio::test]
async fn test_malformed_location() {
    let backend = start_backend(|_| vec![Reply::Bytes(redirect("302 Found", "http://[::1", 0))]).await;

    let done = common::client().fetch(get(&backend, "/")).await;

    assert!(matches!(done.error, Some(GuardError::InvalidUri { .. })), "{:?}", done.error);
}

#[tokio::test]
async fn test_non_utf8_location_is_invalid() {
    let raw = b"HTTP/1.1 302 Found\r\nLocation: /caf\xe9\r\nContent-Length: 9\r\nConnection: close\r\n\r\n3xx-body!".to_vec();
    let backend = start_backend(move |_| vec![Reply::Bytes(raw.clone())]).await;

    let done = common::client().fetch(get(&backend, "/")).await;

    assert!(matches!(done.error, Some(GuardError::InvalidUri { .. })), "{:?}", done.error);
    assert!(done.body.is_none());
    assert_eq!(done.stats.encoded, 0);
}

#[tokio::test]
async fn test_redirect_target_address_is_checked_again() {
    let backend = start_backend(|path| {
        let port = path.trim_start_matches("/start?port=");
        vec![Reply::Bytes(redirect("302 Found", &format!("http://localhost:{port}/inside"), 0))]
    })
    .await;
    let port = backend.addr.port();

    // Both hops pass the URI check; only the second resolves to a
    // hostname the address check refuses.
    let options = RequestOptions::new(backend.url(&format!("/start?port={port}")))
        .check_uri(Validator::uri(move |url| url.port() == Some(port)))
        .check_address(Validator::address(|_, _, hostname| Some(hostname != "localhost")));
    let done = common::client().fetch(options).await;

    let err = done.error.unwrap();
    assert!(matches!(err, GuardError::BadAddress { ref hostname, .. } if hostname == "localhost"), "{err:?}");
    assert!(done.response.is_none());
    assert_eq!(backend.paths(), [format!("/start?port={port}")]);
}
