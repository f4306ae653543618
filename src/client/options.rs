//! Request input and normalization.

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use hyper::{HeaderMap, Method};
use std::time::Duration;
use url::Url;

use crate::accounting::Limits;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::guard::{BodyEncoding, RequestSpec};
use crate::policy::{AddressCheckFn, UriCheckFn, Validator};

/// Everything [`SafeClient::fetch`](crate::SafeClient::fetch) accepts.
#[derive(Debug, Clone)]
pub enum RequestInput {
    Uri(String),
    Url(Url),
    Options(Box<RequestOptions>),
}

impl From<&str> for RequestInput {
    fn from(uri: &str) -> Self {
        RequestInput::Uri(uri.to_string())
    }
}

impl From<String> for RequestInput {
    fn from(uri: String) -> Self {
        RequestInput::Uri(uri)
    }
}

impl From<Url> for RequestInput {
    fn from(url: Url) -> Self {
        RequestInput::Url(url)
    }
}

impl From<RequestOptions> for RequestInput {
    fn from(options: RequestOptions) -> Self {
        RequestInput::Options(Box::new(options))
    }
}

impl RequestInput {
    /// Target as given, for logging before normalization.
    pub fn target(&self) -> &str {
        match self {
            RequestInput::Uri(uri) => uri,
            RequestInput::Url(url) => url.as_str(),
            RequestInput::Options(options) => options.uri.as_deref().or(options.url.as_deref()).unwrap_or(""),
        }
    }
}

/// Structured request input. Unset fields fall back to the client's config.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub uri: Option<String>,
    /// Alias for `uri`; `uri` wins when both are set.
    pub url: Option<String>,
    /// Base a relative `uri` is joined onto.
    pub base_url: Option<String>,
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub encoding: Option<BodyEncoding>,
    pub decompress: Option<bool>,
    pub max_redirects: Option<usize>,
    pub network_limit: Option<u64>,
    pub encoded_limit: Option<u64>,
    pub decoded_limit: Option<u64>,
    pub check_uri: Validator<UriCheckFn>,
    pub check_address: Validator<AddressCheckFn>,
}

impl RequestOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Some(base.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn text(mut self) -> Self {
        self.encoding = Some(BodyEncoding::Text);
        self
    }

    pub fn decompress(mut self, enabled: bool) -> Self {
        self.decompress = Some(enabled);
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn network_limit(mut self, bytes: u64) -> Self {
        self.network_limit = Some(bytes);
        self
    }

    pub fn encoded_limit(mut self, bytes: u64) -> Self {
        self.encoded_limit = Some(bytes);
        self
    }

    pub fn decoded_limit(mut self, bytes: u64) -> Self {
        self.decoded_limit = Some(bytes);
        self
    }

    pub fn check_uri(mut self, check: Validator<UriCheckFn>) -> Self {
        self.check_uri = check;
        self
    }

    pub fn check_address(mut self, check: Validator<AddressCheckFn>) -> Self {
        self.check_address = check;
        self
    }
}

/// Per-request policy overrides, split off during normalization.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub(crate) check_uri: Validator<UriCheckFn>,
    pub(crate) check_address: Validator<AddressCheckFn>,
}

/// Turn caller input into a `RequestSpec` using `config` for defaults.
pub(crate) fn normalize(input: RequestInput, config: &GuardConfig) -> Result<(RequestSpec, Overrides), GuardError> {
    let options = match input {
        RequestInput::Uri(uri) => RequestOptions::new(uri),
        RequestInput::Url(url) => RequestOptions::new(String::from(url)),
        RequestInput::Options(options) => *options,
    };

    let target = options
        .uri
        .or(options.url)
        .ok_or_else(|| GuardError::invalid_uri("", "no uri given"))?;
    let url = match options.base_url {
        Some(base) => Url::parse(&base)
            .and_then(|base| base.join(&target))
            .map_err(|e| GuardError::invalid_uri(target.clone(), e))?,
        None => Url::parse(&target).map_err(|e| GuardError::invalid_uri(target.clone(), e))?,
    };

    let decompress = options.decompress.unwrap_or(config.http.decompress);
    let mut headers = options.headers;
    if !headers.contains_key(USER_AGENT) {
        if let Ok(value) = HeaderValue::from_str(&config.http.user_agent) {
            headers.insert(USER_AGENT, value);
        }
    }
    if decompress && !headers.contains_key(ACCEPT_ENCODING) {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    }

    let limits = Limits {
        network: options.network_limit.unwrap_or(config.limits.network),
        encoded: options.encoded_limit.unwrap_or(config.limits.encoded),
        decoded: options.decoded_limit.unwrap_or(config.limits.decoded),
    };

    let spec = RequestSpec {
        url,
        method: options.method.unwrap_or(Method::GET),
        headers,
        body: options.body.unwrap_or_default(),
        timeout: options.timeout.unwrap_or_else(|| config.timeouts.idle()),
        limits,
        encoding: options.encoding.unwrap_or_default(),
        decompress,
        max_redirects: options.max_redirects.unwrap_or(config.redirects.max),
    };
    let overrides = Overrides {
        check_uri: options.check_uri,
        check_address: options.check_address,
    };
    Ok((spec, overrides))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(input: impl Into<RequestInput>) -> Result<RequestSpec, GuardError> {
        normalize(input.into(), &GuardConfig::default()).map(|(spec, _)| spec)
    }

    #[test]
    fn test_bare_string_gets_defaults() {
        let spec = spec("https://example.com/feed").unwrap();
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.limits, Limits::default());
        assert_eq!(spec.timeout, Duration::from_millis(20_000));
        assert!(spec.decompress);
        assert_eq!(spec.headers[ACCEPT_ENCODING], "gzip, deflate");
        assert!(spec.headers[USER_AGENT].to_str().unwrap().starts_with("safe-fetch/"));
    }

    #[test]
    fn test_url_alias_and_base_url() {
        let options = RequestOptions {
            url: Some("hooks/42?x=1".into()),
            base_url: Some("https://api.example.com/v1/".into()),
            ..Default::default()
        };
        assert_eq!(spec(options).unwrap().url.as_str(), "https://api.example.com/v1/hooks/42?x=1");

        let both = RequestOptions {
            uri: Some("https://a.example/".into()),
            url: Some("https://b.example/".into()),
            ..Default::default()
        };
        assert_eq!(spec(both).unwrap().url.host_str(), Some("a.example"));
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(spec("not a uri"), Err(GuardError::InvalidUri { .. })));
        assert!(matches!(spec(RequestOptions::default()), Err(GuardError::InvalidUri { .. })));
        assert!(matches!(
            spec(RequestOptions::new("/relative").base_url("::")),
            Err(GuardError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_overrides_win() {
        let options = RequestOptions::new("http://example.com")
            .method(Method::POST)
            .body("x=1")
            .network_limit(42)
            .decoded_limit(7)
            .decompress(false)
            .max_redirects(0)
            .header(USER_AGENT, HeaderValue::from_static("custom/1"))
            .text();
        let spec = spec(options).unwrap();
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.body, "x=1");
        assert_eq!(spec.limits.network, 42);
        assert_eq!(spec.limits.encoded, Limits::default().encoded);
        assert_eq!(spec.limits.decoded, 7);
        assert_eq!(spec.max_redirects, 0);
        assert_eq!(spec.encoding, BodyEncoding::Text);
        assert_eq!(spec.headers[USER_AGENT], "custom/1");
        assert!(spec.headers.get(ACCEPT_ENCODING).is_none());
    }
}
