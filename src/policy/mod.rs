//! Address policy.
//!
//! # Data Flow
//! ```text
//! target URI / redirect Location
//!     → Policy::check_uri (scheme, hostname, literal IP)
//!     → connector resolves hostname
//!     → Policy::check_address (every resolved IP, before connect)
//! ```
//!
//! # Design Decisions
//! - Policies are stateless and shared across requests via `Arc<dyn Policy>`
//! - Fail closed: a `false` from either check rejects the hop
//! - `check_address` may answer `None` ("not applicable"), which lets the
//!   connection proceed
//! - Per-request overrides wrap the client's base policy instead of mutating it

pub mod address;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use url::{Host, Url};

use crate::config::PolicyConfig;
pub use address::{is_private_ip, is_private_ipv4, is_private_ipv6};

/// Address family of a resolved socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl From<&IpAddr> for AddressFamily {
    fn from(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Decides whether a URI or a resolved address may be contacted.
pub trait Policy: Send + Sync + fmt::Debug {
    /// Validate a target or redirect URI before any connection is made.
    fn check_uri(&self, uri: &Url) -> bool;

    /// Validate a resolved address. `None` means the check does not apply.
    fn check_address(&self, ip: IpAddr, family: AddressFamily, hostname: &str) -> Option<bool>;
}

/// Default SSRF rules: http(s) only, no `localhost`, no private literal or
/// resolved addresses.
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    allowed_schemes: Vec<String>,
    blocked_hostnames: Vec<String>,
    check_resolved_address: bool,
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self::from_config(&PolicyConfig::default())
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            allowed_schemes: config.allowed_schemes.iter().map(|s| s.to_lowercase()).collect(),
            blocked_hostnames: config.blocked_hostnames.iter().map(|h| h.to_lowercase()).collect(),
            check_resolved_address: config.check_resolved_address,
        }
    }
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for DefaultPolicy {
    fn check_uri(&self, uri: &Url) -> bool {
        if !self.allowed_schemes.iter().any(|s| s == uri.scheme()) {
            return false;
        }

        match uri.host() {
            None => false,
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_lowercase();
                !domain.is_empty() && !self.blocked_hostnames.iter().any(|h| *h == domain)
            }
            Some(Host::Ipv4(ip)) => !is_private_ipv4(ip),
            Some(Host::Ipv6(ip)) => !is_private_ipv6(ip),
        }
    }

    fn check_address(&self, ip: IpAddr, _family: AddressFamily, _hostname: &str) -> Option<bool> {
        if !self.check_resolved_address {
            return None;
        }
        Some(!is_private_ip(ip))
    }
}

pub type UriCheckFn = dyn Fn(&Url) -> bool + Send + Sync;
pub type AddressCheckFn = dyn Fn(IpAddr, AddressFamily, &str) -> Option<bool> + Send + Sync;

/// Per-request override of one policy check.
pub enum Validator<F: ?Sized> {
    /// Use the client's base policy.
    Inherit,
    /// Skip the check entirely.
    Disabled,
    /// Replace the check with a caller-supplied closure.
    Custom(Arc<F>),
}

impl<F: ?Sized> Validator<F> {
    pub fn is_inherit(&self) -> bool {
        matches!(self, Validator::Inherit)
    }
}

impl Validator<UriCheckFn> {
    pub fn uri(f: impl Fn(&Url) -> bool + Send + Sync + 'static) -> Self {
        Validator::Custom(Arc::new(f))
    }
}

impl Validator<AddressCheckFn> {
    pub fn address(f: impl Fn(IpAddr, AddressFamily, &str) -> Option<bool> + Send + Sync + 'static) -> Self {
        Validator::Custom(Arc::new(f))
    }
}

impl<F: ?Sized> Default for Validator<F> {
    fn default() -> Self {
        Validator::Inherit
    }
}

impl<F: ?Sized> Clone for Validator<F> {
    fn clone(&self) -> Self {
        match self {
            Validator::Inherit => Validator::Inherit,
            Validator::Disabled => Validator::Disabled,
            Validator::Custom(f) => Validator::Custom(Arc::clone(f)),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Validator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Inherit => f.write_str("Inherit"),
            Validator::Disabled => f.write_str("Disabled"),
            Validator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A base policy with per-request overrides applied on top.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    base: Arc<dyn Policy>,
    uri: Validator<UriCheckFn>,
    address: Validator<AddressCheckFn>,
}

impl RequestPolicy {
    /// Combine overrides with a base policy. Returns the base unchanged when
    /// nothing is overridden.
    pub fn layered(
        base: Arc<dyn Policy>,
        uri: Validator<UriCheckFn>,
        address: Validator<AddressCheckFn>,
    ) -> Arc<dyn Policy> {
        if uri.is_inherit() && address.is_inherit() {
            return base;
        }
        Arc::new(Self { base, uri, address })
    }
}

impl Policy for RequestPolicy {
    fn check_uri(&self, uri: &Url) -> bool {
        match &self.uri {
            Validator::Inherit => self.base.check_uri(uri),
            Validator::Disabled => true,
            Validator::Custom(f) => f(uri),
        }
    }

    fn check_address(&self, ip: IpAddr, family: AddressFamily, hostname: &str) -> Option<bool> {
        match &self.address {
            Validator::Inherit => self.base.check_address(ip, family, hostname),
            Validator::Disabled => None,
            Validator::Custom(f) => f(ip, family, hostname),
        }
    }
}
