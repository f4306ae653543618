//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files, and
//! every section defaults so a partial file is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::accounting::Limits;

/// Process-wide defaults for guarded requests.
///
/// Constructed once and shared read-only (`Arc<GuardConfig>`) by every
/// request issued through a `SafeClient`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Byte ceilings applied when a request does not override them.
    pub limits: Limits,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Redirect following.
    pub redirects: RedirectConfig,

    /// HTTP exchange settings.
    pub http: HttpConfig,

    /// Default address policy.
    pub policy: PolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Abort the request when nothing happens on it for this long.
    pub idle_ms: u64,

    /// Per-address TCP connect timeout.
    pub connect_ms: u64,
}

impl TimeoutConfig {
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_ms: 20_000,
            connect_ms: 10_000,
        }
    }
}

/// Redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Maximum number of redirects followed per request.
    pub max: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { max: 10 }
    }
}

/// HTTP exchange configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// `User-Agent` sent when the caller sets none.
    pub user_agent: String,

    /// Ceiling for the response head read buffer. hyper requires >= 8192.
    pub max_header_bytes: usize,

    /// Transparently decode gzip/deflate bodies.
    pub decompress: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("safe-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
            max_header_bytes: 64 * 1024,
            decompress: true,
        }
    }
}

/// Default address policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// URI schemes that may be fetched.
    pub allowed_schemes: Vec<String>,

    /// Hostnames rejected by exact (case-insensitive) match.
    pub blocked_hostnames: Vec<String>,

    /// Check every resolved IP before connecting.
    pub check_resolved_address: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            blocked_hostnames: vec!["localhost".to_string()],
            check_resolved_address: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Record request outcome and byte metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
