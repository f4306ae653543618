//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! SafeClient::fetch
//!     → info_span!("fetch", request_id, uri)   wraps the whole request
//!     → guard/transport debug!/warn! events      inherit the span
//!     → metrics.rs at completion                 outcome, bytes, redirects
//!
//! Consumers:
//!     → logging.rs subscriber (binary only)
//!     → whatever `metrics` recorder the embedding process installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a subscriber or a metrics recorder
//! - Request ID (UUID v4) is a span field, not a header
//! - Metrics are gated by `observability.metrics_enabled`

pub mod logging;
pub mod metrics;
