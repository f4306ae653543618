//! Guarded outbound HTTP requests.
//!
//! Fetches untrusted URLs while defending the caller against server-side
//! request forgery and resource exhaustion.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller input
//!         │
//!         ▼
//!   ┌─────────────┐   RequestSpec   ┌─────────────┐   Hop    ┌──────────────────────┐
//!   │   client    │────────────────▶│    guard    │─────────▶│      transport       │
//!   │ SafeClient  │                 │ StreamGuard │◀─────────│ connector/tls/http   │
//!   └─────────────┘◀────────────────└──────┬──────┘  events  │ decode               │
//!      Completion     GuardResult          │                 └──────────────────────┘
//!                                          │
//!                          ┌───────────────┴───────────────┐
//!                          ▼                               ▼
//!                   ┌─────────────┐                 ┌─────────────┐
//!                   │   policy    │                 │ accounting  │
//!                   │ check_uri / │                 │ network /   │
//!                   │ check_addr  │                 │ encoded /   │
//!                   └─────────────┘                 │ decoded     │
//!                                                   └─────────────┘
//! ```

// Core subsystems
pub mod accounting;
pub mod client;
pub mod guard;
pub mod policy;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod observability;

pub use accounting::{ByteStats, Channel, Limits};
pub use client::{BuildError, Completion, RequestInput, RequestOptions, SafeClient};
pub use config::GuardConfig;
pub use error::{ErrorKind, GuardError};
pub use guard::{BodyEncoding, Payload};
pub use policy::{AddressFamily, DefaultPolicy, Policy, Validator};
pub use transport::ResponseMeta;
