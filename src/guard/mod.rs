//! Stream guard: one request's lifecycle against policy and byte budgets.
//!
//! # Data Flow
//! ```text
//! RequestSpec
//!     → check_uri(target)
//!     → Transport::open(hop)
//!         wire:   Acquired / Read(n)        → add(Network, n)
//!         events: Headers                   → keep response meta
//!                 Redirect{location}        → check_uri(next) → open(next hop)
//!                 Encoded(n)                → add(Encoded, n)
//!                 Decoded(piece)            → add(Decoded, len) → buffer
//!                 End / Failed
//!     → GuardResult (exactly once, after every subscription is released)
//! ```
//!
//! # Design Decisions
//! - The guard, not the transport, follows redirects
//! - Limits are checked after each accounting update
//! - Abort is dropping: releasing `Subscriptions` aborts the exchange task,
//!   closes the wire channel and drops the idle timer

pub mod redirect;
pub mod state;
pub mod stream;

use bytes::Bytes;
use hyper::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::accounting::{ByteStats, Limits};
use crate::error::GuardError;
use crate::transport::ResponseMeta;

pub use state::GuardState;
pub use stream::StreamGuard;

/// How the assembled body is handed back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Binary,
    /// UTF-8 text; invalid sequences are replaced.
    Text,
}

/// Assembled response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Binary(Bytes),
    Text(String),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Binary(b) => b,
            Payload::Text(s) => s.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn assemble(chunks: Vec<Bytes>, encoding: BodyEncoding) -> Self {
        let bytes = match chunks.len() {
            0 => Bytes::new(),
            1 => chunks.into_iter().next().unwrap_or_default(),
            _ => Bytes::from(chunks.concat()),
        };
        match encoding {
            BodyEncoding::Binary => Payload::Binary(bytes),
            BodyEncoding::Text => Payload::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// Fully normalized request, immutable once handed to a [`StreamGuard`].
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Idle deadline, reset on every event.
    pub timeout: Duration,
    pub limits: Limits,
    pub encoding: BodyEncoding,
    pub decompress: bool,
    pub max_redirects: usize,
}

/// Terminal outcome of one request.
#[derive(Debug)]
pub struct GuardResult {
    pub outcome: Result<Payload, GuardError>,
    /// Head of the final (non-redirect) response, if one arrived.
    pub response: Option<ResponseMeta>,
    pub stats: ByteStats,
    pub redirects: usize,
}
