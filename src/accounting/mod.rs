//! Byte accounting for a single request.
//!
//! # Responsibilities
//! - Count raw network bytes, encoded body bytes and decoded body bytes
//! - Evaluate the three counters against their ceilings
//!
//! # Design Decisions
//! - One accountant per request, owned by its `StreamGuard`; never shared
//! - Counters only grow (saturating adds)
//! - Ceilings are soft: a counter is checked after the triggering chunk has
//!   been added, so the reported value may overshoot the limit

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three byte budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Bytes read off the wire (headers, framing and TLS included).
    Network,
    /// Response body bytes before content decoding.
    Encoded,
    /// Response body bytes after content decoding.
    Decoded,
}

impl Channel {
    /// Evaluation order used by [`ByteAccountant::exceeds`].
    pub const ALL: [Channel; 3] = [Channel::Network, Channel::Encoded, Channel::Decoded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Network => "network",
            Channel::Encoded => "encoded",
            Channel::Decoded => "decoded",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte ceilings for the three channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub network: u64,
    pub encoded: u64,
    pub decoded: u64,
}

impl Limits {
    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Network => self.network,
            Channel::Encoded => self.encoded,
            Channel::Decoded => self.decoded,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            network: 1024 * 1024,
            encoded: 1024 * 1024,
            decoded: 1024 * 1024,
        }
    }
}

/// Snapshot of the counters, reported with every result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteStats {
    pub network: u64,
    pub encoded: u64,
    pub decoded: u64,
}

/// Three monotonic byte counters.
#[derive(Debug, Default)]
pub struct ByteAccountant {
    network: u64,
    encoded: u64,
    decoded: u64,
}

impl ByteAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` bytes to `channel`.
    pub fn add(&mut self, channel: Channel, n: u64) {
        let counter = match channel {
            Channel::Network => &mut self.network,
            Channel::Encoded => &mut self.encoded,
            Channel::Decoded => &mut self.decoded,
        };
        *counter = counter.saturating_add(n);
    }

    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Network => self.network,
            Channel::Encoded => self.encoded,
            Channel::Decoded => self.decoded,
        }
    }

    /// First channel, in network → encoded → decoded order, whose counter is
    /// strictly greater than its ceiling.
    pub fn exceeds(&self, limits: &Limits) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|&channel| self.get(channel) > limits.get(channel))
    }

    pub fn snapshot(&self) -> ByteStats {
        ByteStats {
            network: self.network,
            encoded: self.encoded,
            decoded: self.decoded,
        }
    }
}
