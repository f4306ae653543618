//! Terminal error taxonomy for guarded requests.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::accounting::Channel;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a guarded request failed.
///
/// Underlying errors are kept as the `source()` of the variant so callers
/// can inspect the original cause.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The target or a redirect target was rejected by `check_uri`.
    #[error("uri rejected by policy: {uri}")]
    UrlPolicyViolation { uri: String },

    /// A resolved address was rejected by `check_address`.
    #[error("address {addr} resolved for {hostname} rejected by policy")]
    BadAddress { addr: IpAddr, hostname: String },

    /// A byte counter went over its ceiling.
    #[error("{channel} byte limit exceeded")]
    LimitExceeded {
        channel: Channel,
        #[source]
        reason: Option<BoxError>,
    },

    /// Nothing happened on the request for the idle deadline.
    #[error("no activity for {0:?}")]
    TimedOut(Duration),

    #[error("exceeded maximum of {max} redirects")]
    TooManyRedirects { max: usize },

    /// Malformed caller input or `Location` header.
    #[error("invalid uri {input:?}")]
    InvalidUri {
        input: String,
        #[source]
        reason: BoxError,
    },

    /// Connection or protocol failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

/// Stable names of the error variants, used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UrlPolicyViolation,
    BadAddress,
    LimitExceeded,
    TimedOut,
    TooManyRedirects,
    InvalidUri,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UrlPolicyViolation => "UrlPolicyViolation",
            ErrorKind::BadAddress => "BadAddress",
            ErrorKind::LimitExceeded => "LimitExceeded",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::TooManyRedirects => "TooManyRedirects",
            ErrorKind::InvalidUri => "InvalidUri",
            ErrorKind::Transport => "TransportError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GuardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::UrlPolicyViolation { .. } => ErrorKind::UrlPolicyViolation,
            GuardError::BadAddress { .. } => ErrorKind::BadAddress,
            GuardError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            GuardError::TimedOut(_) => ErrorKind::TimedOut,
            GuardError::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            GuardError::InvalidUri { .. } => ErrorKind::InvalidUri,
            GuardError::Transport(_) => ErrorKind::Transport,
        }
    }

    /// True for both URI and resolved-address rejections.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            GuardError::UrlPolicyViolation { .. } | GuardError::BadAddress { .. }
        )
    }

    /// The channel that went over its ceiling, if this is a limit breach.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            GuardError::LimitExceeded { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    pub(crate) fn limit(channel: Channel) -> Self {
        GuardError::LimitExceeded { channel, reason: None }
    }

    pub(crate) fn invalid_uri(input: impl Into<String>, reason: impl Into<BoxError>) -> Self {
        GuardError::InvalidUri {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
