//! Request facade.
//!
//! # Responsibilities
//! - Normalize caller input into a `RequestSpec`
//! - Layer per-request policy overrides over the client's base policy
//! - Run a `StreamGuard` and adapt its result to `(error, response, body, stats)`
//! - Request-scoped span, completion log line and metrics
//!
//! # Design Decisions
//! - `SafeClient` is cheap to clone; config, policy and transport are shared
//!   read-only behind `Arc`
//! - Normalization failures surface through the same result shape as guard
//!   failures

pub mod options;

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::accounting::ByteStats;
use crate::config::loader::join_errors;
use crate::config::{validate_config, GuardConfig, ValidationError};
use crate::error::GuardError;
use crate::guard::{GuardResult, Payload, StreamGuard};
use crate::observability::metrics;
use crate::policy::{DefaultPolicy, Policy, RequestPolicy};
use crate::transport::{HyperTransport, ResponseMeta, Transport};

pub use options::{RequestInput, RequestOptions};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// Result of one request in the `(error, response, body, stats)` shape.
#[derive(Debug)]
pub struct Completion {
    pub error: Option<GuardError>,
    /// Head of the final response; `None` on failures before it arrived.
    pub response: Option<ResponseMeta>,
    /// Assembled body; `None` on failure.
    pub body: Option<Payload>,
    pub stats: ByteStats,
}

impl Completion {
    fn failed(error: GuardError) -> Self {
        Self {
            error: Some(error),
            response: None,
            body: None,
            stats: ByteStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Payload, GuardError> {
        match (self.error, self.body) {
            (Some(error), _) => Err(error),
            (None, body) => Ok(body.unwrap_or_else(|| Payload::Binary(Default::default()))),
        }
    }
}

impl From<GuardResult> for Completion {
    fn from(result: GuardResult) -> Self {
        let (error, body) = match result.outcome {
            Ok(body) => (None, Some(body)),
            Err(error) => (Some(error), None),
        };
        Self {
            error,
            response: result.response,
            body,
            stats: result.stats,
        }
    }
}

/// Entry point for guarded requests.
#[derive(Debug, Clone)]
pub struct SafeClient {
    config: Arc<GuardConfig>,
    policy: Arc<dyn Policy>,
    transport: Arc<dyn Transport>,
}

impl SafeClient {
    /// Client using the hyper transport and the configured default policy.
    pub fn new(config: GuardConfig) -> Result<Self, BuildError> {
        validate_config(&config).map_err(BuildError::Config)?;
        let transport = HyperTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Client over a caller-supplied transport.
    pub fn with_transport(config: GuardConfig, transport: Arc<dyn Transport>) -> Result<Self, BuildError> {
        validate_config(&config).map_err(BuildError::Config)?;
        let policy: Arc<dyn Policy> = Arc::new(DefaultPolicy::from_config(&config.policy));
        Ok(Self {
            config: Arc::new(config),
            policy,
            transport,
        })
    }

    /// Replace the base policy every request starts from.
    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    /// Run one request to completion.
    pub async fn fetch(&self, input: impl Into<RequestInput>) -> Completion {
        let input = input.into();
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("fetch", %request_id, uri = %input.target());
        self.execute(input).instrument(span).await
    }

    /// Run one request on a new task and hand its result to `callback`
    /// exactly once.
    pub fn fetch_with_callback<F>(&self, input: impl Into<RequestInput>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<GuardError>, Option<ResponseMeta>, Option<Payload>, ByteStats) + Send + 'static,
    {
        let client = self.clone();
        let input = input.into();
        tokio::spawn(async move {
            let done = client.fetch(input).await;
            callback(done.error, done.response, done.body, done.stats);
        })
    }

    async fn execute(&self, input: RequestInput) -> Completion {
        let start = Instant::now();

        let completion = match options::normalize(input, &self.config) {
            Ok((spec, overrides)) => {
                let policy = RequestPolicy::layered(self.policy.clone(), overrides.check_uri, overrides.check_address);
                let result = StreamGuard::new(spec, policy, self.transport.clone()).run().await;
                if self.config.observability.metrics_enabled {
                    metrics::record_redirects(result.redirects);
                    metrics::record_bytes(&result.stats);
                }
                Completion::from(result)
            }
            Err(error) => Completion::failed(error),
        };

        let outcome = match &completion.error {
            None => "success",
            Some(error) => error.kind().as_str(),
        };
        if self.config.observability.metrics_enabled {
            metrics::record_outcome(outcome, start);
        }

        match &completion.error {
            None => tracing::info!(
                status = completion.response.as_ref().map(|r| r.status.as_u16()),
                network = completion.stats.network,
                encoded = completion.stats.encoded,
                decoded = completion.stats.decoded,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Fetch completed"
            ),
            Some(error) => tracing::info!(
                outcome,
                error = %error,
                network = completion.stats.network,
                encoded = completion.stats.encoded,
                decoded = completion.stats.decoded,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Fetch failed"
            ),
        }

        completion
    }
}
