//! The guard's run loop.

use bytes::Bytes;
use std::sync::Arc;
use url::Url;

use crate::accounting::{ByteAccountant, Channel};
use crate::error::GuardError;
use crate::guard::redirect::{next_hop, resolve_location};
use crate::guard::state::{GuardState, Subscriptions};
use crate::guard::{GuardResult, Payload, RequestSpec};
use crate::policy::Policy;
use crate::transport::{Hop, NetworkTap, Transport, TransportEvent, TransportFailure, WireEvent};

/// What woke the run loop.
enum Step {
    Wire(WireEvent),
    Event(Option<TransportEvent>),
    Idle,
}

/// Drives one request to its single terminal result.
pub struct StreamGuard {
    spec: RequestSpec,
    policy: Arc<dyn Policy>,
    transport: Arc<dyn Transport>,
    state: GuardState,
    accountant: ByteAccountant,
    chunks: Vec<Bytes>,
    response: Option<crate::transport::ResponseMeta>,
    redirects: usize,
}

impl StreamGuard {
    pub fn new(spec: RequestSpec, policy: Arc<dyn Policy>, transport: Arc<dyn Transport>) -> Self {
        Self {
            spec,
            policy,
            transport,
            state: GuardState::Idle,
            accountant: ByteAccountant::new(),
            chunks: Vec::new(),
            response: None,
            redirects: 0,
        }
    }

    /// Run the request to completion.
    pub async fn run(mut self) -> GuardResult {
        let (tap, wire) = NetworkTap::channel();
        let mut subs = Subscriptions::new(wire, self.spec.timeout);

        let outcome = self.drive(&mut subs, &tap).await;
        subs.release();
        drop(tap);

        let outcome = match outcome {
            Ok(()) => {
                self.transition(GuardState::Succeeded);
                Ok(Payload::assemble(std::mem::take(&mut self.chunks), self.spec.encoding))
            }
            Err(e) => {
                self.transition(GuardState::Failed);
                self.chunks.clear();
                Err(e)
            }
        };

        GuardResult {
            outcome,
            response: self.response.take(),
            stats: self.accountant.snapshot(),
            redirects: self.redirects,
        }
    }

    async fn drive(&mut self, subs: &mut Subscriptions, tap: &NetworkTap) -> Result<(), GuardError> {
        self.check_uri(&self.spec.url)?;

        let mut hop = Hop {
            url: self.spec.url.clone(),
            method: self.spec.method.clone(),
            headers: self.spec.headers.clone(),
            body: self.spec.body.clone(),
            decompress: self.spec.decompress,
            policy: self.policy.clone(),
        };
        self.transition(GuardState::Connecting);
        subs.attach(self.transport.open(hop.clone(), tap.clone()));

        loop {
            let step = tokio::select! {
                biased;
                Some(event) = subs.wire.recv() => Step::Wire(event),
                event = Subscriptions::next_event(&mut subs.exchange) => Step::Event(event),
                () = subs.deadline.as_mut() => Step::Idle,
            };
            subs.touch();

            let event = match step {
                Step::Wire(event) => {
                    self.on_wire(event)?;
                    continue;
                }
                Step::Idle => {
                    tracing::debug!(timeout = ?self.spec.timeout, "Idle deadline reached");
                    return Err(GuardError::TimedOut(self.spec.timeout));
                }
                Step::Event(None) => {
                    return Err(GuardError::Transport("exchange ended without a result".into()));
                }
                Step::Event(Some(event)) => event,
            };

            match event {
                TransportEvent::Headers(head) => {
                    tracing::debug!(status = %head.status, url = %head.url, "Response headers received");
                    self.response = Some(head);
                    self.transition(GuardState::Transferring);
                }
                TransportEvent::Redirect { head, location } => {
                    hop = self.follow(&hop, head.status, &location)?;
                    self.transition(GuardState::Connecting);
                    subs.attach(self.transport.open(hop.clone(), tap.clone()));
                }
                TransportEvent::Encoded(n) => self.account(Channel::Encoded, n as u64)?,
                TransportEvent::Decoded(piece) => {
                    self.account(Channel::Decoded, piece.len() as u64)?;
                    self.chunks.push(piece);
                }
                TransportEvent::End => {
                    // Reads that raced the final event still count.
                    for event in subs.drain_wire() {
                        self.on_wire(event)?;
                    }
                    return Ok(());
                }
                TransportEvent::Failed(failure) => return Err(self.map_failure(failure)),
            }
        }
    }

    fn on_wire(&mut self, event: WireEvent) -> Result<(), GuardError> {
        match event {
            WireEvent::Read(n) => self.account(Channel::Network, n),
            WireEvent::Acquired { peer, hostname } => {
                tracing::debug!(%peer, hostname = %hostname, "Socket acquired");
                Ok(())
            }
        }
    }

    fn account(&mut self, channel: Channel, n: u64) -> Result<(), GuardError> {
        self.accountant.add(channel, n);
        match self.accountant.exceeds(&self.spec.limits) {
            Some(channel) => {
                tracing::warn!(
                    channel = %channel,
                    count = self.accountant.get(channel),
                    limit = self.spec.limits.get(channel),
                    "Byte limit exceeded"
                );
                Err(GuardError::limit(channel))
            }
            None => Ok(()),
        }
    }

    fn check_uri(&self, url: &Url) -> Result<(), GuardError> {
        if self.policy.check_uri(url) {
            return Ok(());
        }
        tracing::warn!(uri = %url, "URI rejected by policy");
        Err(GuardError::UrlPolicyViolation { uri: url.to_string() })
    }

    fn follow(&mut self, current: &Hop, status: hyper::StatusCode, location: &str) -> Result<Hop, GuardError> {
        if self.redirects >= self.spec.max_redirects {
            tracing::warn!(max = self.spec.max_redirects, "Redirect limit reached");
            return Err(GuardError::TooManyRedirects {
                max: self.spec.max_redirects,
            });
        }

        let next = resolve_location(&current.url, location)?;
        self.check_uri(&next)?;
        self.redirects += 1;
        tracing::debug!(%status, from = %current.url, to = %next, hop = self.redirects, "Following redirect");
        Ok(next_hop(current, status, next))
    }

    fn map_failure(&self, failure: TransportFailure) -> GuardError {
        match failure {
            TransportFailure::AddressRejected { addr, hostname } => GuardError::BadAddress { addr, hostname },
            TransportFailure::HeaderOverflow(reason) => {
                tracing::warn!("Response head exceeded the header buffer");
                GuardError::LimitExceeded {
                    channel: Channel::Network,
                    reason: Some(reason),
                }
            }
            TransportFailure::BadLocation { location, reason } => GuardError::invalid_uri(location, reason),
            TransportFailure::Other(reason) => GuardError::Transport(reason),
        }
    }

    fn transition(&mut self, next: GuardState) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Guard state change");
        self.state = next;
    }
}
