//! Lifecycle states and the per-request subscription bundle.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};

use crate::transport::{Exchange, TransportEvent, WireEvent};

/// Request lifecycle. `Succeeded` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    Connecting,
    Transferring,
    Succeeded,
    Failed,
}

impl GuardState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GuardState::Succeeded | GuardState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardState::Idle => "idle",
            GuardState::Connecting => "connecting",
            GuardState::Transferring => "transferring",
            GuardState::Succeeded => "succeeded",
            GuardState::Failed => "failed",
        }
    }
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can still deliver events to the guard.
///
/// Owned by the run loop and released in one step at the terminal edge.
pub(crate) struct Subscriptions {
    pub(crate) wire: mpsc::UnboundedReceiver<WireEvent>,
    pub(crate) exchange: Option<Exchange>,
    pub(crate) deadline: Pin<Box<Sleep>>,
    idle: Duration,
}

impl Subscriptions {
    pub(crate) fn new(wire: mpsc::UnboundedReceiver<WireEvent>, idle: Duration) -> Self {
        Self {
            wire,
            exchange: None,
            deadline: Box::pin(tokio::time::sleep(idle)),
            idle,
        }
    }

    /// Replace the current exchange; the previous one is aborted.
    pub(crate) fn attach(&mut self, exchange: Exchange) {
        self.exchange = Some(exchange);
    }

    /// Push the idle deadline out by one full period.
    pub(crate) fn touch(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.idle);
    }

    /// Next lifecycle event; pending forever when no exchange is attached.
    pub(crate) async fn next_event(exchange: &mut Option<Exchange>) -> Option<TransportEvent> {
        match exchange {
            Some(exchange) => exchange.next().await,
            None => std::future::pending().await,
        }
    }

    /// Wire events already queued; used to settle the network count at
    /// end-of-stream.
    pub(crate) fn drain_wire(&mut self) -> Vec<WireEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.wire.try_recv() {
            events.push(event);
        }
        events
    }

    /// Abort the exchange, close the wire channel, drop the timer.
    pub(crate) fn release(mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.abort();
        }
        self.wire.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(GuardState::Succeeded.is_terminal());
        assert!(GuardState::Failed.is_terminal());
        assert!(!GuardState::Transferring.is_terminal());
        assert_eq!(GuardState::Connecting.to_string(), "connecting");
    }
}
