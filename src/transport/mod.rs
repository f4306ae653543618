//! Transport collaborator.
//!
//! # Data Flow
//! ```text
//! StreamGuard
//!     → Transport::open(hop, tap)            one call per hop
//!         → connector.rs  resolve, check_address, connect, TLS
//!             ⇢ tap: WireEvent::Acquired / WireEvent::Read(n)   (unbounded)
//!         → http.rs       HTTP/1.1 exchange on a spawned task
//!             ⇢ Exchange: Headers | Redirect | Encoded | Decoded | End | Failed
//!         → decode.rs     gzip/deflate pieces
//! ```
//!
//! # Design Decisions
//! - The transport never follows redirects; it reports them and stops
//! - Lifecycle events go through a small bounded channel so decoding cannot
//!   run far ahead of the guard's accounting
//! - Dropping an `Exchange` aborts its task; nothing outlives the guard

pub mod connector;
pub mod decode;
pub mod http;
pub mod tls;

use bytes::Bytes;
use hyper::{HeaderMap, Method, StatusCode, Version};
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;

use crate::error::BoxError;
use crate::policy::Policy;

pub use http::HyperTransport;

/// Capacity of the lifecycle event channel.
pub const EVENT_BUFFER: usize = 2;

/// Raw socket activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A connection was opened to `peer` for `hostname`.
    Acquired { peer: SocketAddr, hostname: String },
    /// `n` bytes were read off a socket.
    Read(u64),
}

/// Sending half of a request's socket-activity channel.
///
/// Shared by every connection of the request, so `Read` deltas add up across
/// redirect hops.
#[derive(Debug, Clone)]
pub struct NetworkTap {
    tx: mpsc::UnboundedSender<WireEvent>,
}

impl NetworkTap {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WireEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn read(&self, n: u64) {
        // A closed receiver means the request already concluded.
        let _ = self.tx.send(WireEvent::Read(n));
    }

    pub fn acquired(&self, peer: SocketAddr, hostname: &str) {
        let _ = self.tx.send(WireEvent::Acquired {
            peer,
            hostname: hostname.to_string(),
        });
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// URL of the hop that produced this response.
    pub url: Url,
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// One request on the wire. Redirects produce a new `Hop`.
#[derive(Debug, Clone)]
pub struct Hop {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub decompress: bool,
    pub policy: Arc<dyn Policy>,
}

#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("address {addr} for {hostname} rejected by policy")]
    AddressRejected { addr: IpAddr, hostname: String },

    #[error("response head too large")]
    HeaderOverflow(#[source] BoxError),

    #[error("unreadable Location header {location:?}")]
    BadLocation {
        location: String,
        #[source]
        reason: hyper::header::ToStrError,
    },

    #[error(transparent)]
    Other(BoxError),
}

/// Lifecycle events of one hop.
#[derive(Debug)]
pub enum TransportEvent {
    /// Final (non-redirect) response head; body events follow.
    Headers(ResponseMeta),
    /// 3xx with a `Location`; the body is never read and no event follows.
    Redirect { head: ResponseMeta, location: String },
    /// Length of one body chunk as received.
    Encoded(usize),
    /// One decoded piece, in order.
    Decoded(Bytes),
    End,
    Failed(TransportFailure),
}

/// Receiving side of a hop, owned by the guard.
pub struct Exchange {
    events: mpsc::Receiver<TransportEvent>,
    task: JoinHandle<()>,
}

impl Exchange {
    /// Run `drive` on a new task, handing it the sending side. The task
    /// stays inside the caller's span.
    pub fn spawn<F, Fut>(drive: F) -> Self
    where
        F: FnOnce(mpsc::Sender<TransportEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(drive(tx).in_current_span());
        Self { events, task }
    }

    /// Next event; `None` once the task finished and the buffer is drained.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.events.close();
        self.task.abort();
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Opens hops for the guard.
pub trait Transport: Send + Sync + fmt::Debug {
    fn open(&self, hop: Hop, tap: NetworkTap) -> Exchange;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_exchange_task_keeps_caller_span() {
        let _subscriber = tracing::subscriber::set_default(tracing_subscriber::registry());
        let span = tracing::info_span!("fetch", request_id = "abc");
        let seen = Arc::new(Mutex::new(None));

        let record = seen.clone();
        let mut exchange = span.in_scope(|| {
            Exchange::spawn(move |tx| async move {
                *record.lock().unwrap() = tracing::Span::current().id();
                drop(tx);
            })
        });
        assert!(exchange.next().await.is_none());

        assert!(span.id().is_some());
        assert_eq!(*seen.lock().unwrap(), span.id());
    }

    #[tokio::test]
    async fn test_exchange_delivers_in_order() {
        let mut exchange = Exchange::spawn(|tx| async move {
            tx.send(TransportEvent::Encoded(3)).await.unwrap();
            tx.send(TransportEvent::Decoded(Bytes::from_static(b"abc"))).await.unwrap();
            tx.send(TransportEvent::End).await.unwrap();
        });

        assert!(matches!(exchange.next().await, Some(TransportEvent::Encoded(3))));
        assert!(matches!(exchange.next().await, Some(TransportEvent::Decoded(b)) if b == "abc"));
        assert!(matches!(exchange.next().await, Some(TransportEvent::End)));
        assert!(exchange.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_exchange_stops_the_task() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let exchange = Exchange::spawn(|tx| async move {
            let _done = done_tx;
            loop {
                if tx.send(TransportEvent::Encoded(1)).await.is_err() {
                    break;
                }
            }
        });
        drop(exchange);
        // The task is aborted or sees the closed channel; either way the
        // oneshot sender is dropped.
        assert!(done_rx.await.is_err());
    }

    #[test]
    fn test_tap_after_receiver_dropped() {
        let (tap, rx) = NetworkTap::channel();
        drop(rx);
        tap.read(10);
        tap.acquired("127.0.0.1:80".parse().unwrap(), "example.com");
    }
}
