//! HTTP/1.1 exchange over the guarded connector.
//!
//! # Responsibilities
//! - Build a fresh `hyper-util` client per hop (no pooling across requests)
//! - Send the request and translate the response into `TransportEvent`s
//! - Stop at 3xx-with-`Location` and report it instead of following
//! - Decode the body in bounded pieces
//!
//! # Design Decisions
//! - `http1_max_buf_size` bounds the response head; an overflow is reported
//!   as `TransportFailure::HeaderOverflow`
//! - Canceled requests are never retried; a retry would open an unmetered
//!   second attempt behind the guard's back

use bytes::Bytes;
use futures_util::StreamExt;
use hyper::header::LOCATION;
use hyper::{Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use axum::body::Body;

use crate::config::GuardConfig;
use crate::error::BoxError;
use crate::policy::Policy;
use crate::transport::connector::{ConnectError, GuardedConnector};
use crate::transport::decode::{Coding, ContentDecoder};
use crate::transport::{tls, Exchange, Hop, NetworkTap, ResponseMeta, Transport, TransportEvent, TransportFailure};

/// Smallest read buffer hyper accepts.
const MIN_BUF_SIZE: usize = 8192;

type HopClient = Client<GuardedConnector, Body>;

/// Production transport: hyper-util client, rustls, flate2.
#[derive(Clone)]
pub struct HyperTransport {
    tls: Arc<rustls::ClientConfig>,
    connect_timeout: Duration,
    max_header_bytes: usize,
}

impl HyperTransport {
    pub fn new(config: &GuardConfig) -> Result<Self, rustls::Error> {
        Ok(Self {
            tls: tls::client_config()?,
            connect_timeout: config.timeouts.connect(),
            max_header_bytes: config.http.max_header_bytes.max(MIN_BUF_SIZE),
        })
    }

    fn client(&self, policy: Arc<dyn Policy>, tap: NetworkTap) -> HopClient {
        let connector = GuardedConnector::new(policy, tap, self.tls.clone(), self.connect_timeout);
        Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .retry_canceled_requests(false)
            .http1_max_buf_size(self.max_header_bytes)
            .build(connector)
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .finish()
    }
}

impl Transport for HyperTransport {
    fn open(&self, hop: Hop, tap: NetworkTap) -> Exchange {
        let client = self.client(hop.policy.clone(), tap);
        Exchange::spawn(move |tx| exchange(client, hop, tx))
    }
}

async fn exchange(client: HopClient, hop: Hop, tx: mpsc::Sender<TransportEvent>) {
    if let Err(failure) = drive(&client, hop, &tx).await {
        tracing::debug!(error = %failure, "Exchange failed");
        let _ = tx.send(TransportEvent::Failed(failure)).await;
    }
}

/// Run one hop. A closed event channel means the guard is done with us, so
/// every send that fails ends the exchange quietly.
async fn drive(client: &HopClient, hop: Hop, tx: &mpsc::Sender<TransportEvent>) -> Result<(), TransportFailure> {
    let request = build_request(&hop)?;
    tracing::debug!(method = %hop.method, url = %hop.url, "Sending request");

    let response = client
        .request(request)
        .await
        .map_err(|e| classify(Box::new(e)))?;
    let (parts, incoming) = response.into_parts();
    let head = ResponseMeta {
        url: hop.url,
        status: parts.status,
        version: parts.version,
        headers: parts.headers,
    };

    if is_redirect(head.status) {
        if let Some(value) = head.headers.get(LOCATION) {
            let location = value
                .to_str()
                .map_err(|reason| TransportFailure::BadLocation {
                    location: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    reason,
                })?
                .to_string();
            let _ = tx.send(TransportEvent::Redirect { head, location }).await;
            return Ok(());
        }
    }

    let coding = if hop.decompress {
        Coding::from_headers(&head.headers)
    } else {
        Coding::Identity
    };
    if tx.send(TransportEvent::Headers(head)).await.is_err() {
        return Ok(());
    }

    let mut decoder = ContentDecoder::new(coding);
    let mut body = Body::new(incoming).into_data_stream();

    while let Some(chunk) = body.next().await {
        let chunk: Bytes = chunk.map_err(|e| classify(e.into_inner()))?;
        if tx.send(TransportEvent::Encoded(chunk.len())).await.is_err() {
            return Ok(());
        }
        decoder.push(chunk);
        if !forward(&mut decoder, tx).await? {
            return Ok(());
        }
    }

    decoder.finish();
    if forward(&mut decoder, tx).await? {
        let _ = tx.send(TransportEvent::End).await;
    }
    Ok(())
}

/// Send every piece the decoder can produce right now. `false` once the
/// guard has hung up.
async fn forward(decoder: &mut ContentDecoder, tx: &mpsc::Sender<TransportEvent>) -> Result<bool, TransportFailure> {
    while let Some(piece) = decoder.next_piece().map_err(|e| TransportFailure::Other(Box::new(e)))? {
        if tx.send(TransportEvent::Decoded(piece)).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn build_request(hop: &Hop) -> Result<Request<Body>, TransportFailure> {
    let mut url = hop.url.clone();
    url.set_fragment(None);
    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| TransportFailure::Other(Box::new(e)))?;

    let mut request = Request::new(Body::from(hop.body.clone()));
    *request.method_mut() = hop.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = hop.headers.clone();
    Ok(request)
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Map a client or body error onto the failures the guard distinguishes.
fn classify(err: BoxError) -> TransportFailure {
    if let Some(ConnectError::AddressRejected { addr, hostname }) = find_source::<ConnectError>(&*err) {
        return TransportFailure::AddressRejected {
            addr: *addr,
            hostname: hostname.clone(),
        };
    }
    if find_source::<hyper::Error>(&*err).is_some_and(|e| e.is_parse_too_large()) {
        return TransportFailure::HeaderOverflow(err);
    }
    TransportFailure::Other(err)
}

fn find_source<'a, E: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a E> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}
