//! Shared fixtures for integration tests.
//!
//! Backends are raw TCP listeners writing exact HTTP bytes, so tests control
//! header sizes, framing and pacing byte for byte.

#![allow(dead_code)]

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use safe_fetch::policy::{DefaultPolicy, Policy, Validator};
use safe_fetch::{GuardConfig, RequestOptions, SafeClient};

/// One step of a scripted reply.
pub enum Reply {
    Bytes(Vec<u8>),
    Pause(Duration),
    /// Keep the socket open and never write again.
    Hang,
}

/// A running fixture backend.
pub struct Backend {
    pub addr: SocketAddr,
    /// Request lines received, e.g. `"GET /path"`.
    hits: Arc<Mutex<Vec<String>>>,
}

impl Backend {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    /// Paths hit, without the method.
    pub fn paths(&self) -> Vec<String> {
        self.hits()
            .into_iter()
            .map(|line| line.split_once(' ').map(|(_, p)| p.to_string()).unwrap_or(line))
            .collect()
    }
}

/// Start a backend answering each request with `handler(path)`.
pub async fn start_backend<F>(handler: F) -> Backend
where
    F: Fn(&str) -> Vec<Reply> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = hits.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let log = log.clone();
            tokio::spawn(async move {
                serve(socket, handler.as_ref(), &log).await;
            });
        }
    });

    Backend { addr, hits }
}

/// Backend answering every request with the same bytes.
pub async fn start_static_backend(response: Vec<u8>) -> Backend {
    start_backend(move |_| vec![Reply::Bytes(response.clone())]).await
}

async fn serve<F>(mut socket: TcpStream, handler: &F, log: &Mutex<Vec<String>>)
where
    F: Fn(&str) -> Vec<Reply>,
{
    let Some(request_line) = read_request(&mut socket).await else {
        return;
    };
    log.lock().unwrap().push(request_line.clone());
    let path = request_line.split(' ').nth(1).unwrap_or("/").to_string();

    for reply in handler(&path) {
        match reply {
            Reply::Bytes(bytes) => {
                if socket.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::Pause(d) => tokio::time::sleep(d).await,
            Reply::Hang => std::future::pending::<()>().await,
        }
    }
    let _ = socket.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Read one request head and its body; returns `"METHOD /path"`.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut remaining = content_length.saturating_sub(buf.len() - head_end);
    while remaining > 0 {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    let mut parts = head.lines().next()?.split(' ');
    Some(format!("{} {}", parts.next()?, parts.next()?))
}

/// Full response with `Content-Length` and `Connection: close`.
pub fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn ok(body: &[u8]) -> Vec<u8> {
    response("200 OK", &[], body)
}

/// Redirect to `location`, padded with roughly `padding` bytes of headers.
pub fn redirect(status: &str, location: &str, padding: usize) -> Vec<u8> {
    let pad = padding_headers(padding);
    let mut headers: Vec<(&str, &str)> = vec![("Location", location)];
    headers.extend(pad.iter().map(|(n, v)| (n.as_str(), v.as_str())));
    response(status, &headers, b"")
}

/// `(name, value)` header pairs totalling about `bytes` on the wire.
pub fn padding_headers(bytes: usize) -> Vec<(String, String)> {
    const LINE: usize = 100;
    (0..bytes.div_ceil(LINE))
        .map(|i| {
            let name = format!("X-Pad-{i:04}");
            let value = "a".repeat(LINE - name.len() - 4);
            (name, value)
        })
        .collect()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn client() -> SafeClient {
    SafeClient::new(GuardConfig::default()).unwrap()
}

pub fn client_with(config: GuardConfig) -> SafeClient {
    SafeClient::new(config).unwrap()
}

/// Allow the fixture's own loopback address on top of the default rules,
/// and skip the resolved-address check.
pub fn local(backend: &Backend, options: RequestOptions) -> RequestOptions {
    let addr = backend.addr;
    let host = addr.ip().to_string();
    let default = DefaultPolicy::new();
    options
        .check_uri(Validator::uri(move |url| {
            (url.scheme() == "http"
                && url.host_str() == Some(host.as_str())
                && url.port() == Some(addr.port()))
                || default.check_uri(url)
        }))
        .check_address(Validator::Disabled)
}

/// GET `path` on the fixture with the local allowances.
pub fn get(backend: &Backend, path: &str) -> RequestOptions {
    local(backend, RequestOptions::new(backend.url(path)))
}
