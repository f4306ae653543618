//! Metered, policy-checked connector.
//!
//! # Responsibilities
//! - Resolve the hop's hostname and check every candidate address with
//!   `Policy::check_address` before connecting to it
//! - Report each socket acquisition and every raw read to the request's tap
//! - Wrap https connections in rustls on top of the metered socket, so TLS
//!   framing counts as network bytes
//!
//! # Design Decisions
//! - One connector per exchange; its tap belongs to exactly one request
//! - A rejected address aborts the hop instead of falling through to the
//!   next candidate

use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower::Service;

use crate::policy::{AddressFamily, Policy};
use crate::transport::NetworkTap;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("uri has no host")]
    MissingHost,

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("address {addr} for {hostname} rejected by policy")]
    AddressRejected { addr: IpAddr, hostname: String },

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(#[source] io::Error),
}

/// `tower::Service<Uri>` handed to the hyper-util client.
#[derive(Clone)]
pub struct GuardedConnector {
    policy: Arc<dyn Policy>,
    tap: NetworkTap,
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl GuardedConnector {
    pub fn new(
        policy: Arc<dyn Policy>,
        tap: NetworkTap,
        tls: Arc<rustls::ClientConfig>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            tap,
            tls: TlsConnector::from(tls),
            connect_timeout,
        }
    }

    async fn connect(self, dst: Uri) -> Result<GuardedConn, ConnectError> {
        let https = match dst.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => return Err(ConnectError::UnsupportedScheme(other.unwrap_or_default().to_string())),
        };
        let host = dst.host().ok_or(ConnectError::MissingHost)?;
        let hostname = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = dst.port_u16().unwrap_or(if https { 443 } else { 80 });

        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((hostname.as_str(), port))
            .await
            .map_err(|source| ConnectError::Resolve {
                host: hostname.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in candidates {
            let ip = addr.ip();
            if self.policy.check_address(ip, AddressFamily::from(&ip), &hostname) == Some(false) {
                tracing::warn!(%ip, hostname = %hostname, "Resolved address rejected by policy");
                return Err(ConnectError::AddressRejected { addr: ip, hostname });
            }

            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return self.establish(stream, addr, hostname, https).await,
                Ok(Err(e)) => {
                    tracing::debug!(%addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::debug!(%addr, "Connect attempt timed out");
                    last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
                }
            }
        }

        Err(ConnectError::Connect(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {hostname}"))
        })))
    }

    async fn establish(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        hostname: String,
        https: bool,
    ) -> Result<GuardedConn, ConnectError> {
        let _ = stream.set_nodelay(true);
        self.tap.acquired(peer, &hostname);
        let metered = MeteredStream::new(stream, self.tap.clone());

        let wire = if https {
            let name = rustls::pki_types::ServerName::try_from(hostname)
                .map_err(|e| ConnectError::Tls(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
            let tls = self.tls.connect(name, metered).await.map_err(ConnectError::Tls)?;
            Wire::Tls(Box::new(tls))
        } else {
            Wire::Plain(metered)
        };

        Ok(GuardedConn { io: TokioIo::new(wire) })
    }
}

impl Service<Uri> for GuardedConnector {
    type Response = GuardedConn;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<GuardedConn, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let this = self.clone();
        Box::pin(this.connect(dst))
    }
}

/// Socket wrapper that reports every read to the tap.
pub struct MeteredStream<S> {
    inner: S,
    tap: NetworkTap,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, tap: NetworkTap) -> Self {
        Self { inner, tap }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                self.tap.read(n as u64);
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// Plain or TLS byte stream under one type.
pub enum Wire {
    Plain(MeteredStream<TcpStream>),
    Tls(Box<TlsStream<MeteredStream<TcpStream>>>),
}

impl AsyncRead for Wire {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Wire::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Wire::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Wire {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Wire::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Wire::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Wire::Plain(s) => Pin::new(s).poll_flush(cx),
            Wire::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Wire::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Wire::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connection type produced by [`GuardedConnector`].
pub struct GuardedConn {
    io: TokioIo<Wire>,
}

impl Connection for GuardedConn {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for GuardedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.io), cx, buf)
    }
}

impl hyper::rt::Write for GuardedConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.io), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.io), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.io), cx)
    }
}
