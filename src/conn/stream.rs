//! A uniform stream-oriented byte pipe over TCP or TLS (spec.md §4's
//! "Socket"), targeting the single (tokio) async runtime this crate uses.

use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::{Error, ErrorKind, Result};

const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

/// An externally constructed TLS client configuration, layered over the TCP
/// socket. The TLS handshake itself is an external collaborator per
/// spec.md §1; this type only carries the already-built `rustls`
/// connector so `Socket::connect` can wrap a `TcpStream` with it.
#[cfg(feature = "rustls-tls")]
#[derive(Clone)]
pub struct TlsConfig {
    pub connector: tokio_rustls::TlsConnector,
    pub server_name: tokio_rustls::rustls::pki_types::ServerName<'static>,
}

/// Byte-oriented connection to one Cassandra node: either a bare TCP socket
/// or a TCP socket wrapped in TLS.
pub(crate) enum Socket {
    Tcp(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Socket {
    /// Connect to `addr` with `connect_timeout` (no timeout if `None`),
    /// optionally wrapping the resulting TCP stream in TLS.
    pub(crate) async fn connect(
        addr: SocketAddr,
        connect_timeout: Option<Duration>,
        #[cfg(feature = "rustls-tls")] tls: Option<TlsConfig>,
        #[cfg(not(feature = "rustls-tls"))] tls: Option<()>,
    ) -> Result<Self> {
        let connect_fut = TcpStream::connect(addr);
        let tcp = match connect_timeout {
            Some(d) => tokio::time::timeout(d, connect_fut)
                .await
                .map_err(|_| -> Error { ErrorKind::ConnectTimeout(addr.into()).into() })??,
            None => connect_fut.await?,
        };
        tcp.set_nodelay(true)?;
        apply_keepalive(&tcp)?;

        match tls {
            #[cfg(feature = "rustls-tls")]
            Some(cfg) => {
                let tls_stream = cfg
                    .connector
                    .connect(cfg.server_name, tcp)
                    .await
                    .map_err(|e| -> Error { ErrorKind::Tls(e.to_string()).into() })?;
                Ok(Self::Tls(Box::new(tls_stream)))
            }
            #[cfg(not(feature = "rustls-tls"))]
            Some(_) => unreachable!("rustls-tls feature disabled"),
            None => Ok(Self::Tcp(tcp)),
        }
    }

    /// Half-close the write side. The reader task performs the final
    /// `close` of the underlying socket; this only requests shutdown of
    /// outbound traffic so the peer observes EOF promptly.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        match self {
            Self::Tcp(s) => s.shutdown().await?,
            #[cfg(feature = "rustls-tls")]
            Self::Tls(s) => s.shutdown().await?,
        }
        Ok(())
    }
}

fn apply_keepalive(stream: &TcpStream) -> Result<()> {
    let socket = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    socket.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

impl AsyncRead for Socket {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Socket {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "rustls-tls")]
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
