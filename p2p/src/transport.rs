//! TCP connection facility, behind a trait so session tests can run
//! against an in-process loopback instead of a real dial.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use headers_common::PeerAddress;

/// A full-duplex, cancellation-friendly byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Opens outbound TCP connections. The production implementation wraps
/// [`tokio::net::TcpStream`]; tests substitute an in-process pair.
#[async_trait::async_trait]
pub trait TcpDialer: Send + Sync {
    /// Connect to `addr`, failing if `timeout` elapses first.
    async fn dial(
        &self,
        addr: PeerAddress,
        timeout: Duration,
    ) -> std::io::Result<Box<dyn Transport>>;
}

/// The real dialer, backed by `tokio::net::TcpStream::connect`.
#[derive(Default)]
pub struct TokioTcpDialer;

#[async_trait::async_trait]
impl TcpDialer for TokioTcpDialer {
    async fn dial(
        &self,
        addr: PeerAddress,
        timeout: Duration,
    ) -> std::io::Result<Box<dyn Transport>> {
        let sock = std::net::SocketAddr::new(addr.ip, addr.port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(sock))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}
