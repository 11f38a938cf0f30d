use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A bidirectional byte stream that can be carried by a tunnel
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Applies an OS send/receive buffer size hint. Streams that are not
    /// backed by a socket ignore it.
    fn set_socket_buffer_size(&self, _size: usize) -> io::Result<()> {
        Ok(())
    }
}

impl TunnelIo for TcpStream {
    fn set_socket_buffer_size(&self, size: usize) -> io::Result<()> {
        let sock = socket2::SockRef::from(self);
        sock.set_recv_buffer_size(size)?;
        sock.set_send_buffer_size(size)
    }
}

impl TunnelIo for tokio::io::DuplexStream {}

impl TunnelIo for Box<dyn TunnelIo> {
    fn set_socket_buffer_size(&self, size: usize) -> io::Result<()> {
        (**self).set_socket_buffer_size(size)
    }
}

/// Port opening outbound connections
#[async_trait]
pub trait DialPort: Send + Sync {
    /// Opens a connection to `address` (`host:port`) over `network`.
    ///
    /// An error is surfaced to the client as Bad Gateway.
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<Box<dyn TunnelIo>>;
}
