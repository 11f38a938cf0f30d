#![cfg(test)]
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tunnelproxy::adapters::TcpDialer;
use tunnelproxy::ports::{DialPort, TunnelIo};
use tunnelproxy::server::ProxyServerBuilder;

/// A proxy listening on an ephemeral local port, stopped when dropped.
pub struct TestProxyServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    _server_handle: JoinHandle<()>,
}

impl TestProxyServer {
    pub async fn start(builder: ProxyServerBuilder) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let server = builder.build(shutdown.clone());
        let server_handle = tokio::spawn(async move { server.run(listener).await });

        Ok(Self {
            addr,
            shutdown,
            _server_handle: server_handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Opens a client connection and sends a CONNECT request for `target`.
    pub async fn connect(&self, target: &str) -> io::Result<TcpStream> {
        let mut stream = TcpStream::connect(self.addr).await?;
        let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
        Ok(stream)
    }

    /// Sends a raw request and reads the whole response.
    pub async fn exchange(&self, request: &str) -> io::Result<String> {
        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(request.as_bytes()).await?;
        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response"))??;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

impl Drop for TestProxyServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Plain TCP dialer that counts its calls.
#[derive(Default)]
pub struct CountingDialer {
    calls: AtomicUsize,
}

impl CountingDialer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DialPort for CountingDialer {
    async fn dial(&self, cancel: &CancellationToken, network: &str, address: &str) -> io::Result<Box<dyn TunnelIo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TcpDialer.dial(cancel, network, address).await
    }
}

/// Dialer whose connections are always refused.
pub struct FailingDialer;

#[async_trait]
impl DialPort for FailingDialer {
    async fn dial(&self, _: &CancellationToken, _: &str, address: &str) -> io::Result<Box<dyn TunnelIo>> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("{address} refused"),
        ))
    }
}
