use crate::ports::{DialPort, TunnelIo};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tokio_util::sync::CancellationToken;

/// Default dialer: a plain TCP connect, abandoned if the request is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl DialPort for TcpDialer {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> io::Result<Box<dyn TunnelIo>> {
        let family: Option<fn(&SocketAddr) -> bool> = match network {
            "tcp" => None,
            "tcp4" => Some(SocketAddr::is_ipv4),
            "tcp6" => Some(SocketAddr::is_ipv6),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported network {}", network),
                ))
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")),
            stream = connect(network, address, family) => {
                let stream = stream?;
                log::debug!("connected to {} ({:?})", address, stream.peer_addr().ok());
                Ok(Box::new(stream) as Box<dyn TunnelIo>)
            }
        }
    }
}

/// Connects to `address`, keeping only the resolved addresses of one family
/// when `family` is set.
async fn connect(network: &str, address: &str, family: Option<fn(&SocketAddr) -> bool>) -> io::Result<TcpStream> {
    let Some(keep) = family else {
        return TcpStream::connect(address).await;
    };
    let addrs: Vec<SocketAddr> = lookup_host(address).await?.filter(|addr| keep(addr)).collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address for {}", network, address),
        ));
    }
    TcpStream::connect(&addrs[..]).await
}
