use crate::ports::DialPort;
use futures::Future;
use hyper::http::uri::Scheme;
use hyper::Uri;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use super::connection::DialedConnection;

/// Connector for hyper's client that opens origin connections through the
/// Dial hook, so plain requests and tunnels share one connection policy.
#[derive(Clone)]
pub struct DialConnector {
    dialer: Arc<dyn DialPort>,
    cancel: CancellationToken,
}

impl DialConnector {
    /// The client holding this connector is shared by every connection, so
    /// `cancel` is the server shutdown token: per-connection cancellation
    /// does not reach dials made for forwarded requests.
    pub fn new(dialer: Arc<dyn DialPort>, cancel: CancellationToken) -> Self {
        Self { dialer, cancel }
    }

    const DEFAULT_PORT: u16 = 80;
}

impl Service<Uri> for DialConnector {
    type Response = DialedConnection;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = self.dialer.clone();
        let cancel = self.cancel.clone();

        Box::pin(async move {
            if uri.scheme() == Some(&Scheme::HTTPS) {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "forwarding to TLS origins is not supported, use CONNECT",
                ));
            }

            let authority = uri
                .authority()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Missing authority"))?;
            let addr = format!(
                "{}:{}",
                authority.host(),
                authority.port_u16().unwrap_or(Self::DEFAULT_PORT)
            );

            match dialer.dial(&cancel, "tcp", &addr).await {
                Ok(conn) => Ok(DialedConnection::from(conn)),
                Err(e) => {
                    log::debug!("Failed to connect to {}: {}", addr, e);
                    Err(e)
                }
            }
        })
    }
}
