//! Listener front end.
//!
//! Every connection starts with our own parse of the request head. CONNECT
//! requests stay on the raw socket so the tunnel can take it over; anything
//! else is handed, head included, to the hyper forwarding adapter.

mod prebuffered;
mod raw;
mod request;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use prebuffered::Prebuffered;
pub use raw::{error_response_bytes, RawClient};
pub use request::{RequestHead, HEADER_SECTION_MAX_LENGTH};

use crate::adapters::{AcceptAll, HyperForwardAdapter, TcpDialer};
use crate::domain::{Admission, ProxyError, ProxyService, Rejection, StatusCode};
use crate::ports::{AcceptPort, DialPort, Hijack, TunnelIo};
use crate::tunnel::{BufferPool, Tunnel, TunnelSettings};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Assembles a [`ProxyServer`] from its hooks and tunnel settings.
pub struct ProxyServerBuilder {
    settings: TunnelSettings,
    tunnel_only: bool,
    header_timeout: Option<Duration>,
    accept: Option<Arc<dyn AcceptPort>>,
    dial: Option<Arc<dyn DialPort>>,
}

impl Default for ProxyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyServerBuilder {
    pub fn new() -> Self {
        Self {
            settings: TunnelSettings::default(),
            tunnel_only: false,
            header_timeout: None,
            accept: None,
            dial: None,
        }
    }

    pub fn settings(mut self, settings: TunnelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn tunnel_only(mut self, tunnel_only: bool) -> Self {
        self.tunnel_only = tunnel_only;
        self
    }

    /// Longest a client may take to send its request head. Defaults to the
    /// idle timeout.
    pub fn header_timeout(mut self, header_timeout: Duration) -> Self {
        self.header_timeout = Some(header_timeout);
        self
    }

    /// Replaces the default hook, which accepts every request.
    pub fn accept(mut self, accept: Arc<dyn AcceptPort>) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Replaces the default hook, which opens plain TCP connections.
    pub fn dial(mut self, dial: Arc<dyn DialPort>) -> Self {
        self.dial = Some(dial);
        self
    }

    /// Builds the server. Cancelling `shutdown` stops the accept loop and
    /// every connection it started.
    pub fn build(self, shutdown: CancellationToken) -> ProxyServer {
        let accept = self.accept.unwrap_or_else(|| Arc::new(AcceptAll));
        let dialer = self.dial.unwrap_or_else(|| Arc::new(TcpDialer));

        let header_timeout = self.header_timeout.unwrap_or(self.settings.idle_timeout);
        let service = Arc::new(ProxyService::new(accept).tunnel_only(self.tunnel_only));
        let pool = Arc::new(BufferPool::new(self.settings.buffer_size));
        let tunnel = Arc::new(Tunnel::new(dialer.clone(), pool, self.settings));
        let forward = Arc::new(HyperForwardAdapter::with_dialer(
            service.clone(),
            dialer,
            shutdown.clone(),
        ));

        ProxyServer {
            service,
            tunnel,
            forward,
            header_timeout,
            shutdown,
        }
    }
}

#[derive(Clone)]
pub struct ProxyServer {
    service: Arc<ProxyService>,
    tunnel: Arc<Tunnel>,
    forward: Arc<HyperForwardAdapter>,
    header_timeout: Duration,
    shutdown: CancellationToken,
}

impl ProxyServer {
    pub fn builder() -> ProxyServerBuilder {
        ProxyServerBuilder::new()
    }

    pub fn tunnel(&self) -> &Arc<Tunnel> {
        &self.tunnel
    }

    /// Accepts connections until the shutdown token is cancelled, then waits
    /// for the connections still open to finish.
    pub async fn run(&self, listener: TcpListener) {
        let tracker = TaskTracker::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("accept failed: {}", err);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let server = self.clone();
            let cancel = self.shutdown.child_token();
            let span = info_span!("conn", id = %Uuid::new_v4(), %peer);
            tracker.spawn(
                async move { server.serve_connection_with_cancel(stream, peer, cancel).await }.instrument(span),
            );
        }

        tracker.close();
        info!("shutting down, waiting for {} connection(s)", tracker.len());
        tracker.wait().await;
    }

    /// Serves one client connection that is only torn down by its peers.
    pub async fn serve_connection<S: TunnelIo>(&self, stream: S, peer: SocketAddr) {
        self.serve_connection_with_cancel(stream, peer, CancellationToken::new())
            .await
    }

    pub async fn serve_connection_with_cancel<S: TunnelIo>(
        &self,
        stream: S,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) {
        let mut reader = Prebuffered::new(stream, HEADER_SECTION_MAX_LENGTH);
        let peeked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            peeked = timeout(self.header_timeout, RequestHead::peek(&mut reader)) => match peeked {
                Ok(peeked) => peeked,
                Err(_) => {
                    debug!("no request head from {} within {:?}", peer, self.header_timeout);
                    return;
                }
            },
        };

        match peeked {
            Ok((len, head)) if head.method.is_connect() => {
                reader.discard(len);
                self.serve_connect(head, RawClient::new(reader), peer, &cancel).await
            }
            Ok(_) => self.forward.clone().serve_connection(reader, peer, cancel).await,
            Err(err) => {
                debug!("bad request from {}: {}", peer, err);
                let status = match err {
                    ProxyError::HeaderTooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                let message = status.canonical_reason().unwrap_or("Bad Request");
                if let Err(err) = RawClient::new(reader).reject(status, message).await {
                    debug!("cannot send {} to {}: {}", status, peer, err);
                }
            }
        }
    }

    async fn serve_connect<S: TunnelIo>(
        &self,
        head: RequestHead,
        mut client: RawClient<S>,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) {
        let mut request = head.into_proxy_request().with_peer(peer);

        let rejection = match self.service.admit(cancel, &mut request).await {
            Admission::Tunnel { target } => {
                info!("CONNECT {}", target);
                match self.tunnel.serve_with_cancel(cancel, &target, client).await {
                    Ok(stats) => {
                        let cause = stats.cause.as_ref().map(|e| format!(": {}", e)).unwrap_or_default();
                        info!(
                            up = stats.upstream_bytes,
                            down = stats.downstream_bytes,
                            "CONNECT {} closed by {}{}",
                            stats.target,
                            stats.ended_by,
                            cause
                        );
                    }
                    Err(err) => debug!("CONNECT {} failed: {}", target, err),
                }
                return;
            }
            Admission::Rejected(rejection) => rejection,
            Admission::Forward { target } => {
                warn!("{} {} reached the tunnel path", request.method, target);
                Rejection::method_not_allowed()
            }
        };

        debug!("CONNECT {} rejected: {}", request.target, rejection.status);
        if let Err(err) = client.reject(rejection.status, &rejection.message).await {
            debug!("cannot send {} to {}: {}", rejection.status, peer, err);
        }
    }
}
