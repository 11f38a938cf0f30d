use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::buffer_pool::BufferPool;
use super::relay::{relay, Direction, Relayed};
use super::TunnelSettings;
use crate::domain::{ProxyError, Result, StatusCode};
use crate::ports::{DialPort, Hijack, TunnelIo};

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.0 200 Connection Established\r\n\r\n";

const TCP: &str = "tcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Hijacking,
    Tunneling,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Dialing => "dialing",
            SessionState::Hijacking => "hijacking",
            SessionState::Tunneling => "tunneling",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Summary of a finished tunnel session.
#[derive(Debug)]
pub struct TunnelStats {
    pub target: String,
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    /// The direction whose completion ended the session
    pub ended_by: Direction,
    /// Why that direction stopped; `None` when the session was cancelled
    pub cause: Option<io::Error>,
}

struct Session<'a> {
    target: &'a str,
    state: SessionState,
}

impl Session<'_> {
    fn enter(&mut self, state: SessionState) {
        debug!(target_addr = %self.target, from = %self.state, to = %state, "tunnel state");
        self.state = state;
    }
}

/// Runs CONNECT sessions: dial, hijack, relay both ways, tear down.
pub struct Tunnel {
    dialer: Arc<dyn DialPort>,
    pool: Arc<BufferPool>,
    settings: TunnelSettings,
}

impl Tunnel {
    pub fn new(dialer: Arc<dyn DialPort>, pool: Arc<BufferPool>, settings: TunnelSettings) -> Self {
        Self { dialer, pool, settings }
    }

    pub fn dialer(&self) -> Arc<dyn DialPort> {
        self.dialer.clone()
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Serves a session that can only end by itself.
    pub async fn serve<H: Hijack>(&self, target: &str, client: H) -> Result<TunnelStats> {
        self.serve_with_cancel(&CancellationToken::new(), target, client).await
    }

    /// Serves a session; cancelling `parent` tears it down within one idle
    /// timeout interval.
    pub async fn serve_with_cancel<H: Hijack>(
        &self,
        parent: &CancellationToken,
        target: &str,
        mut client: H,
    ) -> Result<TunnelStats> {
        let mut session = Session {
            target,
            state: SessionState::Dialing,
        };

        let target_conn = match self.dialer.dial(parent, TCP, target).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!("dial {} failed: {}", target, err);
                reply(&mut client, StatusCode::BAD_GATEWAY, "CONNECT Not Allowed").await;
                return Err(ProxyError::DialFailed(format!("{}: {}", target, err)));
            }
        };

        session.enter(SessionState::Hijacking);
        let mut client_conn = match client.hijack() {
            Ok(conn) => conn,
            Err(err) => {
                error!("cannot hijack connection: {}", err);
                drop(target_conn);
                reply(&mut client, StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()).await;
                return Err(ProxyError::HijackFailed(err.to_string()));
            }
        };

        if let Some(size) = self.settings.socket_buffer_size {
            for conn in [&client_conn as &dyn TunnelIo, &target_conn as &dyn TunnelIo] {
                if let Err(err) = conn.set_socket_buffer_size(size) {
                    warn!("cannot set socket buffer size to {}: {}", size, err);
                }
            }
        }

        match timeout(self.settings.idle_timeout, client_conn.write_all(CONNECTION_ESTABLISHED)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(ProxyError::HandshakeFailed(err.to_string())),
            Err(_) => return Err(ProxyError::HandshakeFailed("timed out".to_string())),
        }

        session.enter(SessionState::Tunneling);
        let cancel = parent.child_token();
        let (client_read, client_write) = tokio::io::split(client_conn);
        let (target_read, target_write) = tokio::io::split(target_conn);

        let mut upstream = tokio::spawn(relay(
            Direction::Upstream,
            client_read,
            target_write,
            self.pool.acquire(),
            self.settings.idle_timeout,
            cancel.clone(),
        ));
        let mut downstream = tokio::spawn(relay(
            Direction::Downstream,
            target_read,
            client_write,
            self.pool.acquire(),
            self.settings.idle_timeout,
            cancel.clone(),
        ));

        let (first, second) = tokio::select! {
            first = &mut upstream => (settle(first, Direction::Upstream), drain(&mut session, &cancel, downstream)),
            first = &mut downstream => (settle(first, Direction::Downstream), drain(&mut session, &cancel, upstream)),
        };
        let second = settle(second.await, first.direction.opposite());

        session.enter(SessionState::Closed);
        let (upstream_bytes, downstream_bytes) = match first.direction {
            Direction::Upstream => (first.bytes, second.bytes),
            Direction::Downstream => (second.bytes, first.bytes),
        };
        for buf in [first.buf, second.buf].into_iter().flatten() {
            self.pool.release(buf);
        }
        if let Err(err) = &second.result {
            debug!("{} stopped with {} after cancellation", second.direction, err);
        }

        Ok(TunnelStats {
            target: target.to_string(),
            upstream_bytes,
            downstream_bytes,
            ended_by: first.direction,
            cause: first.result.err(),
        })
    }
}

impl Direction {
    fn opposite(self) -> Direction {
        match self {
            Direction::Upstream => Direction::Downstream,
            Direction::Downstream => Direction::Upstream,
        }
    }
}

/// A direction's outcome, with the buffer missing if its task panicked.
struct Settled {
    direction: Direction,
    result: io::Result<()>,
    bytes: u64,
    buf: Option<Vec<u8>>,
}

fn settle(joined: std::result::Result<Relayed, JoinError>, direction: Direction) -> Settled {
    match joined {
        Ok(relayed) => Settled {
            direction: relayed.direction,
            result: relayed.result,
            bytes: relayed.bytes,
            buf: Some(relayed.buf),
        },
        Err(err) => Settled {
            direction,
            result: Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
            bytes: 0,
            buf: None,
        },
    }
}

/// Cancels the sibling direction before handing back its handle to wait on.
fn drain(session: &mut Session<'_>, cancel: &CancellationToken, sibling: JoinHandle<Relayed>) -> JoinHandle<Relayed> {
    session.enter(SessionState::Draining);
    cancel.cancel();
    sibling
}

async fn reply<H: Hijack>(client: &mut H, status: StatusCode, message: &str) {
    if let Err(err) = client.reject(status, message).await {
        debug!("cannot send {} to client: {}", status, err);
    }
}
