use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client to target
    Upstream,
    /// target to client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "client->target"),
            Direction::Downstream => write!(f, "target->client"),
        }
    }
}

/// What a relay direction hands back when it exits.
///
/// `result` is `Ok` only when the direction stopped because it was
/// cancelled. The buffer comes back so the coordinator can return it to the
/// pool once the whole session is over.
#[derive(Debug)]
pub struct Relayed {
    pub direction: Direction,
    pub result: io::Result<()>,
    pub bytes: u64,
    pub buf: Vec<u8>,
}

/// Copies `src` into `dst` until `cancel` fires or a fatal error occurs.
///
/// No single read or write waits longer than `idle_timeout`; an elapsed
/// deadline only sends the loop back to the cancellation check. Bytes that
/// were read are never read again: a timed out write is re-issued for the
/// bytes still pending.
pub async fn relay<R, W>(
    direction: Direction,
    mut src: R,
    mut dst: W,
    mut buf: Vec<u8>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> Relayed
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    let result = pump(&mut src, &mut dst, &mut buf, idle_timeout, &cancel, &mut bytes).await;
    trace!(%direction, bytes, ?result, "relay direction finished");
    Relayed {
        direction,
        result,
        bytes,
        buf,
    }
}

async fn pump<R, W>(
    src: &mut R,
    dst: &mut W,
    buf: &mut [u8],
    idle_timeout: Duration,
    cancel: &CancellationToken,
    bytes: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let read = match timeout(idle_timeout, src.read(buf)).await {
            Err(_elapsed) => continue,
            Ok(Err(err)) if is_timeout(&err) => continue,
            Ok(Err(err)) => return Err(err),
            Ok(Ok(0)) => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "source closed the connection"));
            }
            Ok(Ok(n)) => n,
        };

        let mut written = 0;
        while written < read {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match timeout(idle_timeout, dst.write(&buf[written..read])).await {
                Err(_elapsed) => continue,
                Ok(Err(err)) if is_timeout(&err) => continue,
                Ok(Err(err)) => return Err(err),
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short write: {} of {} bytes", written, read),
                    ));
                }
                Ok(Ok(n)) => written += n,
            }
        }
        *bytes += read as u64;
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
