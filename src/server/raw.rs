use async_trait::async_trait;
use std::io;
use tokio::io::AsyncWriteExt;

use super::prebuffered::Prebuffered;
use crate::domain::StatusCode;
use crate::ports::{Hijack, TunnelIo};

/// A client connection whose request head has been read off the socket but
/// not yet answered.
pub struct RawClient<S> {
    conn: Option<Prebuffered<S>>,
}

impl<S: TunnelIo> RawClient<S> {
    pub fn new(conn: Prebuffered<S>) -> Self {
        Self { conn: Some(conn) }
    }
}

/// Serializes an error response the way the forwarding path renders one.
pub fn error_response_bytes(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

#[async_trait]
impl<S: TunnelIo> Hijack for RawClient<S> {
    type Conn = Prebuffered<S>;

    async fn reject(&mut self, status: StatusCode, message: &str) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        conn.write_all(&error_response_bytes(status, message)).await?;
        conn.shutdown().await
    }

    fn hijack(&mut self) -> io::Result<Self::Conn> {
        self.conn
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "connection already hijacked"))
    }
}
