use crate::domain::StatusCode;
use crate::ports::TunnelIo;
use async_trait::async_trait;
use std::io;

/// A client connection that is still speaking HTTP and can be detached into
/// a raw stream.
#[async_trait]
pub trait Hijack: Send {
    type Conn: TunnelIo;

    /// Answers the pending request with an error response. Does nothing once
    /// the connection has been hijacked.
    async fn reject(&mut self, status: StatusCode, message: &str) -> io::Result<()>;

    /// Takes the raw connection away from the HTTP machinery.
    fn hijack(&mut self) -> io::Result<Self::Conn>;
}
