//! CONNECT tunnel engine.
//!
//! A [`Tunnel`] turns an accepted CONNECT request into two [`relay`] tasks
//! sharing one cancellation token. Relay buffers come from a [`BufferPool`]
//! shared by every session of the process.

mod buffer_pool;
mod coordinator;
mod relay;

use std::time::Duration;

pub use buffer_pool::BufferPool;
pub use coordinator::{SessionState, Tunnel, TunnelStats, CONNECTION_ESTABLISHED};
pub use relay::{relay, Direction, Relayed};

pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// Size of each relay buffer
    pub buffer_size: usize,
    /// Longest a single read or write may block before cancellation is checked again
    pub idle_timeout: Duration,
    /// OS send/receive buffer size applied to both sockets of a tunnel
    pub socket_buffer_size: Option<usize>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            socket_buffer_size: None,
        }
    }
}
