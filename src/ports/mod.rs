pub mod accept;
pub mod dial;
pub mod hijack;

pub use accept::AcceptPort;
pub use dial::{DialPort, TunnelIo};
pub use hijack::Hijack;
