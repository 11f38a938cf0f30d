pub mod accept;
pub mod dial;
pub mod hyper_server;

pub use accept::*;
pub use dial::*;
pub use hyper_server::{DialConnector, DialedConnection, HyperForwardAdapter};
