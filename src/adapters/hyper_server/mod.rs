mod adapter;
mod connection;
mod connector;

pub use adapter::HyperForwardAdapter;
pub use connection::DialedConnection;
pub use connector::DialConnector;
