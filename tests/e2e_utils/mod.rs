#![cfg(test)]
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod origin;
pub mod proxy_server;

pub use origin::{ClosingServer, EchoServer, OriginServer, SilentServer};
pub use proxy_server::{CountingDialer, FailingDialer, TestProxyServer};
