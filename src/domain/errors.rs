use std::fmt;

#[derive(Debug, Clone)]
pub enum ProxyError {
    InvalidRequest(String),
    HeaderTooLarge,
    DialFailed(String),
    HijackFailed(String),
    HandshakeFailed(String),
    ForwardFailed(String),
    Config(String),
    Io(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProxyError::HeaderTooLarge => write!(f, "Request header section too large"),
            ProxyError::DialFailed(msg) => write!(f, "Dial failed: {}", msg),
            ProxyError::HijackFailed(msg) => write!(f, "Cannot hijack connection: {}", msg),
            ProxyError::HandshakeFailed(msg) => write!(f, "Tunnel handshake failed: {}", msg),
            ProxyError::ForwardFailed(msg) => write!(f, "Forwarding failed: {}", msg),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProxyError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
