pub use hyper::StatusCode;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Connect,
    Patch,
    Trace,
    Other(String),
}

impl ProxyMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ProxyMethod::Get => "GET",
            ProxyMethod::Post => "POST",
            ProxyMethod::Put => "PUT",
            ProxyMethod::Delete => "DELETE",
            ProxyMethod::Head => "HEAD",
            ProxyMethod::Options => "OPTIONS",
            ProxyMethod::Connect => "CONNECT",
            ProxyMethod::Patch => "PATCH",
            ProxyMethod::Trace => "TRACE",
            ProxyMethod::Other(s) => s.as_str(),
        }
    }

    pub fn is_connect(&self) -> bool {
        *self == ProxyMethod::Connect
    }
}

impl From<&str> for ProxyMethod {
    fn from(s: &str) -> Self {
        match s {
            "GET" => ProxyMethod::Get,
            "POST" => ProxyMethod::Post,
            "PUT" => ProxyMethod::Put,
            "DELETE" => ProxyMethod::Delete,
            "HEAD" => ProxyMethod::Head,
            "OPTIONS" => ProxyMethod::Options,
            "CONNECT" => ProxyMethod::Connect,
            "PATCH" => ProxyMethod::Patch,
            "TRACE" => ProxyMethod::Trace,
            other => ProxyMethod::Other(other.to_string()),
        }
    }
}

impl From<&hyper::Method> for ProxyMethod {
    fn from(method: &hyper::Method) -> Self {
        ProxyMethod::from(method.as_str())
    }
}

impl std::fmt::Display for ProxyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as seen by the dispatcher and the Accept hook.
///
/// `target` is the `host[:port]` the proxy will connect to. Accept hooks may
/// rewrite it to redirect the request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: ProxyMethod,
    pub scheme: Option<String>,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub peer: Option<SocketAddr>,
}

impl ProxyRequest {
    pub fn new(method: ProxyMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            scheme: None,
            target: target.into(),
            headers: HashMap::new(),
            peer: None,
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Host part of the target, without the port.
    pub fn target_host(&self) -> &str {
        if self.target.starts_with('[') {
            return match self.target.find(']') {
                Some(end) => &self.target[..=end],
                None => &self.target,
            };
        }
        match self.target.rfind(':') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }
}

/// Outcome of running a request through the dispatcher.
#[derive(Debug, Clone)]
pub enum Admission {
    Tunnel { target: String },
    Forward { target: String },
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn non_absolute_url() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Non Absolute URL")
    }

    pub fn unsupported_scheme() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Unsupported URL Scheme")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    }

    pub fn not_allowed() -> Self {
        Self::new(StatusCode::FORBIDDEN, "CONNECT Not Allowed")
    }

    /// Plain text body sent with the error status.
    pub fn body(&self) -> String {
        format!("{}\n", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RewriteRule {
    pub target: String,
    pub replacement: String,
}
