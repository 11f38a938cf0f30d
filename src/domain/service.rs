use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Admission, ProxyRequest, Rejection};
use crate::ports::AcceptPort;

const DEFAULT_PORT: &str = ":80";

/// Classifies incoming requests and applies the Accept hook.
#[derive(Clone)]
pub struct ProxyService {
    accept: Arc<dyn AcceptPort>,
    tunnel_only: bool,
}

impl ProxyService {
    pub fn new(accept: Arc<dyn AcceptPort>) -> Self {
        Self {
            accept,
            tunnel_only: false,
        }
    }

    /// Refuses every method but CONNECT with `405 Method Not Allowed`.
    pub fn tunnel_only(mut self, tunnel_only: bool) -> Self {
        self.tunnel_only = tunnel_only;
        self
    }

    pub async fn admit(&self, cancel: &CancellationToken, request: &mut ProxyRequest) -> Admission {
        if request.target.is_empty() {
            return Admission::Rejected(Rejection::non_absolute_url());
        }

        let connect = request.method.is_connect();
        if !connect {
            if self.tunnel_only {
                return Admission::Rejected(Rejection::method_not_allowed());
            }
            match request.scheme.as_deref() {
                Some("http") | Some("https") => {}
                _ => return Admission::Rejected(Rejection::unsupported_scheme()),
            }
        }

        if !request.target.contains(':') {
            request.target.push_str(DEFAULT_PORT);
        }

        if !self.accept.accept(cancel, request).await {
            debug!("{} {} refused by accept hook", request.method, request.target);
            return Admission::Rejected(Rejection::not_allowed());
        }

        let target = request.target.clone();
        if connect {
            Admission::Tunnel { target }
        } else {
            Admission::Forward { target }
        }
    }
}
