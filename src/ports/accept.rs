use crate::domain::ProxyRequest;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Port deciding whether a request may go through the proxy
#[async_trait]
pub trait AcceptPort: Send + Sync {
    /// Called once per request, before any socket is opened.
    ///
    /// The target address is `request.target`; implementations may rewrite it
    /// to redirect the request. There is no timeout around this call.
    async fn accept(&self, cancel: &CancellationToken, request: &mut ProxyRequest) -> bool;
}

#[async_trait]
impl<F> AcceptPort for F
where
    F: Fn(&CancellationToken, &mut ProxyRequest) -> bool + Send + Sync,
{
    async fn accept(&self, cancel: &CancellationToken, request: &mut ProxyRequest) -> bool {
        self(cancel, request)
    }
}
