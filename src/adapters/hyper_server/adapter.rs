use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connector::DialConnector;
use crate::domain::{Admission, ProxyError, ProxyMethod, ProxyRequest, ProxyService, Rejection, Result, StatusCode};
use crate::ports::DialPort;

type Body = BoxBody<Bytes, hyper::Error>;

/// Headers that only make sense on a single hop and are never forwarded.
const HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Serves plain (non-CONNECT) proxy requests with hyper and forwards them
/// through hyper's client.
pub struct HyperForwardAdapter {
    service: Arc<ProxyService>,
    client: Client<DialConnector, Body>,
}

impl HyperForwardAdapter {
    pub fn new(service: Arc<ProxyService>, client: Client<DialConnector, Body>) -> Self {
        Self { service, client }
    }

    /// Builds the forwarding client on top of the Dial hook.
    pub fn with_dialer(service: Arc<ProxyService>, dialer: Arc<dyn DialPort>, cancel: CancellationToken) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build(DialConnector::new(dialer, cancel));
        Self::new(service, client)
    }

    /// Runs hyper's HTTP/1 server on `io` for a single request.
    pub async fn serve_connection<I>(self: Arc<Self>, io: I, peer: SocketAddr, cancel: CancellationToken)
    where
        I: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let adapter = self.clone();
        let token = cancel.clone();
        let service = service_fn(move |req| {
            let adapter = adapter.clone();
            let cancel = token.clone();
            async move { Ok::<_, Infallible>(adapter.handle(&cancel, req, peer).await) }
        });

        let conn = http1::Builder::new()
            .keep_alive(false)
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(io), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            res = conn.as_mut() => res,
            _ = cancel.cancelled() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };
        if let Err(err) = result {
            debug!("error serving {}: {}", peer, err);
        }
    }

    pub async fn handle(&self, cancel: &CancellationToken, req: Request<Incoming>, peer: SocketAddr) -> Response<Body> {
        let mut request = convert_to_domain_request(&req, peer);

        match self.service.admit(cancel, &mut request).await {
            Admission::Rejected(rejection) => error_response(&rejection),
            Admission::Tunnel { target } => {
                warn!("CONNECT {} reached the forwarding path", target);
                error_response(&Rejection::method_not_allowed())
            }
            Admission::Forward { target } => {
                let method = request.method.clone();
                self.forward(req, &target, peer).await.unwrap_or_else(|e| {
                    warn!("{} {} failed: {}", method, target, e);
                    error_response(&Rejection::new(StatusCode::BAD_GATEWAY, "Bad Gateway"))
                })
            }
        }
    }

    async fn forward(&self, req: Request<Incoming>, target: &str, peer: SocketAddr) -> Result<Response<Body>> {
        let (mut parts, body) = req.into_parts();
        parts.uri = retarget(&parts.uri, target)?;
        strip_hop_headers(&mut parts.headers);
        append_forwarded_for(&mut parts.headers, peer);

        debug!("{} {}", parts.method, parts.uri);
        let response = self
            .client
            .request(Request::from_parts(parts, body.boxed()))
            .await
            .map_err(|e| ProxyError::ForwardFailed(format!("{}", e)))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_headers(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

fn convert_to_domain_request(req: &Request<Incoming>, peer: SocketAddr) -> ProxyRequest {
    let target = req.uri().authority().map(|a| a.to_string()).unwrap_or_default();
    let mut request = ProxyRequest::new(ProxyMethod::from(req.method()), target)
        .with_headers(extract_headers(req))
        .with_peer(peer);
    request.scheme = req.uri().scheme_str().map(str::to_string);
    request
}

fn extract_headers(req: &Request<Incoming>) -> HashMap<String, String> {
    req.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|val| (k.to_string(), val.to_string())))
        .collect()
}

/// Points `uri` at `target`, keeping its scheme, path and query.
fn retarget(uri: &Uri, target: &str) -> Result<Uri> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Uri::builder()
        .scheme(uri.scheme_str().unwrap_or("http"))
        .authority(target)
        .path_and_query(path)
        .build()
        .map_err(|e| ProxyError::InvalidRequest(format!("cannot rewrite {} to {}: {}", uri, target, e)))
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

fn error_response(rejection: &Rejection) -> Response<Body> {
    let body = Full::new(Bytes::from(rejection.body()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = rejection.status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    response
}
