use std::collections::HashMap;

use hyper::Uri;
use tokio::io::AsyncRead;

use super::prebuffered::Prebuffered;
use crate::domain::{ProxyError, ProxyMethod, ProxyRequest, Result};

/// How much of a request head is read before it's considered invalid.
pub const HEADER_SECTION_MAX_LENGTH: usize = 8192;

const MAX_HEADERS: usize = 64;

/// Request line and headers of the first request on a connection.
#[derive(Debug)]
pub struct RequestHead {
    pub method: ProxyMethod,
    pub target: String,
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    /// Reads until a complete request head is buffered.
    ///
    /// Does not remove the head from `reader`. Returns the length of the
    /// header section and the parsed head.
    pub async fn peek(reader: &mut Prebuffered<impl AsyncRead + Unpin>) -> Result<(usize, Self)> {
        loop {
            if let Some(head) = Self::parse_with_len(reader.buffer())? {
                return Ok(head);
            }
            if reader.is_full() {
                return Err(ProxyError::HeaderTooLarge);
            }
            if reader.buffer_more().await? == 0 {
                return Err(ProxyError::InvalidRequest(
                    "connection closed before end of request head".to_string(),
                ));
            }
        }
    }

    /// Parses a request head, returning `None` when it is incomplete.
    pub fn parse_with_len(buf: &[u8]) -> Result<Option<(usize, Self)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let len = match req.parse(buf) {
            Ok(httparse::Status::Partial) => return Ok(None),
            Ok(httparse::Status::Complete(len)) => len,
            Err(e) => return Err(ProxyError::InvalidRequest(e.to_string())),
        };

        let method = req
            .method
            .ok_or_else(|| ProxyError::InvalidRequest("missing method".to_string()))?;
        let target = req
            .path
            .ok_or_else(|| ProxyError::InvalidRequest("missing request target".to_string()))?;
        let headers = req
            .headers
            .iter()
            .filter_map(|h| {
                std::str::from_utf8(h.value)
                    .ok()
                    .map(|v| (h.name.to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        Ok(Some((
            len,
            Self {
                method: ProxyMethod::from(method),
                target: target.to_string(),
                headers,
            },
        )))
    }

    /// Turns the head into the dispatcher's request model.
    ///
    /// CONNECT targets are taken as `host[:port]`. Other requests need an
    /// absolute URL; an origin-form target leaves the host empty.
    pub fn into_proxy_request(self) -> ProxyRequest {
        let (scheme, target) = if self.target.starts_with('/') {
            (None, String::new())
        } else if self.method.is_connect() && !self.target.contains("://") {
            (None, self.target)
        } else {
            match self.target.parse::<Uri>() {
                Ok(uri) => (
                    uri.scheme_str().map(str::to_string),
                    uri.authority().map(|a| a.to_string()).unwrap_or_default(),
                ),
                Err(_) => (None, String::new()),
            }
        };

        let mut request = ProxyRequest::new(self.method, target).with_headers(self.headers);
        request.scheme = scheme;
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> (usize, RequestHead) {
        RequestHead::parse_with_len(raw.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn test_parse_connect_head() {
        let raw = "CONNECT www.example.com:443 HTTP/1.1\r\nHost: www.example.com:443\r\n\r\nextra";

        let (len, head) = parse(raw);

        assert_eq!(len, raw.len() - "extra".len());
        assert_eq!(head.method, ProxyMethod::Connect);
        assert_eq!(head.headers.get("host").unwrap(), "www.example.com:443");

        let request = head.into_proxy_request();
        assert_eq!(request.target, "www.example.com:443");
        assert!(request.scheme.is_none());
    }

    #[test]
    fn test_partial_head_is_incomplete() {
        let partial = RequestHead::parse_with_len(b"CONNECT a:1 HTTP/1.1\r\nHost: a").unwrap();

        assert!(partial.is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(RequestHead::parse_with_len(b"\x16\x03\x01\x02\x00\r\n\r\n").is_err());
    }

    #[test]
    fn test_absolute_form_target() {
        let (_, head) = parse("GET http://example.com:8080/index.html HTTP/1.1\r\n\r\n");

        let request = head.into_proxy_request();

        assert_eq!(request.scheme.as_deref(), Some("http"));
        assert_eq!(request.target, "example.com:8080");
    }

    #[test]
    fn test_origin_form_target_has_no_host() {
        let (_, head) = parse("GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");

        assert_eq!(head.into_proxy_request().target, "");
    }

    #[tokio::test]
    async fn test_peek_reports_oversized_head() {
        let mut raw = b"GET http://a/ HTTP/1.1\r\n".to_vec();
        raw.extend(std::iter::repeat(b'a').take(HEADER_SECTION_MAX_LENGTH));
        let mut reader = Prebuffered::new(std::io::Cursor::new(raw), HEADER_SECTION_MAX_LENGTH);

        let err = RequestHead::peek(&mut reader).await.err().unwrap();

        assert!(matches!(err, ProxyError::HeaderTooLarge));
    }

    #[tokio::test]
    async fn test_peek_reports_early_close() {
        let mut reader = Prebuffered::new(std::io::Cursor::new(b"CONNECT a:1 HTT".to_vec()), 64);

        let err = RequestHead::peek(&mut reader).await.err().unwrap();

        assert!(matches!(err, ProxyError::InvalidRequest(_)));
    }
}
