//! Request head parsing.
//!
//! Nothing is parsed until the header terminator has arrived. The first line
//! must split on single spaces into exactly `METHOD TARGET VERSION`; the only
//! header consulted is `Host`, used to resolve origin-form targets.

use thiserror::Error;
use url::Url;

use crate::cache::CacheKey;

/// Marks the end of the request header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Reasons a request is not forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("request header exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("relative target '{0}' without a Host header")]
    MissingHost(String),

    #[error("method '{0}' is not supported")]
    UnsupportedMethod(String),

    #[error("scheme '{0}' is not supported")]
    UnsupportedScheme(String),
}

impl RequestError {
    /// Rejections get a fixed response; everything else is closed silently.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RequestError::UnsupportedMethod(_) | RequestError::UnsupportedScheme(_)
        )
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::Malformed(_) => "malformed",
            RequestError::TooLarge { .. } => "too_large",
            RequestError::MissingHost(_) => "missing_host",
            RequestError::UnsupportedMethod(_) => "unsupported_method",
            RequestError::UnsupportedScheme(_) => "unsupported_scheme",
        }
    }
}

/// The parsed request line plus the Host header, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub host: Option<String>,
}

/// Outcome of feeding the input buffer to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// Terminator not seen yet.
    Incomplete,
    Complete(RequestHead),
}

/// Parse the request head out of `buf` once it is complete.
pub fn parse_head(buf: &[u8], max_bytes: usize) -> Result<ParseStatus, RequestError> {
    let Some(end) = find_terminator(buf) else {
        if buf.len() > max_bytes {
            return Err(RequestError::TooLarge { limit: max_bytes });
        }
        return Ok(ParseStatus::Incomplete);
    };
    if end + HEADER_TERMINATOR.len() > max_bytes {
        return Err(RequestError::TooLarge { limit: max_bytes });
    }

    let head = std::str::from_utf8(&buf[..end])
        .map_err(|_| RequestError::Malformed("request head is not valid UTF-8"))?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let tokens: Vec<&str> = request_line.split(' ').collect();
    let [method, target, version] = tokens.as_slice() else {
        return Err(RequestError::Malformed("request line must have three tokens"));
    };
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(RequestError::Malformed("empty request line token"));
    }

    let host = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());

    Ok(ParseStatus::Complete(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        host,
    }))
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

impl RequestHead {
    /// Turn a parsed head into the cache key of the resource to forward.
    pub fn resolve(&self) -> Result<CacheKey, RequestError> {
        if self.method != "GET" {
            return Err(RequestError::UnsupportedMethod(self.method.clone()));
        }

        let url = if self.target.starts_with('/') {
            let host = self
                .host
                .as_deref()
                .ok_or_else(|| RequestError::MissingHost(self.target.clone()))?;
            Url::parse(&format!("http://{}{}", host, self.target))
        } else {
            Url::parse(&self.target)
        }
        .map_err(|_| RequestError::Malformed("unparsable request target"))?;

        if url.scheme() != "http" {
            return Err(RequestError::UnsupportedScheme(url.scheme().to_string()));
        }

        CacheKey::from_url(&self.method, &url)
            .ok_or_else(|| RequestError::MissingHost(self.target.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 8 * 1024;

    fn complete(raw: &[u8]) -> RequestHead {
        match parse_head(raw, LIMIT).unwrap() {
            ParseStatus::Complete(head) => head,
            ParseStatus::Incomplete => panic!("expected complete head"),
        }
    }

    #[test]
    fn waits_for_terminator() {
        assert_eq!(
            parse_head(b"GET http://h/ HTTP/1.0\r\n", LIMIT).unwrap(),
            ParseStatus::Incomplete
        );
    }

    #[test]
    fn parses_request_line_and_host() {
        let head = complete(b"GET /index.html HTTP/1.1\r\nhost: Example.com\r\nAccept: */*\r\n\r\n");
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/index.html");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.host.as_deref(), Some("Example.com"));
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        assert_eq!(
            parse_head(b"GET\r\n\r\n", LIMIT),
            Err(RequestError::Malformed("request line must have three tokens"))
        );
    }

    #[test]
    fn double_space_is_malformed() {
        assert!(matches!(
            parse_head(b"GET  / HTTP/1.0\r\n\r\n", LIMIT),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(64));
        assert_eq!(
            parse_head(&raw, 16),
            Err(RequestError::TooLarge { limit: 16 })
        );
    }

    #[test]
    fn resolves_absolute_target() {
        let key = complete(b"GET http://Origin.test:8080/a/../b?q=1 HTTP/1.0\r\n\r\n")
            .resolve()
            .unwrap();
        assert_eq!(key.host(), "origin.test");
        assert_eq!(key.port(), 8080);
        assert_eq!(key.path_and_query(), "/b?q=1");
    }

    #[test]
    fn resolves_relative_target_against_host() {
        let key = complete(b"GET /p HTTP/1.0\r\nHost: origin.test:81\r\n\r\n")
            .resolve()
            .unwrap();
        assert_eq!(key.url(), "http://origin.test:81/p");
    }

    #[test]
    fn relative_target_needs_host() {
        assert_eq!(
            complete(b"GET / HTTP/1.0\r\n\r\n").resolve(),
            Err(RequestError::MissingHost("/".into()))
        );
    }

    #[test]
    fn non_get_is_unsupported() {
        let err = complete(b"POST / HTTP/1.0\r\n\r\n").resolve().unwrap_err();
        assert_eq!(err, RequestError::UnsupportedMethod("POST".into()));
        assert!(err.is_rejection());
    }

    #[test]
    fn https_is_unsupported() {
        let err = complete(b"GET https://h/ HTTP/1.0\r\n\r\n").resolve().unwrap_err();
        assert_eq!(err, RequestError::UnsupportedScheme("https".into()));
        assert!(err.is_rejection());
    }
}
