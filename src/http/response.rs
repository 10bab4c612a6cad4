//! Fixed responses generated by the proxy itself.

use bytes::Bytes;

use crate::http::request::RequestError;
use crate::origin::FetchError;

fn simple_response(status: u16, reason: &str, body: &str) -> Bytes {
    Bytes::from(format!(
        "HTTP/1.0 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    ))
}

/// Response for a request the proxy refuses to forward.
pub fn rejection(err: &RequestError) -> Bytes {
    match err {
        RequestError::UnsupportedMethod(_) => {
            simple_response(501, "Not Implemented", "Method not supported\n")
        }
        RequestError::UnsupportedScheme(_) => {
            simple_response(501, "Not Implemented", "Scheme not supported\n")
        }
        _ => simple_response(400, "Bad Request", "Bad request\n"),
    }
}

/// Response for a failed origin fetch.
pub fn fetch_failure(err: &FetchError) -> Bytes {
    if err.is_timeout() {
        simple_response(504, "Gateway Timeout", "Origin timed out\n")
    } else {
        simple_response(502, "Bad Gateway", "Origin request failed\n")
    }
}

/// Response for a miss that arrives after the pool stopped taking jobs.
pub fn service_unavailable() -> Bytes {
    simple_response(503, "Service Unavailable", "Proxy is shutting down\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_deterministic() {
        let a = rejection(&RequestError::UnsupportedMethod("POST".into()));
        let b = rejection(&RequestError::UnsupportedMethod("DELETE".into()));
        assert_eq!(a, b);
        assert!(a.starts_with(b"HTTP/1.0 501 Not Implemented\r\n"));
    }

    #[test]
    fn content_length_matches_body() {
        let resp = service_unavailable();
        let text = std::str::from_utf8(&resp).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let resp = fetch_failure(&FetchError::Timeout { phase: "read" });
        assert!(resp.starts_with(b"HTTP/1.0 504"));
        let resp = fetch_failure(&FetchError::EmptyResponse);
        assert!(resp.starts_with(b"HTTP/1.0 502"));
    }
}
