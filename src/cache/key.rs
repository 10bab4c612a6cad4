//! Cache key derivation.
//!
//! A key is the request method plus the normalized absolute URL. Two requests
//! share a cache slot only when every component matches exactly.

use std::fmt;

use url::Url;

/// Normalized (method, URL) pair identifying a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    method: String,
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: Option<String>,
}

impl CacheKey {
    /// Build a key from a parsed URL.
    ///
    /// The `url` crate already lowercases scheme and host and removes dot
    /// segments; the port is made explicit so `http://a/` and `http://a:80/`
    /// collapse to the same key. Returns `None` for URLs without a host.
    pub fn from_url(method: &str, url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };

        Some(Self {
            method: method.to_string(),
            scheme: url.scheme().to_string(),
            host,
            port,
            path,
            query: url.query().map(str::to_string),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path plus `?query` as sent on the origin request line.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// The normalized URL without the method.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme,
            self.host,
            self.port,
            self.path_and_query()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> CacheKey {
        CacheKey::from_url("GET", &Url::parse(raw).unwrap()).unwrap()
    }

    #[test]
    fn default_port_is_explicit() {
        assert_eq!(key("http://Example.COM/a"), key("http://example.com:80/a"));
        assert_eq!(key("http://example.com/a").port(), 80);
    }

    #[test]
    fn dot_segments_collapse() {
        assert_eq!(key("http://h/a/../b"), key("http://h/b"));
    }

    #[test]
    fn query_is_part_of_identity() {
        assert_ne!(key("http://h/p?x=1"), key("http://h/p?x=2"));
        assert_eq!(key("http://h/p?x=1").path_and_query(), "/p?x=1");
    }

    #[test]
    fn fragment_is_ignored() {
        assert_eq!(key("http://h/p#top"), key("http://h/p"));
    }

    #[test]
    fn display_includes_method() {
        assert_eq!(key("http://h:8080/").to_string(), "GET http://h:8080/");
    }
}
