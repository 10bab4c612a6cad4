//! Thread-safe response cache.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use super::eviction::{EvictionPolicy, Unbounded};
use super::key::CacheKey;
use crate::observability::metrics;

/// Shared mapping from request fingerprint to raw response bytes.
///
/// Cloning is cheap and yields a handle to the same map. Values are
/// `Bytes`, so an insert publishes the whole response in one step under the
/// shard lock and a reader can only ever see a complete entry.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<CacheKey, Bytes>>,
    eviction: Arc<dyn EvictionPolicy>,
}

impl ResponseCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::with_policy(Arc::new(Unbounded))
    }

    pub fn with_policy(eviction: Arc<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            eviction,
        }
    }

    /// Cached bytes for `key`, if any.
    pub fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        let hit = self.entries.get(key).map(|entry| entry.value().clone());
        if hit.is_some() {
            self.eviction.record_hit(key);
        }
        hit
    }

    /// Publish `body` under `key`. Concurrent inserts for one key race and the
    /// last writer wins.
    pub fn insert(&self, key: CacheKey, body: Bytes) {
        let mut entry = Some(body);
        self.eviction.record_insert(&key, &mut |victims: Vec<CacheKey>| {
            if let Some(body) = entry.take() {
                self.entries.insert(key.clone(), body);
            }
            for victim in victims {
                if self.entries.remove(&victim).is_some() {
                    tracing::debug!(url = %victim, "Evicted cache entry");
                    metrics::record_cache_eviction();
                }
            }
        });
        metrics::record_cache_size(self.entries.len());
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry, sorted by key so output is deterministic.
    pub fn dump(&self, preview_len: usize) -> CacheDump {
        let mut entries: Vec<DumpEntry> = self
            .entries
            .iter()
            .map(|entry| {
                let body = entry.value();
                let cut = body.len().min(preview_len);
                DumpEntry {
                    key: entry.key().clone(),
                    size: body.len(),
                    preview: body[..cut].escape_ascii().to_string(),
                    truncated: cut < body.len(),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        CacheDump { entries }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .field("eviction", &self.eviction)
            .finish()
    }
}

/// One line of the shutdown cache dump.
#[derive(Debug, Clone)]
pub struct DumpEntry {
    pub key: CacheKey,
    pub size: usize,
    /// ASCII-escaped prefix of the cached bytes.
    pub preview: String,
    pub truncated: bool,
}

/// Human-readable listing of the cache contents.
#[derive(Debug, Clone, Default)]
pub struct CacheDump {
    pub entries: Vec<DumpEntry>,
}

impl CacheDump {
    pub fn urls(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.url()).collect()
    }
}

impl fmt::Display for CacheDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache contents ({} entries):", self.entries.len())?;
        for entry in &self.entries {
            writeln!(f, "URL: {}", entry.key.url())?;
            writeln!(
                f,
                "Content ({} bytes): {}{}",
                entry.size,
                entry.preview,
                if entry.truncated { "..." } else { "" }
            )?;
            writeln!(f, "----------------------------")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::eviction::LruCapacity;
    use std::thread;
    use url::Url;

    fn key(path: &str) -> CacheKey {
        let url = Url::parse(&format!("http://origin.test{}", path)).unwrap();
        CacheKey::from_url("GET", &url).unwrap()
    }

    #[test]
    fn insert_then_lookup() {
        let cache = ResponseCache::new();
        assert!(cache.lookup(&key("/")).is_none());

        cache.insert(key("/"), Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nhi"));
        assert_eq!(
            cache.lookup(&key("/")).unwrap(),
            Bytes::from_static(b"HTTP/1.0 200 OK\r\n\r\nhi")
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clones_share_entries() {
        let cache = ResponseCache::new();
        let other = cache.clone();
        other.insert(key("/shared"), Bytes::from_static(b"x"));
        assert!(cache.contains(&key("/shared")));
    }

    #[test]
    fn concurrent_inserts_leave_one_whole_value() {
        let cache = ResponseCache::new();
        let bodies: Vec<Bytes> = (0..8u8)
            .map(|i| Bytes::from(vec![i; 64 * 1024]))
            .collect();

        let handles: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|body| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        cache.insert(key("/race"), body.clone());
                        if let Some(seen) = cache.lookup(&key("/race")) {
                            // Never torn: every byte equals the first.
                            assert!(seen.iter().all(|b| *b == seen[0]));
                            assert_eq!(seen.len(), 64 * 1024);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let final_value = cache.lookup(&key("/race")).unwrap();
        assert!(bodies.contains(&final_value));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bounded_cache_evicts() {
        let cache = ResponseCache::with_policy(Arc::new(LruCapacity::new(1)));
        cache.insert(key("/a"), Bytes::from_static(b"a"));
        cache.insert(key("/b"), Bytes::from_static(b"b"));
        assert!(!cache.contains(&key("/a")));
        assert!(cache.contains(&key("/b")));
    }

    #[test]
    fn bounded_cache_holds_under_concurrent_inserts() {
        for round in 0..200 {
            let cache = ResponseCache::with_policy(Arc::new(LruCapacity::new(1)));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let cache = cache.clone();
                    thread::spawn(move || {
                        cache.insert(key(&format!("/r{}/t{}", round, t)), Bytes::from_static(b"x"));
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(cache.len(), 1, "round {}", round);
        }
    }

    #[test]
    fn dump_is_sorted_and_truncated() {
        let cache = ResponseCache::new();
        cache.insert(key("/z"), Bytes::from_static(b"0123456789"));
        cache.insert(key("/a"), Bytes::from_static(b"ab\r\n"));

        let dump = cache.dump(4);
        assert_eq!(
            dump.urls(),
            vec!["http://origin.test:80/a", "http://origin.test:80/z"]
        );
        assert_eq!(dump.entries[0].preview, "ab\\r\\n");
        assert!(!dump.entries[0].truncated);
        assert_eq!(dump.entries[1].preview, "0123");
        assert!(dump.entries[1].truncated);

        let text = dump.to_string();
        assert!(text.contains("URL: http://origin.test:80/z"));
        assert!(text.contains("0123..."));
    }
}
