//! Cache partitions and the storage that holds them.
//!
//! ```text
//! CacheStorage
//!     └── Cache (partition, e.g. "modern-jan-v1-images")
//!             └── RequestKey (method + URL) → CacheEntry
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use sitekit_net::{Request, Response, ResponseType};
use url::Url;

/// Identity of a cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Key for a request. Fragments never reach the network, so they are dropped.
    pub fn for_request(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.clone(),
            url: url.to_string(),
        }
    }

    /// Key for a plain GET of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET,
            url: url.to_string(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Final response URL.
    pub url: Url,

    /// Response status.
    pub status: u16,

    /// Response headers, in arrival order.
    pub headers: Vec<(String, String)>,

    /// Response type at the time of storing.
    pub response_type: ResponseType,

    /// Response body.
    pub body: Bytes,

    /// Stored at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Copy a response for storage.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers,
            response_type: response.response_type,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the stored copy.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Response {
            url: self.url.clone(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            response_type: self.response_type,
            body: self.body.clone(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single named partition.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, replacing any previous one for the same key.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All stored request keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All partitions visible to a router (the `caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Get an existing cache mutably without creating it.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.get_mut(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match a request in the named caches, first hit in `names` order wins.
    pub fn match_in(&self, names: &[String], key: &RequestKey) -> Option<&CacheEntry> {
        names
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, body: &'static str) -> Response {
        Response::new(Url::parse(url).unwrap(), StatusCode::OK)
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/css"),
            )
            .with_body(body)
    }

    fn key(url: &str) -> RequestKey {
        RequestKey::get(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_request_key_ignores_fragment() {
        let request = Request::get(Url::parse("https://modern-jan.com/blog/#top").unwrap());
        assert_eq!(
            RequestKey::for_request(&request),
            key("https://modern-jan.com/blog/")
        );
    }

    #[test]
    fn test_request_key_distinguishes_method() {
        let url = Url::parse("https://modern-jan.com/api").unwrap();
        let post = Request::get(url.clone()).method(Method::POST);
        assert_ne!(RequestKey::for_request(&post), RequestKey::get(&url));
        assert_eq!(RequestKey::for_request(&post).to_string(), "POST https://modern-jan.com/api");
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("modern-jan-v1-static");
        let url = "https://modern-jan.com/_astro/index.css";
        cache.put(key(url), CacheEntry::from_response(&response(url, "body{}")));

        assert!(cache.match_request(&key(url)).is_some());
        assert!(cache
            .match_request(&key("https://modern-jan.com/_astro/other.css"))
            .is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("modern-jan-v1-static");
        let url = "https://modern-jan.com/_astro/index.css";
        cache.put(key(url), CacheEntry::from_response(&response(url, "body{}")));

        assert!(cache.delete(&key(url)));
        assert!(cache.is_empty());
        assert!(!cache.delete(&key(url)));
    }

    #[test]
    fn test_cache_put_replaces() {
        let mut cache = Cache::new("modern-jan-v1-dynamic");
        let url = "https://modern-jan.com/blog/";
        cache.put(key(url), CacheEntry::from_response(&response(url, "old")));
        cache.put(key(url), CacheEntry::from_response(&response(url, "new")));

        assert_eq!(cache.keys().len(), 1);
        assert_eq!(&cache.match_request(&key(url)).unwrap().body[..], b"new");
    }

    #[test]
    fn test_entry_round_trips_response() {
        let original = response("https://modern-jan.com/_astro/a.css", "a{}").with_header(
            http::header::VARY,
            HeaderValue::from_static("accept-encoding"),
        );
        let restored = CacheEntry::from_response(&original).to_response();

        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.body, original.body);
        assert_eq!(restored.header("content-type"), Some("text/css"));
        assert_eq!(restored.header("vary"), Some("accept-encoding"));
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("modern-jan-v1-images"));
        assert!(storage.get("modern-jan-v1-images").is_none());

        storage.open("modern-jan-v1-images");
        assert!(storage.has("modern-jan-v1-images"));

        assert!(storage.delete("modern-jan-v1-images"));
        assert!(!storage.has("modern-jan-v1-images"));
    }

    #[test]
    fn test_cache_storage_keys_sorted() {
        let mut storage = CacheStorage::new();
        storage.open("modern-jan-v1-static");
        storage.open("modern-jan-v1-dynamic");
        storage.open("modern-jan-v1-images");

        assert_eq!(
            storage.keys(),
            vec![
                "modern-jan-v1-dynamic".to_string(),
                "modern-jan-v1-images".to_string(),
                "modern-jan-v1-static".to_string(),
            ]
        );
    }

    #[test]
    fn test_match_in_respects_order() {
        let url = "https://modern-jan.com/offline.html";
        let mut storage = CacheStorage::new();
        storage
            .open("b")
            .put(key(url), CacheEntry::from_response(&response(url, "from b")));
        storage
            .open("a")
            .put(key(url), CacheEntry::from_response(&response(url, "from a")));

        let names = vec!["missing".to_string(), "b".to_string(), "a".to_string()];
        let hit = storage.match_in(&names, &key(url)).unwrap();
        assert_eq!(&hit.body[..], b"from b");

        assert!(storage.match_in(&["c".to_string()], &key(url)).is_none());
    }
}
