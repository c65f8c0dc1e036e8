//! Optional remote key-value cache.
//!
//! The cache is a capability: when no remote is configured the `Disabled`
//! variant satisfies the same surface, so callers never branch on "is caching
//! enabled". Every failure degrades to a cache miss or a no-op; nothing in
//! here ever propagates an error.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub enum RemoteCache {
    Disabled,
    Http(HttpRemoteCache),
}

impl RemoteCache {
    /// Build from config: `Some(base_url)` gives an HTTP-backed cache,
    /// `None` the no-op variant.
    pub fn from_config(base_url: Option<&str>) -> Self {
        match base_url {
            Some(url) => match HttpRemoteCache::new(url) {
                Ok(cache) => RemoteCache::Http(cache),
                Err(e) => {
                    tracing::warn!(error = %e, "Remote cache unavailable, running memory-only");
                    RemoteCache::Disabled
                }
            },
            None => RemoteCache::Disabled,
        }
    }

    pub fn available(&self) -> bool {
        matches!(self, RemoteCache::Http(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            RemoteCache::Disabled => "disabled",
            RemoteCache::Http(_) => "connected",
        }
    }

    /// Fetch and decode a value; any failure is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self {
            RemoteCache::Disabled => None,
            RemoteCache::Http(cache) => cache.get_json(key).await,
        }
    }

    /// Store a value best-effort; failures are logged and swallowed.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match self {
            RemoteCache::Disabled => {}
            RemoteCache::Http(cache) => cache.set_json(key, value, ttl).await,
        }
    }
}

/// REST key-value store client: `GET {base}/{key}`, `PUT {base}/{key}?ttl_ms=`.
pub struct HttpRemoteCache {
    client: Client,
    base_url: String,
}

impl HttpRemoteCache {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3))
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(key))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let response = match self.client.get(self.key_url(key)).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(key, error = %e, "Remote cache get failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(key, error = %e, "Remote cache value undecodable");
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let mut url = self.key_url(key);
        if let Some(ttl) = ttl {
            url.push_str(&format!("?ttl_ms={}", ttl.as_millis()));
        }
        match self.client.put(url).json(value).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::debug!(key, status = %resp.status(), "Remote cache set rejected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(key, error = %e, "Remote cache set failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_cache_reports_unavailable() {
        let cache = RemoteCache::from_config(None);
        assert!(!cache.available());
        assert_eq!(cache.status(), "disabled");
    }

    #[tokio::test]
    async fn test_disabled_cache_is_a_silent_noop() {
        let cache = RemoteCache::Disabled;
        let miss: Option<Vec<String>> = cache.get_json("predictions").await;
        assert!(miss.is_none());
        // set is a no-op, must not panic or error
        cache
            .set_json("predictions", &vec!["x".to_string()], Some(Duration::from_secs(60)))
            .await;
    }

    #[test]
    fn test_key_url_encodes_key() {
        let cache = HttpRemoteCache::new("http://kv.local/ns/").unwrap();
        assert_eq!(
            cache.key_url("home:42.36:-71.06"),
            "http://kv.local/ns/home%3A42.36%3A-71.06"
        );
    }
}
