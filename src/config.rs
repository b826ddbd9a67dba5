use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;

/// Client settings, as they come from a config file or the environment. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root; endpoint paths are appended to it.
    pub base_url:           String,
    pub timeout_ms:         u64,
    /// Grace period of entries nobody observes anymore.
    pub keep_unused_secs:   u64,
    pub page_limit:         u32,
    pub search_debounce_ms: u64,
    pub store_name:         String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url:           "http://localhost:3000/api".to_string(),
            timeout_ms:         10_000,
            keep_unused_secs:   60,
            page_limit:         DEFAULT_LIMIT,
            search_debounce_ms: 500,
            store_name:         "shelf".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| CacheError::Config(err.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn keep_unused_for(&self) -> Duration {
        Duration::from_secs(self.keep_unused_secs)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// First page of the unfiltered listing, sized per configuration.
    pub fn list_args(&self) -> BookListArgs {
        BookListArgs {
            limit: self.page_limit.max(1),
            ..Default::default()
        }
    }

    pub fn build_store<E: QueryExecutor>(&self, executor: E) -> Result<Arc<QueryStore<E>>> {
        QueryStore::builder()
            .executor(Arc::new(executor))
            .name(self.store_name.clone())
            .keep_unused_for(self.keep_unused_for())
            .build()
            .map_err(|err| CacheError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config = ClientConfig::from_json(r#"{ "base_url": "https://lib.example.org/api", "page_limit": 24 }"#)
            .unwrap();
        assert_eq!(config.base_url, "https://lib.example.org/api");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.list_args().limit, 24);
        assert_eq!(config.list_args().page, 1);
    }

    #[test]
    fn garbage_is_a_config_error() {
        assert!(matches!(
            ClientConfig::from_json("{ \"timeout_ms\": \"soon\" }"),
            Err(CacheError::Config(_))
        ));
    }
}
