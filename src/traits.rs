use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Display;

use crate::entry::CacheEntry;
use crate::error::FetchError;
use crate::key::CacheKey;
use crate::key::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// A fully resolved call: everything an executor needs to hit the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub method:   Method,
    /// Path relative to the API base, always starting with `/`.
    pub path:     String,
    pub query:    Vec<(String, String)>,
    pub body:     Option<Value>,
}

impl ApiRequest {
    pub fn new(endpoint: Endpoint, method: Method, path: impl Into<String>) -> Self {
        Self {
            endpoint,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query<'a>(mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            write!(f, "{}{k}={v}", if i == 0 { '?' } else { '&' })?;
        }
        Ok(())
    }
}

/// The network side of the cache. Implementors know nothing about caching or optimism; they perform one call and
/// report what came back. Retries, if wanted, are the caller's business.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    /// Returns the decoded JSON body of a successful (2xx) response.
    async fn execute(&self, request: ApiRequest) -> Result<Value, FetchError>;
}

/// Receives store changes. `entry` is `None` when the key has been evicted.
pub trait CacheObserver: Send + Sync + 'static {
    fn on_change(&self, key: &CacheKey, entry: Option<&CacheEntry>);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheKey, Option<&CacheEntry>) + Send + Sync + 'static,
{
    fn on_change(&self, key: &CacheKey, entry: Option<&CacheEntry>) {
        self(key, entry)
    }
}
