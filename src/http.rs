use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::error::CacheError;
use crate::error::FetchError;
use crate::error::Result;
use crate::traits::ApiRequest;
use crate::traits::Method;
use crate::traits::QueryExecutor;

/// Executor talking to the catalogue REST API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client:   reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CacheError::Config(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, request: &ApiRequest) -> String {
        format!("{}{}", self.base_url, request.path)
    }
}

// The server reports failures as `{ message, error: { name } }`, sometimes with a top-level `code`.
fn api_error(status: u16, body: &Value) -> ApiError {
    let message = body.get("message").and_then(Value::as_str).map(str::to_string);
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/error/name").and_then(Value::as_str))
        .map(str::to_string);
    ApiError {
        status: Some(status),
        message,
        code,
    }
}

#[async_trait]
impl QueryExecutor for HttpExecutor {
    #[instrument(level = "debug", skip(self, request), fields(request = %request))]
    async fn execute(&self, request: ApiRequest) -> std::result::Result<Value, FetchError> {
        let url = self.url(&request);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        }
        else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            let err = api_error(status.as_u16(), &body);
            log::debug!("{} {request} -> {status}", request.endpoint);
            return Err(err.into());
        }

        Ok(body)
    }
}
