//! HTTP transport for the daily-window capability.

use async_trait::async_trait;
use drover_config::XTwitterConfig;
use drover_core::{Fault, FaultKind};
use drover_jobs::Fetch;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const BODY_EXCERPT: usize = 200;

/// POSTs `{query, count}` to `<base_url>/<operation>`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
}

impl HttpFetcher {
    pub fn new(config: &XTwitterConfig) -> Result<Self, Fault> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| Fault::configuration(format!("Invalid base URL '{}': {e}", config.base_url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Fault::configuration(format!("Invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Fault::configuration(format!("Invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Fault::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Resolves the endpoint for `operation` below the base URL.
    pub fn endpoint(&self, operation: &str) -> Result<Url, Fault> {
        self.base_url
            .join(operation.trim_start_matches('/'))
            .map_err(|e| Fault::configuration(format!("Invalid operation '{operation}': {e}")))
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, operation: &str, query: &str, count: u64) -> Result<Vec<Value>, Fault> {
        let url = self.endpoint(operation)?;
        debug!(url = %url, query, count, "Requesting upstream");

        let response = self
            .client
            .post(url.clone())
            .json(&json!({ "query": query, "count": count }))
            .send()
            .await
            .map_err(|e| Fault::network(format!("Request to {url} failed: {e}")))?;

        let status = response.status().as_u16();
        if status == 200 {
            let body: Value = response
                .json()
                .await
                .map_err(|e| Fault::network(format!("Failed to read response from {url}: {e}")))?;
            return Ok(extract_items(body));
        }

        let body = response.text().await.unwrap_or_default();
        Err(fault_for_status(status, &body))
    }
}

/// Maps a non-200 upstream status to a fault.
pub fn fault_for_status(status: u16, body: &str) -> Fault {
    let message = match FaultKind::from_status_code(status) {
        Some(FaultKind::RateLimit) => "Rate limit exceeded".to_string(),
        Some(FaultKind::CapacityUnavailable) => "No workers available on the network".to_string(),
        Some(FaultKind::Authentication) => "Authentication failed".to_string(),
        Some(_) => "Gateway error".to_string(),
        None => {
            let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
            format!("HTTP error {status}: {excerpt}")
        }
    };
    let kind = FaultKind::from_status_code(status).unwrap_or(FaultKind::Gateway);
    Fault::new(kind, message).with_status(status)
}

/// Pulls the item list out of a 200 response.
///
/// Items live under `data`; a null or missing `data` means no items.
pub fn extract_items(body: Value) -> Vec<Value> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}
