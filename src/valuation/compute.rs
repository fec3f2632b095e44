//! Pricing collaborator: result types, errors and the HTTP adapter

use crate::db::AnswerMap;
use crate::engine::ValuationCompute;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Price band of the comparable items
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub low: f64,
    pub high: f64,
}

/// What the pricing collaborator returns for one snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValuationResult {
    /// Number of comparable items found
    pub count: u64,
    #[serde(default)]
    pub median: Option<f64>,
    #[serde(default)]
    pub range: Option<PriceRange>,
    /// 0.0 to 1.0
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub sample: Vec<Value>,
}

/// Pricing failure with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ComputeError {
    pub kind: ComputeErrorKind,
    pub message: String,
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeErrorKind {
    /// Timeouts, connection failures - retryable
    Network,
    /// 5xx - retryable
    ServerError,
    /// 4xx or an unreadable body - not retryable
    InvalidRequest,
}

impl ComputeError {
    pub fn new(kind: ComputeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ComputeErrorKind::Network, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ComputeErrorKind::ServerError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ComputeErrorKind::InvalidRequest, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ComputeErrorKind::Network | ComputeErrorKind::ServerError
        )
    }
}

#[derive(Serialize)]
struct ComputeRequest<'a> {
    tenant_id: &'a str,
    snapshot: &'a AnswerMap,
}

/// Calls an HTTP pricing service: `POST {url}` with `{tenant_id, snapshot}`
pub struct HttpValuationCompute {
    client: Client,
    url: String,
}

impl HttpValuationCompute {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ComputeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ComputeError::invalid_request(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ValuationCompute for HttpValuationCompute {
    async fn compute(
        &self,
        tenant_id: &str,
        snapshot: &AnswerMap,
    ) -> Result<ValuationResult, ComputeError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ComputeRequest {
                tenant_id,
                snapshot,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ComputeError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ComputeError::network(format!("Connection failed: {e}"))
                } else {
                    ComputeError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ComputeError::network(format!("Failed to read response: {e}")))?;

        if status.is_server_error() {
            return Err(ComputeError::server_error(format!("Server error {status}: {body}")));
        }
        if !status.is_success() {
            return Err(ComputeError::invalid_request(format!("HTTP {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| {
            ComputeError::invalid_request(format!("Failed to parse response: {e} - body: {body}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_tolerates_missing_optional_fields() {
        let parsed: ValuationResult = serde_json::from_value(json!({ "count": 0 })).unwrap();
        assert_eq!(parsed, ValuationResult::default());
    }

    #[test]
    fn test_result_parses_full_body() {
        let parsed: ValuationResult = serde_json::from_value(json!({
            "count": 12,
            "median": 1450.0,
            "range": { "low": 900.0, "high": 2100.0 },
            "confidence": 0.8,
            "signals": ["maker_match"],
            "sample": [{ "title": "Omega Seamaster 1968", "price": 1500.0 }]
        }))
        .unwrap();
        assert_eq!(parsed.count, 12);
        assert_eq!(parsed.range, Some(PriceRange { low: 900.0, high: 2100.0 }));
        assert_eq!(parsed.sample.len(), 1);
    }

    #[test]
    fn test_retry_classification() {
        assert!(ComputeError::network("x").is_retryable());
        assert!(ComputeError::server_error("x").is_retryable());
        assert!(!ComputeError::invalid_request("x").is_retryable());
    }
}
