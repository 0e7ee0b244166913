//! Direct REST request primitive used by the workflow and single operations.
//!
//! Never goes through a relay: this path is typically authenticated.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::transport::{HttpMethod, HttpRequest, Transport};

pub const FHIR_JSON: &str = "application/fhir+json";

/// Result of one REST exchange. A transport failure leaves `status` unset
/// and fills `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestResponse {
    /// `data.id` as a string, when present and non-empty.
    pub fn resource_id(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// Parse a response body, wrapping non-JSON text as `{"rawResponse": text}`.
pub fn parse_body(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| json!({ "rawResponse": text })))
}

#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn Transport>,
    bearer_token: Option<String>,
}

impl RestClient {
    pub fn new(transport: Arc<dyn Transport>, bearer_token: Option<String>) -> Self {
        Self {
            transport,
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub async fn send(&self, method: HttpMethod, url: &str, body: Option<&Value>) -> RestResponse {
        let mut request = HttpRequest::new(method, url)
            .header("Accept", FHIR_JSON)
            .header("Content-Type", FHIR_JSON);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        tracing::debug!(%method, url, "sending FHIR request");
        match self.transport.send(request).await {
            Ok(resp) => {
                let success = resp.is_success();
                if !success {
                    tracing::info!(%method, url, status = resp.status, "FHIR request returned error status");
                }
                RestResponse {
                    success,
                    status: Some(resp.status),
                    data: parse_body(&resp.body),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(%method, url, error = %e, "FHIR request failed");
                RestResponse {
                    success: false,
                    status: None,
                    data: None,
                    error: Some(e.message),
                }
            }
        }
    }

    pub async fn get(&self, url: &str) -> RestResponse {
        self.send(HttpMethod::Get, url, None).await
    }

    pub async fn post(&self, url: &str, body: &Value) -> RestResponse {
        self.send(HttpMethod::Post, url, Some(body)).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> RestResponse {
        self.send(HttpMethod::Put, url, Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> RestResponse {
        self.send(HttpMethod::Delete, url, None).await
    }
}
