use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use capview_core::fetcher::FHIR_JSON_ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

/// Shared state for the relay handlers.
pub struct RelayState {
    pub client: reqwest::Client,
    pub allow_http: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    url: Option<String>,
}

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: "FHIR CORS Proxy",
        }),
    )
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn bad_gateway(details: String) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": "Failed to fetch from FHIR server",
            "details": details,
        })),
    )
        .into_response()
}

/// Check the `url` parameter and return the target to forward to.
pub fn validate_target(raw: Option<&str>, allow_http: bool) -> Result<Url, &'static str> {
    let raw = raw.map(str::trim).filter(|u| !u.is_empty()).ok_or("Missing url parameter")?;
    let url = Url::parse(raw).map_err(|_| "Invalid URL format")?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        _ => Err("Only HTTPS URLs are allowed"),
    }
}

/// GET /proxy?url=<target>: forward a GET and mirror the upstream reply.
pub async fn proxy(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<ProxyParams>,
) -> Response {
    let target = match validate_target(params.url.as_deref(), state.allow_http) {
        Ok(url) => url,
        Err(message) => return bad_request(message),
    };

    tracing::info!(url = %target, "relaying request");
    let upstream = match state
        .client
        .get(target.as_str())
        .header(header::ACCEPT, FHIR_JSON_ACCEPT)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(url = %target, error = %e, "upstream fetch failed");
            return bad_gateway(e.to_string());
        }
    };

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(url = %target, error = %e, "failed to read upstream body");
            return bad_gateway(e.to_string());
        }
    };

    tracing::debug!(status = status.as_u16(), bytes = body.len(), "upstream replied");
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}
