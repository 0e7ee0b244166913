//! HTTP transport seam.
//!
//! Every network-facing component receives an `Arc<dyn Transport>` instead of
//! building its own client. A completed exchange is always an
//! [`HttpResponse`], whatever its status code; [`TransportError`] is reserved
//! for exchanges that never completed (connection refused, DNS, timeout).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CapviewError, Result};

/// Default user agent, shared with the pass-through relay.
pub const DEFAULT_USER_AGENT: &str = "FHIR-CapabilityStatement-Viewer/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether an `Authorization` header is attached.
    pub fn has_authorization(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Canonical reason phrase for the status, when one exists.
    pub fn reason(&self) -> &'static str {
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Other,
}

/// An exchange that never produced an HTTP response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            message: message.into(),
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("request timeout: {err}"))
        } else if err.is_connect() {
            Self::connect(format!("network error: failed to connect: {err}"))
        } else {
            Self::other(format!("network error: {err}"))
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout; `None` leaves it to the OS/transport defaults.
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| CapviewError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(|e| {
            tracing::debug!(url = %request.url, error = %e, "transport failure");
            TransportError::from_reqwest(&e)
        })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| {
            TransportError::other(format!("network error: failed to read response body: {e}"))
        })?;

        Ok(HttpResponse {
            status,
            body,
            content_type,
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted transport: answers by URL prefix, records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<(String, VecDeque<Reply>)>>,
        calls: Mutex<Vec<HttpRequest>>,
    }

    #[derive(Clone)]
    pub enum Reply {
        Response(HttpResponse),
        Fail(TransportError),
    }

    impl Reply {
        pub fn json(status: u16, body: serde_json::Value) -> Self {
            Self::Response(HttpResponse {
                status,
                body: body.to_string(),
                content_type: Some("application/fhir+json".into()),
            })
        }

        pub fn text(status: u16, body: &str) -> Self {
            Self::Response(HttpResponse {
                status,
                body: body.to_string(),
                content_type: None,
            })
        }

        pub fn refused() -> Self {
            Self::Fail(TransportError::connect(
                "network error: failed to connect: connection refused",
            ))
        }
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for requests whose URL starts with `prefix`; the last
        /// queued reply for a prefix repeats.
        pub fn on(self, prefix: &str, reply: Reply) -> Self {
            {
                let mut routes = self.routes.lock().unwrap();
                match routes.iter_mut().find(|(p, _)| p == prefix) {
                    Some((_, queue)) => queue.push_back(reply),
                    None => routes.push((prefix.to_string(), VecDeque::from([reply]))),
                }
            }
            self
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            let mut routes = self.routes.lock().unwrap();
            // Longest matching prefix wins so relay bases can shadow the target host.
            let route = routes
                .iter_mut()
                .filter(|(p, _)| request.url.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            let reply = match route {
                Some((_, queue)) if queue.len() > 1 => queue.pop_front(),
                Some((_, queue)) => queue.front().cloned(),
                None => None,
            };
            match reply {
                Some(Reply::Response(resp)) => Ok(resp),
                Some(Reply::Fail(err)) => Err(err),
                None => Err(TransportError::connect(format!(
                    "network error: no scripted route for {}",
                    request.url
                ))),
            }
        }
    }
}
