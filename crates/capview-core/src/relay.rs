//! Clients for the two cross-origin relays used as fetch fallbacks.
//!
//! Three wire contracts are supported. An envelope relay wraps the target's
//! answer in JSON (`{"status": {"http_code": 200}, "contents": "..."}`). A raw
//! relay takes the encoded target as the whole query string and returns the
//! target's body as-is. A query relay (`capview-relay` and other self-hosted
//! pass-through relays) takes `?url=<target>` and returns the raw body and
//! status. Either fallback slot can hold any kind.
//!
//! Relays only ever carry unauthenticated GETs: a relay cannot forward the
//! `Authorization` header, so a call with a bearer token is refused before
//! any request is made.

use std::sync::Arc;

use serde::Deserialize;

use crate::json_repair::{self, Repaired};
use crate::outcome::{FailureKind, FetchFailure, FetchStage, decode_document};
use crate::transport::{HttpRequest, Transport};

pub const DEFAULT_RELAY_A: &str = "https://api.allorigins.win/get";
pub const DEFAULT_RELAY_B: &str = "https://corsproxy.io/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    /// `GET <base>?url=<target>`, answer wrapped in a JSON envelope.
    Envelope,
    /// `GET <base>?<target>`, answer is the target's raw body.
    Raw,
    /// `GET <base>?url=<target>`, answer is the target's raw body and status.
    Query,
}

impl RelayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Raw => "raw",
            Self::Query => "query",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub kind: RelayKind,
    pub base_url: String,
}

impl RelayEndpoint {
    pub fn envelope(base_url: impl Into<String>) -> Self {
        Self {
            kind: RelayKind::Envelope,
            base_url: base_url.into(),
        }
    }

    pub fn raw(base_url: impl Into<String>) -> Self {
        Self {
            kind: RelayKind::Raw,
            base_url: base_url.into(),
        }
    }

    pub fn query(base_url: impl Into<String>) -> Self {
        Self {
            kind: RelayKind::Query,
            base_url: base_url.into(),
        }
    }

    /// Parse a relay setting: a base URL, optionally prefixed with its kind
    /// (`envelope:`, `raw:` or `query:`). Without a prefix `default_kind`
    /// applies.
    pub fn from_setting(setting: &str, default_kind: RelayKind) -> Self {
        let setting = setting.trim();
        for kind in [RelayKind::Envelope, RelayKind::Raw, RelayKind::Query] {
            if let Some(url) = setting
                .strip_prefix(kind.as_str())
                .and_then(|rest| rest.strip_prefix(':'))
            {
                return Self {
                    kind,
                    base_url: url.trim().to_string(),
                };
            }
        }
        Self {
            kind: default_kind,
            base_url: setting.to_string(),
        }
    }

    /// URL the relay is called with for `target`.
    pub fn relayed_url(&self, target: &str) -> String {
        let encoded = urlencoding::encode(target);
        match self.kind {
            RelayKind::Envelope | RelayKind::Query => {
                let sep = if self.base_url.contains('?') { '&' } else { '?' };
                format!("{}{sep}url={encoded}", self.base_url)
            }
            RelayKind::Raw => format!("{}?{encoded}", self.base_url.trim_end_matches('?')),
        }
    }

    /// Whether the target status reported through this relay counts as OK.
    pub fn accepts_status(&self, status: u16) -> bool {
        match self.kind {
            RelayKind::Envelope => status == 200,
            RelayKind::Raw | RelayKind::Query => (200..300).contains(&status),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// `error: details` from a pass-through relay's JSON error body, or the body.
fn relay_error_detail(body: &str) -> String {
    match serde_json::from_str::<RelayErrorBody>(body) {
        Ok(RelayErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(RelayErrorBody { error, .. }) => error,
        Err(_) => body.trim().to_string(),
    }
}

fn stage_label(stage: FetchStage) -> &'static str {
    match stage {
        FetchStage::RelayB => "Alternative relay",
        _ => "Relay",
    }
}

/// Relay answer normalized to the target's status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub http_status: u16,
    pub body: String,
}

/// Parsed document delivered through a relay.
#[derive(Debug, Clone)]
pub struct RelayDocument {
    pub document: Repaired,
    pub http_status: u16,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<EnvelopeStatus>,
    #[serde(default)]
    contents: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    http_code: Option<u16>,
}

pub struct RelayClient {
    transport: Arc<dyn Transport>,
    endpoint: RelayEndpoint,
    stage: FetchStage,
}

impl RelayClient {
    /// Client for the primary relay slot ([`FetchStage::RelayA`]).
    pub fn new(transport: Arc<dyn Transport>, endpoint: RelayEndpoint) -> Self {
        Self {
            transport,
            endpoint,
            stage: FetchStage::RelayA,
        }
    }

    /// Tag failures with `stage` instead.
    #[must_use]
    pub fn at_stage(mut self, stage: FetchStage) -> Self {
        self.stage = stage;
        self
    }

    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    pub fn stage(&self) -> FetchStage {
        self.stage
    }

    /// GET `target` through the relay and normalize the answer.
    ///
    /// Errors are the relay's own failures (network, relay-level non-2xx,
    /// unreadable envelope) and the refusal of authenticated requests. A
    /// target error status comes back as `Ok` with that status.
    pub async fn fetch_raw(
        &self,
        target: &str,
        bearer_token: Option<&str>,
    ) -> Result<RelayResponse, FetchFailure> {
        let stage = self.stage;
        if bearer_token.is_some() {
            tracing::warn!(%stage, "refusing to relay an authenticated request");
            return Err(FetchFailure::new(
                stage,
                FailureKind::RelayRefused,
                "Relay fallback is disabled for authenticated requests: \
                 the relay cannot carry the Authorization header",
            ));
        }

        let url = self.endpoint.relayed_url(target);
        let accept = match self.endpoint.kind {
            RelayKind::Envelope => "application/json",
            RelayKind::Raw | RelayKind::Query => "application/fhir+json, application/json",
        };
        tracing::info!(%stage, relay = %self.endpoint.base_url, url = target, "fetching through relay");

        let resp = self
            .transport
            .send(HttpRequest::get(&url).header("Accept", accept))
            .await
            .map_err(|e| {
                FetchFailure::transport(
                    stage,
                    format!("{} request failed: {}", stage_label(stage), e.message),
                )
            })?;

        match self.endpoint.kind {
            RelayKind::Envelope => {
                if !resp.is_success() {
                    return Err(FetchFailure::transport(
                        stage,
                        format!(
                            "{} request failed: HTTP {}: {}",
                            stage_label(stage),
                            resp.status,
                            resp.reason()
                        ),
                    )
                    .with_status(resp.status));
                }
                let envelope: Envelope = serde_json::from_str(&resp.body).map_err(|e| {
                    FetchFailure::transport(stage, format!("Relay returned an unreadable envelope: {e}"))
                })?;
                Ok(RelayResponse {
                    http_status: envelope.status.and_then(|s| s.http_code).unwrap_or(200),
                    body: envelope.contents.unwrap_or_default(),
                })
            }
            // A pass-through relay answers 502 when it could not reach the target.
            RelayKind::Query if resp.status == 502 => Err(FetchFailure::transport(
                stage,
                format!(
                    "{} request failed: HTTP 502: {}",
                    stage_label(stage),
                    relay_error_detail(&resp.body)
                ),
            )
            .with_status(resp.status)),
            RelayKind::Raw | RelayKind::Query => {
                let cleaned =
                    json_repair::normalize_line_endings(&json_repair::strip_control_chars(&resp.body));
                Ok(RelayResponse {
                    http_status: resp.status,
                    body: cleaned,
                })
            }
        }
    }

    /// GET `target` through the relay and parse it, repairing if needed.
    pub async fn fetch_document(
        &self,
        target: &str,
        bearer_token: Option<&str>,
    ) -> Result<RelayDocument, FetchFailure> {
        let stage = self.stage;
        let resp = self.fetch_raw(target, bearer_token).await?;

        if !self.endpoint.accepts_status(resp.http_status) {
            let message = match self.endpoint.kind {
                RelayKind::Envelope | RelayKind::Query => {
                    format!("FHIR server returned HTTP {}", resp.http_status)
                }
                RelayKind::Raw => format!(
                    "{} request failed: HTTP {}",
                    stage_label(stage),
                    resp.http_status
                ),
            };
            return Err(FetchFailure::http(stage, resp.http_status, message));
        }

        let document = decode_document(stage, &resp.body)?;
        if document.was_repaired() {
            tracing::info!(%stage, repair_stage = %document.stage, "relay payload required JSON repair");
        }
        Ok(RelayDocument {
            document,
            http_status: resp.http_status,
        })
    }
}
