//! Multi-stage CapabilityStatement retrieval.
//!
//! Stages run strictly in order: direct GET, relay A, relay B. Only a
//! transport failure escalates to the next stage. A completed direct exchange
//! with an error status is the server's definitive answer and is reported as
//! is; so is a body that stays unparsable after JSON repair.

use std::sync::Arc;

use crate::error::{CapviewError, Result};
use crate::outcome::{
    ALL_PATHS_FAILED_PREFIX, FetchFailure, FetchOutcome, FetchStage, decode_document,
};
use crate::relay::{DEFAULT_RELAY_A, DEFAULT_RELAY_B, RelayClient, RelayEndpoint};
use crate::transport::{HttpRequest, Transport};

pub const FHIR_JSON_ACCEPT: &str = "application/fhir+json, application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Append `_format=json` to the URL.
    pub force_json_format: bool,
    pub bearer_token: Option<String>,
}

impl FetchRequest {
    /// Validate a user-entered URL and build a request for it.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(CapviewError::EmptyUrl);
        }
        url::Url::parse(url)?;
        Ok(Self {
            url: url.to_string(),
            force_json_format: true,
            bearer_token: None,
        })
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_json_format(mut self, force: bool) -> Self {
        self.force_json_format = force;
        self
    }

    /// URL actually requested from the server.
    pub fn target_url(&self) -> String {
        if !self.force_json_format || self.url.contains("_format=") {
            return self.url.clone();
        }
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}_format=json", self.url)
    }
}

enum StageResult {
    /// Terminal: the pipeline stops here.
    Done(FetchOutcome),
    /// Transport failure: try the next stage.
    Escalate(FetchFailure),
}

pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    relays: Vec<RelayClient>,
}

impl ResilientFetcher {
    /// Fetcher using the two public relays.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_relays(
            transport,
            Some(RelayEndpoint::envelope(DEFAULT_RELAY_A)),
            Some(RelayEndpoint::raw(DEFAULT_RELAY_B)),
        )
    }

    /// Fetcher with explicit relays; `None` disables that stage.
    pub fn with_relays(
        transport: Arc<dyn Transport>,
        relay_a: Option<RelayEndpoint>,
        relay_b: Option<RelayEndpoint>,
    ) -> Self {
        let relays = [(relay_a, FetchStage::RelayA), (relay_b, FetchStage::RelayB)]
            .into_iter()
            .filter_map(|(endpoint, stage)| {
                endpoint.map(|e| RelayClient::new(transport.clone(), e).at_stage(stage))
            })
            .collect();
        Self { transport, relays }
    }

    /// Run the pipeline. Always yields exactly one outcome.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let target = request.target_url();
        let token = request.bearer_token.as_deref();

        let direct_error = match self.direct(&target, token).await {
            StageResult::Done(outcome) => return outcome,
            StageResult::Escalate(failure) => failure,
        };

        if let Some(token) = token {
            // Relays refuse authenticated requests before any I/O.
            let refusal = match self.relays.first() {
                Some(relay) => relay.fetch_raw(&target, Some(token)).await.err(),
                None => None,
            };
            return FetchOutcome::Failure(match refusal {
                Some(refusal) => {
                    tracing::warn!(url = %target, "direct fetch failed; relays refused the authenticated request");
                    FetchFailure {
                        message: format!("{}. {}", direct_error.message, refusal.message),
                        ..refusal
                    }
                }
                None => direct_error,
            });
        }

        let mut relay_error = None;
        for relay in &self.relays {
            match self.relayed(relay, &target).await {
                StageResult::Done(FetchOutcome::Failure(failure)) => {
                    relay_error = Some(failure);
                    break;
                }
                StageResult::Done(outcome) => return outcome,
                StageResult::Escalate(failure) => {
                    tracing::warn!(stage = %failure.stage, error = %failure.message, "relay failed, escalating");
                    relay_error = Some(failure);
                }
            }
        }

        match relay_error {
            Some(relay_error) => FetchOutcome::Failure(FetchFailure {
                message: format!(
                    "{ALL_PATHS_FAILED_PREFIX}. Direct error: {}. Relay error: {}",
                    direct_error.message, relay_error.message
                ),
                ..relay_error
            }),
            None => FetchOutcome::Failure(direct_error),
        }
    }

    async fn direct(&self, target: &str, token: Option<&str>) -> StageResult {
        let stage = FetchStage::DirectFetch;
        tracing::info!(url = %target, "attempting direct fetch");

        let mut request = HttpRequest::get(target).header("Accept", FHIR_JSON_ACCEPT);
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let resp = match self.transport.send(request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "direct fetch failed at transport level");
                return StageResult::Escalate(FetchFailure::transport(stage, e.message));
            }
        };

        if !resp.is_success() {
            return StageResult::Done(FetchOutcome::Failure(FetchFailure::http(
                stage,
                resp.status,
                format!("HTTP {}: {}", resp.status, resp.reason()),
            )));
        }

        StageResult::Done(match decode_document(stage, &resp.body) {
            Ok(doc) => FetchOutcome::Success {
                repaired: doc.was_repaired(),
                document: doc.value,
                source: stage,
            },
            Err(failure) => FetchOutcome::Failure(failure),
        })
    }

    async fn relayed(&self, relay: &RelayClient, target: &str) -> StageResult {
        match relay.fetch_document(target, None).await {
            Ok(doc) => StageResult::Done(FetchOutcome::Success {
                repaired: doc.document.was_repaired(),
                document: doc.document.value,
                source: relay.stage(),
            }),
            Err(failure) if failure.is_transport() => StageResult::Escalate(failure),
            Err(failure) => StageResult::Done(FetchOutcome::Failure(failure)),
        }
    }
}
