use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::json_repair::{self, Repaired};

pub const MALFORMED_JSON_PREFIX: &str = "FHIR Server JSON Malformed";
pub const ALL_PATHS_FAILED_PREFIX: &str = "Both direct connection and relay fallback failed";
pub const HTML_RESPONSE_MESSAGE: &str = "The server returned an HTML page instead of JSON. \
     This might indicate the URL is incorrect or the server is not responding properly.";
pub const NOT_A_CAPABILITY_STATEMENT: &str =
    "The response does not appear to be a valid FHIR CapabilityStatement";

/// Attempt that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    DirectFetch,
    RelayA,
    RelayB,
    Parse,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectFetch => write!(f, "direct_fetch"),
            Self::RelayA => write!(f, "relay_a"),
            Self::RelayB => write!(f, "relay_b"),
            Self::Parse => write!(f, "parse"),
        }
    }
}

/// Error taxonomy carried by a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The exchange never completed; escalates to the next stage.
    Transport,
    /// A completed exchange with a non-2xx status.
    Http,
    /// Body was not JSON and every repair stage failed.
    RepairExhausted,
    /// Body was an HTML page.
    Html,
    /// Well-formed JSON of the wrong shape.
    Validation,
    /// A relay was asked to carry an authenticated request and refused.
    RelayRefused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub stage: FetchStage,
    pub kind: FailureKind,
    /// Raw diagnostic text, carried forward unmodified until classification.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl FetchFailure {
    pub fn new(stage: FetchStage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            http_status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn transport(stage: FetchStage, message: impl Into<String>) -> Self {
        Self::new(stage, FailureKind::Transport, message)
    }

    pub fn http(stage: FetchStage, status: u16, message: impl Into<String>) -> Self {
        Self::new(stage, FailureKind::Http, message).with_status(status)
    }

    pub fn is_transport(&self) -> bool {
        self.kind == FailureKind::Transport
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchFailure {}

/// Result of one fetch-pipeline invocation: exactly one variant.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success {
        document: Value,
        /// Stage whose response produced the document.
        source: FetchStage,
        repaired: bool,
    },
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Value, FetchFailure> {
        match self {
            Self::Success { document, .. } => Ok(document),
            Self::Failure(f) => Err(f),
        }
    }
}

/// Parse a response body, falling back to JSON repair, and turn an
/// unrecoverable body into a failure attributed to `stage`.
pub(crate) fn decode_document(stage: FetchStage, body: &str) -> Result<Repaired, FetchFailure> {
    json_repair::parse_or_repair(body).map_err(|failure| {
        if json_repair::looks_like_html(body) {
            tracing::warn!(%stage, "response body is HTML, not JSON");
            FetchFailure::new(stage, FailureKind::Html, HTML_RESPONSE_MESSAGE)
        } else {
            tracing::warn!(%stage, error = %failure, "JSON repair exhausted");
            FetchFailure::new(
                stage,
                FailureKind::RepairExhausted,
                format!("{MALFORMED_JSON_PREFIX}: {failure}"),
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_document_reports_html_distinctly() {
        let err = decode_document(FetchStage::RelayA, "<html><body>Error</body></html>").unwrap_err();
        assert_eq!(err.kind, FailureKind::Html);
        assert_eq!(err.stage, FetchStage::RelayA);
        assert!(err.message.starts_with("The server returned an HTML page"));
    }

    #[test]
    fn test_decode_document_reports_malformed_json() {
        let err = decode_document(FetchStage::DirectFetch, "{\"a\": tru}").unwrap_err();
        assert_eq!(err.kind, FailureKind::RepairExhausted);
        assert!(err.message.starts_with("FHIR Server JSON Malformed: JSON Parse Error at line 1"));
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = FetchOutcome::Success {
            document: serde_json::json!({}),
            source: FetchStage::DirectFetch,
            repaired: false,
        };
        assert!(ok.is_success());
        assert!(ok.failure().is_none());

        let failed = FetchOutcome::Failure(FetchFailure::http(FetchStage::DirectFetch, 404, "HTTP 404"));
        assert_eq!(failed.failure().unwrap().http_status, Some(404));
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(FetchStage::DirectFetch.to_string(), "direct_fetch");
        assert_eq!(FetchStage::RelayB.to_string(), "relay_b");
    }
}
