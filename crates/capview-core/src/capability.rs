//! CapabilityStatement validation and a read-only view over an accepted one.

use serde::Serialize;
use serde_json::Value;

use crate::fetcher::{FetchRequest, ResilientFetcher};
use crate::outcome::{FailureKind, FetchFailure, FetchOutcome, FetchStage, NOT_A_CAPABILITY_STATEMENT};

/// True for a non-null object with `resourceType == "CapabilityStatement"`
/// and a present, non-empty `fhirVersion`.
pub fn is_valid_capability_statement(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.get("resourceType").and_then(Value::as_str) != Some("CapabilityStatement") {
        return false;
    }
    match obj.get("fhirVersion") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

/// An accepted CapabilityStatement. Never mutated; a new load replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDocument {
    value: Value,
    source_url: String,
}

/// One `rest[].resource[]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSummary {
    pub resource_type: String,
    pub profile: Option<String>,
    pub interactions: Vec<String>,
    pub search_params: Vec<String>,
    pub operations: Vec<String>,
    pub versioning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecuritySummary {
    pub cors: Option<bool>,
    pub services: Vec<String>,
    pub description: Option<String>,
}

impl CapabilityDocument {
    /// Gate applied to every successful fetch.
    pub fn accept(value: Value, source_url: impl Into<String>) -> Result<Self, FetchFailure> {
        if !is_valid_capability_statement(&value) {
            tracing::warn!(
                resource_type = value.get("resourceType").and_then(|v| v.as_str()).unwrap_or("-"),
                "rejecting document that is not a CapabilityStatement"
            );
            return Err(FetchFailure::new(
                FetchStage::Parse,
                FailureKind::Validation,
                NOT_A_CAPABILITY_STATEMENT,
            ));
        }
        Ok(Self {
            value,
            source_url: source_url.into(),
        })
    }

    pub fn as_json(&self) -> &Value {
        &self.value
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// REST base URL derived from the load URL (trailing `/metadata` removed).
    pub fn base_url(&self) -> String {
        rest_base_url(&self.source_url)
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.value.pointer(pointer).and_then(Value::as_str)
    }

    pub fn fhir_version(&self) -> String {
        match &self.value["fhirVersion"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.str_at("/status")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_at("/title").or_else(|| self.str_at("/name"))
    }

    pub fn publisher(&self) -> Option<&str> {
        self.str_at("/publisher")
    }

    pub fn date(&self) -> Option<&str> {
        self.str_at("/date")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_at("/kind")
    }

    pub fn software(&self) -> Option<(String, Option<String>)> {
        let name = self.str_at("/software/name")?;
        Some((name.to_string(), self.str_at("/software/version").map(str::to_string)))
    }

    pub fn implementation(&self) -> Option<&str> {
        self.str_at("/implementation/description")
            .or_else(|| self.str_at("/implementation/url"))
    }

    pub fn formats(&self) -> Vec<String> {
        string_list(self.value.get("format"))
    }

    fn server_rest(&self) -> impl Iterator<Item = &Value> {
        self.value
            .get("rest")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    pub fn resources(&self) -> Vec<ResourceSummary> {
        self.server_rest()
            .filter_map(|rest| rest.get("resource").and_then(Value::as_array))
            .flatten()
            .filter_map(|res| {
                let resource_type = res.get("type").and_then(Value::as_str)?;
                Some(ResourceSummary {
                    resource_type: resource_type.to_string(),
                    profile: res.get("profile").and_then(Value::as_str).map(str::to_string),
                    interactions: codes(res.get("interaction"), "code"),
                    search_params: codes(res.get("searchParam"), "name"),
                    operations: codes(res.get("operation"), "name"),
                    versioning: res.get("versioning").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect()
    }

    pub fn resource(&self, resource_type: &str) -> Option<ResourceSummary> {
        self.resources()
            .into_iter()
            .find(|r| r.resource_type == resource_type)
    }

    /// System-level interactions (`rest[].interaction[].code`).
    pub fn system_interactions(&self) -> Vec<String> {
        self.server_rest()
            .flat_map(|rest| codes(rest.get("interaction"), "code"))
            .collect()
    }

    /// System-level operations (`rest[].operation[].name`).
    pub fn operations(&self) -> Vec<String> {
        self.server_rest()
            .flat_map(|rest| codes(rest.get("operation"), "name"))
            .collect()
    }

    pub fn security(&self) -> Option<SecuritySummary> {
        let security = self.server_rest().find_map(|rest| rest.get("security"))?;
        let services = security
            .get("service")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|svc| {
                svc.get("text").and_then(Value::as_str).map(str::to_string).or_else(|| {
                    svc.pointer("/coding/0/display")
                        .or_else(|| svc.pointer("/coding/0/code"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
            })
            .collect();
        Some(SecuritySummary {
            cors: security.get("cors").and_then(Value::as_bool),
            services,
            description: security
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn codes(value: Option<&Value>, field: &str) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

/// Strip a trailing `/metadata` (and any query) from a CapabilityStatement URL.
pub fn rest_base_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let trimmed = without_query.trim_end_matches('/');
    trimmed
        .strip_suffix("/metadata")
        .unwrap_or(trimmed)
        .to_string()
}

/// Fetch, then gate the result through the validator.
pub async fn load_capability_statement(
    fetcher: &ResilientFetcher,
    request: &FetchRequest,
) -> Result<CapabilityDocument, FetchFailure> {
    match fetcher.fetch(request).await {
        FetchOutcome::Success {
            document, source, repaired, ..
        } => {
            tracing::info!(%source, repaired, "CapabilityStatement retrieved, validating");
            CapabilityDocument::accept(document, request.url.clone())
        }
        FetchOutcome::Failure(failure) => Err(failure),
    }
}
