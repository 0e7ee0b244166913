//! Guided REST testing against a discovered FHIR base URL.
//!
//! A [`TestSession`] is built once per session and owns the [`Ledger`]. The
//! full workflow walks a fixed state machine
//! (search → read → create → read → update → delete) and always reaches
//! [`WorkflowState::Complete`]: a step whose input is missing is recorded as
//! skipped instead of aborting the run.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::capability::CapabilityDocument;
use crate::json_repair;
use crate::ledger::{Ledger, LedgerSummary, WorkflowStep};
use crate::relay::{DEFAULT_RELAY_A, RelayClient, RelayEndpoint};
use crate::rest::{RestClient, RestResponse};
use crate::transport::{HttpMethod, Transport};

pub const CONNECTION_TEST_STEP: &str = "Connection Test";
pub const AUTH_BLOCKED_MESSAGE: &str = "CORS Policy Blocks Authenticated Testing";

/// Where tests are sent, and with which credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTarget {
    pub base_url: String,
    pub bearer_token: Option<String>,
}

impl TestTarget {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Target for the REST API behind a loaded CapabilityStatement.
    pub fn from_capability(doc: &CapabilityDocument, bearer_token: Option<String>) -> Self {
        Self::new(doc.base_url(), bearer_token)
    }

    #[must_use]
    pub fn without_token(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            bearer_token: None,
        }
    }

    fn patients(&self) -> String {
        format!("{}/Patient", self.base_url)
    }

    fn patient(&self, id: &str) -> String {
        format!("{}/Patient/{id}", self.base_url)
    }
}

/// State threaded through one workflow run, discarded when it ends.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowContext {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub first_discovered_id: Option<String>,
    pub created_id: Option<String>,
    /// Body returned by the read-created step, input of the update step.
    pub created_body: Option<Value>,
    /// Makes the synthetic patient's identifier unique to this run.
    pub run_token: String,
}

impl WorkflowContext {
    fn new(target: &TestTarget) -> Self {
        Self {
            base_url: target.base_url.clone(),
            auth_token: target.bearer_token.clone(),
            first_discovered_id: None,
            created_id: None,
            created_body: None,
            run_token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Search,
    ReadFirst,
    Create,
    ReadCreated,
    Update,
    Delete,
    Complete,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Search => "Search Patients",
            Self::ReadFirst => "Read Patient",
            Self::Create => "Create Patient",
            Self::ReadCreated => "Read Created Patient",
            Self::Update => "Update Patient",
            Self::Delete => "Delete Patient",
            Self::Complete => "Workflow Complete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub final_state: WorkflowState,
    pub context: WorkflowContext,
    pub summary: LedgerSummary,
}

#[derive(Debug, Clone)]
pub enum ConnectionTest {
    Completed(WorkflowStep),
    /// Direct call with a token failed at transport level; relays were not
    /// tried. `retry` is the same target without credentials.
    AuthBlocked {
        step: WorkflowStep,
        retry: TestTarget,
    },
}

impl ConnectionTest {
    pub fn step(&self) -> &WorkflowStep {
        match self {
            Self::Completed(step) | Self::AuthBlocked { step, .. } => step,
        }
    }
}

/// Synthetic patient created by the workflow.
pub fn workflow_patient(run_token: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": "TestPatient", "given": ["FHIR", "Workflow"]}],
        "gender": "unknown",
        "birthDate": "2000-01-01",
        "identifier": [{
            "system": "http://example.org/fhir-testing",
            "value": format!("WORKFLOW-TEST-{run_token}")
        }]
    })
}

/// Patient used by the single create operation when no body is supplied.
pub fn default_patient() -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": "Doe", "given": ["John", "Test"]}],
        "gender": "male",
        "birthDate": "1990-01-01",
        "identifier": [{
            "system": "http://example.org/patient-ids",
            "value": format!("TEST-{}", uuid::Uuid::new_v4().simple())
        }]
    })
}

fn mark_updated(body: &mut Value, id: &str) {
    let given = json!(["FHIR", "Workflow", "UPDATED"]);
    if let Some(Value::Object(name)) = body.pointer_mut("/name/0") {
        name.insert("given".to_string(), given);
    } else if let Some(obj) = body.as_object_mut() {
        obj.insert(
            "name".to_string(),
            json!([{"family": "TestPatient", "given": given}]),
        );
    }
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
}

fn outcome_suffix(resp: &RestResponse) -> String {
    match (resp.status, &resp.error) {
        (Some(status), _) => format!(" - HTTP {status}"),
        (None, Some(error)) => format!(" - {error}"),
        (None, None) => String::new(),
    }
}

pub struct TestSession {
    transport: Arc<dyn Transport>,
    relay_a: Option<RelayEndpoint>,
    ledger: Ledger,
}

impl TestSession {
    /// Session using the default public relay A for unauthenticated
    /// connection-test fallback.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_relay(transport, Some(RelayEndpoint::envelope(DEFAULT_RELAY_A)))
    }

    pub fn with_relay(transport: Arc<dyn Transport>, relay_a: Option<RelayEndpoint>) -> Self {
        Self {
            transport,
            relay_a,
            ledger: Ledger::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn reset(&mut self) {
        self.ledger.reset();
    }

    fn client(&self, target: &TestTarget) -> RestClient {
        RestClient::new(self.transport.clone(), target.bearer_token.clone())
    }

    fn record(&mut self, step: WorkflowStep) -> WorkflowStep {
        self.ledger.record(step.clone());
        step
    }

    /// Run the full workflow. Resets the ledger first.
    pub async fn run_workflow(&mut self, target: &TestTarget) -> WorkflowRun {
        self.ledger.reset();
        let client = self.client(target);
        let mut ctx = WorkflowContext::new(target);
        tracing::info!(base_url = %ctx.base_url, run_token = %ctx.run_token, "starting FHIR workflow");

        let mut state = WorkflowState::Search;
        loop {
            let Some((step, next)) = self.advance(state, &client, &mut ctx).await else {
                break;
            };
            self.ledger.record(step);
            state = next;
        }

        tracing::info!(summary = %self.ledger.summary(), "FHIR workflow complete");
        WorkflowRun {
            final_state: state,
            context: ctx,
            summary: self.ledger.summary(),
        }
    }

    async fn advance(
        &self,
        state: WorkflowState,
        client: &RestClient,
        ctx: &mut WorkflowContext,
    ) -> Option<(WorkflowStep, WorkflowState)> {
        let name = state.to_string();
        let transition = match state {
            WorkflowState::Complete => return None,
            WorkflowState::Search => {
                let url = format!("{}/Patient?_count=5", ctx.base_url);
                let resp = client.get(&url).await;
                let entries = resp
                    .data
                    .as_ref()
                    .and_then(|d| d.get("entry"))
                    .and_then(Value::as_array)
                    .filter(|entries| resp.success && !entries.is_empty());
                let step = match entries {
                    Some(entries) => {
                        ctx.first_discovered_id = entries[0]
                            .pointer("/resource/id")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let message = match &ctx.first_discovered_id {
                            Some(id) => format!("Found {} patients. First patient ID: {id}", entries.len()),
                            None => format!("Found {} patients, but the first entry has no ID", entries.len()),
                        };
                        WorkflowStep::passed(name, message)
                    }
                    None => WorkflowStep::failed(
                        name,
                        format!("No patients found or search failed{}", outcome_suffix(&resp)),
                    ),
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::ReadFirst)
            }
            WorkflowState::ReadFirst => {
                let Some(id) = ctx.first_discovered_id.clone() else {
                    return Some((
                        WorkflowStep::skipped(name, "Skipped: search did not discover a patient ID"),
                        WorkflowState::Create,
                    ));
                };
                let resp = client.get(&format!("{}/Patient/{id}", ctx.base_url)).await;
                let step = if resp.success {
                    WorkflowStep::passed(name, format!("Successfully read Patient/{id}"))
                } else {
                    WorkflowStep::failed(
                        name,
                        format!("Failed to read Patient/{id}{}", outcome_suffix(&resp)),
                    )
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::Create)
            }
            WorkflowState::Create => {
                let body = workflow_patient(&ctx.run_token);
                let resp = client.post(&format!("{}/Patient", ctx.base_url), &body).await;
                ctx.created_id = if resp.success { resp.resource_id() } else { None };
                let step = match (&ctx.created_id, resp.success) {
                    (Some(id), _) => WorkflowStep::passed(name, format!("Successfully created Patient/{id}")),
                    (None, true) => WorkflowStep::failed(
                        name,
                        "Create succeeded but the response carried no resource ID",
                    ),
                    (None, false) => WorkflowStep::failed(
                        name,
                        format!(
                            "Failed to create test patient or server does not support create{}",
                            outcome_suffix(&resp)
                        ),
                    ),
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::ReadCreated)
            }
            WorkflowState::ReadCreated => {
                let Some(id) = ctx.created_id.clone() else {
                    return Some((
                        WorkflowStep::skipped(name, "Skipped: no created patient ID"),
                        WorkflowState::Update,
                    ));
                };
                let resp = client.get(&format!("{}/Patient/{id}", ctx.base_url)).await;
                let step = if resp.success {
                    ctx.created_body = resp.data.clone();
                    WorkflowStep::passed(name, format!("Successfully read newly created Patient/{id}"))
                } else {
                    WorkflowStep::failed(
                        name,
                        format!("Failed to read created Patient/{id}{}", outcome_suffix(&resp)),
                    )
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::Update)
            }
            WorkflowState::Update => {
                let (Some(id), Some(mut body)) = (ctx.created_id.clone(), ctx.created_body.clone()) else {
                    return Some((
                        WorkflowStep::skipped(name, "Skipped: the created patient was not read back"),
                        WorkflowState::Delete,
                    ));
                };
                mark_updated(&mut body, &id);
                let resp = client.put(&format!("{}/Patient/{id}", ctx.base_url), &body).await;
                let step = if resp.success {
                    WorkflowStep::passed(name, format!("Successfully updated Patient/{id}"))
                } else {
                    WorkflowStep::failed(
                        name,
                        format!("Failed to update Patient/{id}{}", outcome_suffix(&resp)),
                    )
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::Delete)
            }
            WorkflowState::Delete => {
                let (Some(id), true) = (ctx.created_id.clone(), ctx.created_body.is_some()) else {
                    return Some((
                        WorkflowStep::skipped(name, "Skipped: the created patient was not read back"),
                        WorkflowState::Complete,
                    ));
                };
                let resp = client.delete(&format!("{}/Patient/{id}", ctx.base_url)).await;
                let step = if resp.success {
                    WorkflowStep::passed(name, format!("Successfully deleted test Patient/{id}"))
                } else {
                    WorkflowStep::failed(
                        name,
                        format!("Failed to delete test Patient/{id}{}", outcome_suffix(&resp)),
                    )
                };
                (step.with_payload(resp.data).with_status(resp.status), WorkflowState::Complete)
            }
        };
        Some(transition)
    }

    async fn single(
        &mut self,
        operation: &str,
        method: HttpMethod,
        target: &TestTarget,
        url: String,
        body: Option<&Value>,
    ) -> (WorkflowStep, RestResponse) {
        let resp = self.client(target).send(method, &url, body).await;
        let step = if resp.success {
            WorkflowStep::passed(operation, format!("{method} {url}"))
        } else {
            WorkflowStep::failed(operation, format!("{method} {url}{}", outcome_suffix(&resp)))
        };
        let step = step
            .with_payload(resp.data.clone().or_else(|| resp.status.map(|_| json!({}))))
            .with_status(resp.status);
        (self.record(step), resp)
    }

    /// `GET {base}/Patient[?params]`.
    pub async fn search(&mut self, target: &TestTarget, params: Option<&str>) -> WorkflowStep {
        let url = match params.map(str::trim).filter(|p| !p.is_empty()) {
            Some(params) => format!("{}?{}", target.patients(), params.trim_start_matches('?')),
            None => target.patients(),
        };
        self.single("Search", HttpMethod::Get, target, url, None).await.0
    }

    pub async fn read(&mut self, target: &TestTarget, id: &str) -> WorkflowStep {
        let id = id.trim();
        if id.is_empty() {
            return self.record(WorkflowStep::failed("Read", "Patient ID is required"));
        }
        self.single("Read", HttpMethod::Get, target, target.patient(id), None)
            .await
            .0
    }

    /// `POST {base}/Patient`. Returns the step and the new resource ID.
    pub async fn create(
        &mut self,
        target: &TestTarget,
        body: Option<&str>,
    ) -> (WorkflowStep, Option<String>) {
        let body = match body.map(str::trim).filter(|b| !b.is_empty()) {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => value,
                Err(e) => {
                    return (self.record(WorkflowStep::failed("Create", format!("Invalid JSON: {e}"))), None);
                }
            },
            None => default_patient(),
        };
        let (step, resp) = self
            .single("Create", HttpMethod::Post, target, target.patients(), Some(&body))
            .await;
        let created_id = if resp.success { resp.resource_id() } else { None };
        (step, created_id)
    }

    /// `PUT {base}/Patient/{id}`; the body's `id` is forced to `id`.
    pub async fn update(&mut self, target: &TestTarget, id: &str, body: &str) -> WorkflowStep {
        let id = id.trim();
        if id.is_empty() {
            return self.record(WorkflowStep::failed("Update", "Patient ID is required"));
        }
        if body.trim().is_empty() {
            return self.record(WorkflowStep::failed("Update", "Patient JSON is required"));
        }
        let mut value = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => {
                return self.record(WorkflowStep::failed(
                    "Update",
                    "Invalid JSON: a Patient resource must be a JSON object",
                ));
            }
            Err(e) => return self.record(WorkflowStep::failed("Update", format!("Invalid JSON: {e}"))),
        };
        value["id"] = Value::String(id.to_string());
        self.single("Update", HttpMethod::Put, target, target.patient(id), Some(&value))
            .await
            .0
    }

    /// `DELETE {base}/Patient/{id}`. Confirmation is the caller's job.
    pub async fn delete(&mut self, target: &TestTarget, id: &str) -> WorkflowStep {
        let id = id.trim();
        if id.is_empty() {
            return self.record(WorkflowStep::failed("Delete", "Patient ID is required"));
        }
        self.single("Delete", HttpMethod::Delete, target, target.patient(id), None)
            .await
            .0
    }

    /// Check reachability with `GET {base}/Patient?_count=1`.
    ///
    /// Without a token a transport failure falls back to relay A. With a
    /// token it never does; the result offers a retry without credentials.
    pub async fn test_connection(&mut self, target: &TestTarget) -> ConnectionTest {
        let url = format!("{}?_count=1", target.patients());
        let resp = self.client(target).get(&url).await;

        if let Some(status) = resp.status {
            let step = if resp.success {
                WorkflowStep::passed(CONNECTION_TEST_STEP, format!("Direct: GET {url}"))
            } else {
                WorkflowStep::failed(CONNECTION_TEST_STEP, format!("Direct: GET {url} - HTTP {status}"))
            };
            let step = step
                .with_payload(Some(resp.data.unwrap_or_else(|| json!({}))))
                .with_status(Some(status));
            return ConnectionTest::Completed(self.record(step));
        }

        let direct_error = resp.error.unwrap_or_else(|| "unknown transport error".to_string());

        if target.bearer_token.is_some() {
            tracing::warn!(url = %url, "authenticated connection test blocked; relay not attempted");
            let step = WorkflowStep::failed(CONNECTION_TEST_STEP, AUTH_BLOCKED_MESSAGE).with_payload(Some(json!({
                "issue": "The FHIR server could not be reached directly from this client",
                "authentication": "Bearer tokens cannot be sent through relays for security reasons",
                "explanation": "Many FHIR servers accept server-to-server calls but block cross-origin browser requests",
                "solutions": [
                    "Your FHIR server likely works fine with backend applications",
                    "Ask your FHIR server admin to add CORS headers for browser testing",
                    "Run this tool from the same domain as your FHIR server",
                    "Test basic connectivity without authentication"
                ],
                "technicalDetails": format!("Direct fetch error: {direct_error}")
            })));
            return ConnectionTest::AuthBlocked {
                step: self.record(step),
                retry: target.without_token(),
            };
        }

        let Some(endpoint) = self.relay_a.clone() else {
            let step = WorkflowStep::failed(
                CONNECTION_TEST_STEP,
                format!("Direct: GET {url} - {direct_error}"),
            );
            return ConnectionTest::Completed(self.record(step));
        };

        let relay = RelayClient::new(self.transport.clone(), endpoint);
        let step = match relay.fetch_raw(&url, None).await {
            Err(relay_error) => WorkflowStep::failed(
                CONNECTION_TEST_STEP,
                format!(
                    "Both direct and relay requests failed. Direct error: {direct_error}. Relay error: {}",
                    relay_error.message
                ),
            ),
            Ok(relayed) if !relay.endpoint().accepts_status(relayed.http_status) => WorkflowStep::failed(
                CONNECTION_TEST_STEP,
                format!("Relay: FHIR server returned HTTP {}", relayed.http_status),
            )
            .with_payload(Some(json!({"rawResponse": relayed.body})))
            .with_status(Some(relayed.http_status)),
            Ok(relayed) => match json_repair::parse_or_repair(&relayed.body) {
                Ok(doc) => WorkflowStep::passed(CONNECTION_TEST_STEP, format!("Relay: GET {url}"))
                    .with_payload(Some(doc.value))
                    .with_status(Some(relayed.http_status)),
                Err(_) => WorkflowStep::failed(
                    CONNECTION_TEST_STEP,
                    "Relay: Invalid JSON response from server",
                )
                .with_payload(Some(json!({"rawResponse": relayed.body}))),
            },
        };
        ConnectionTest::Completed(self.record(step))
    }
}
