//! Core of the FHIR CapabilityStatement viewer: resilient retrieval with relay
//! fallback and JSON repair, capability validation, failure classification,
//! and the guided REST test workflow.

pub mod capability;
pub mod classify;
pub mod error;
pub mod fetcher;
pub mod json_repair;
pub mod ledger;
pub mod outcome;
pub mod permalink;
pub mod relay;
pub mod rest;
pub mod transport;
pub mod workflow;

pub use capability::{CapabilityDocument, is_valid_capability_statement, load_capability_statement};
pub use classify::{ClassifiedError, ErrorCategory, classify};
pub use error::{CapviewError, Result};
pub use fetcher::{FetchRequest, ResilientFetcher};
pub use json_repair::{Repaired, RepairFailure, parse_or_repair};
pub use ledger::{Ledger, LedgerSummary, StepStatus, WorkflowStep};
pub use outcome::{FailureKind, FetchFailure, FetchOutcome, FetchStage};
pub use permalink::{build_permalink, target_from_permalink};
pub use relay::{RelayClient, RelayEndpoint, RelayKind};
pub use rest::{RestClient, RestResponse};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportConfig, TransportError};
pub use workflow::{ConnectionTest, TestSession, TestTarget, WorkflowContext, WorkflowRun, WorkflowState};
