//! Append-only record of test step outcomes and the summary computed over it.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

/// Payload display limit, in characters.
pub const PAYLOAD_DISPLAY_LIMIT: usize = 2000;
const TRUNCATION_SUFFIX: &str = "\n... (truncated)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Not attempted because a prerequisite was unavailable.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            payload: None,
            http_status: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn passed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Passed, message)
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Failed, message)
    }

    pub fn skipped(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Skipped, message)
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn success(&self) -> bool {
        self.status == StepStatus::Passed
    }

    /// Pretty-printed payload, truncated for display.
    pub fn payload_preview(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        let text = match payload {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        Some(truncate_for_display(&text, PAYLOAD_DISPLAY_LIMIT))
    }
}

pub fn truncate_for_display(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_SUFFIX}", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub passed: usize,
    /// Includes skipped steps.
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            return f.write_str("No tests run yet");
        }
        write!(
            f,
            "{} tests: {} passed, {} failed",
            self.total, self.passed, self.failed
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    steps: Vec<WorkflowStep>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: WorkflowStep) -> &WorkflowStep {
        match step.status {
            StepStatus::Passed => tracing::info!(step = %step.name, message = %step.message, "step passed"),
            StepStatus::Failed => tracing::warn!(step = %step.name, message = %step.message, "step failed"),
            StepStatus::Skipped => tracing::warn!(step = %step.name, message = %step.message, "step skipped"),
        }
        self.steps.push(step);
        &self.steps[self.steps.len() - 1]
    }

    pub fn reset(&mut self) {
        self.steps.clear();
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn last(&self) -> Option<&WorkflowStep> {
        self.steps.last()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn summary(&self) -> LedgerSummary {
        let passed = self.steps.iter().filter(|s| s.success()).count();
        let skipped = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();
        LedgerSummary {
            total: self.steps.len(),
            passed,
            failed: self.steps.len() - passed,
            skipped,
        }
    }
}
