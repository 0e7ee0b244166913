use thiserror::Error;

/// Errors raised for caller mistakes.
///
/// Network and payload problems never surface here: the fetch pipeline and
/// the workflow report those as structured outcomes instead.
#[derive(Debug, Error)]
pub enum CapviewError {
    #[error("Please enter a valid FHIR CapabilityStatement URL")]
    EmptyUrl,

    #[error("Please enter a valid URL format: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport setup failed: {0}")]
    Transport(String),
}

impl CapviewError {
    /// Create a new InvalidRequest error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

/// Convenience result type for capview operations
pub type Result<T> = std::result::Result<T, CapviewError>;
