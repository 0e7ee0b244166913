//! Maps a terminal fetch failure to a user-facing category with remediation.

use std::fmt;

use serde::Serialize;

use crate::outcome::{ALL_PATHS_FAILED_PREFIX, FetchFailure, MALFORMED_JSON_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MalformedJson,
    AllPathsFailed,
    Timeout,
    NetworkOrCors,
    Unclassified,
}

impl ErrorCategory {
    pub fn title(&self) -> &'static str {
        match self {
            Self::MalformedJson => "Malformed JSON detected: the FHIR server returned invalid JSON data",
            Self::AllPathsFailed => "Connection failed: unable to retrieve FHIR data through any method",
            Self::Timeout => "Request timeout: the FHIR server is taking too long to respond",
            Self::NetworkOrCors => "Network error: unable to fetch data from the FHIR server",
            Self::Unclassified => "Failed to load CapabilityStatement",
        }
    }

    pub fn causes(&self) -> &'static [&'static str] {
        match self {
            Self::MalformedJson => &[
                "Missing quotes around property values",
                "Unescaped characters in JSON strings",
                "Trailing commas or malformed syntax",
                "Character encoding issues in the server response",
            ],
            Self::AllPathsFailed => &[
                "FHIR server is temporarily unavailable",
                "Network connectivity issues",
                "Firewall or security restrictions",
                "Both relays are down or blocked",
            ],
            Self::Timeout => &[
                "Server performance issues or high load",
                "Network latency or slow connection",
                "Server-side processing delays",
            ],
            Self::NetworkOrCors => &[
                "CORS (Cross-Origin Resource Sharing) restrictions",
                "Network connectivity issues",
                "Invalid URL or server not responding",
            ],
            Self::Unclassified => &[],
        }
    }

    pub fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::MalformedJson => &[
                "Contact your FHIR server administrator and share this error message",
                "Ask them to validate the CapabilityStatement JSON output",
                "Validate the raw JSON with an external tool such as https://jsonlint.com/",
            ],
            Self::AllPathsFailed => &[
                "Verify the URL works in a browser",
                "Check your internet connection",
                "Wait a moment and try again",
                "Contact the server administrator if the issue persists",
            ],
            Self::Timeout => &[
                "Wait a moment and try again",
                "Check whether the server responds normally in a browser",
                "Contact the server administrator if the issue persists",
            ],
            Self::NetworkOrCors => &[
                "Check that the URL is correct and reachable",
                "Use a FHIR server that allows cross-origin requests",
                "Serve the viewer over HTTPS rather than from a local file",
            ],
            Self::Unclassified => &[],
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MalformedJson => "malformed_json",
            Self::AllPathsFailed => "all_paths_failed",
            Self::Timeout => "timeout",
            Self::NetworkOrCors => "network_or_cors",
            Self::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

/// A failure ready for display: category template plus the literal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub url: String,
    pub diagnostic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ClassifiedError {
    pub fn title(&self) -> &'static str {
        self.category.title()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category == ErrorCategory::Unclassified {
            return f.write_str(&self.diagnostic);
        }
        writeln!(f, "{}", self.title())?;
        writeln!(f)?;
        writeln!(f, "Error details: {}", self.diagnostic)?;
        let causes = self.category.causes();
        if !causes.is_empty() {
            writeln!(f)?;
            writeln!(f, "This might be due to:")?;
            for cause in causes {
                writeln!(f, "  • {cause}")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Try:")?;
        for step in self.category.remediation() {
            writeln!(f, "  • {step}")?;
        }
        writeln!(f)?;
        write!(f, "URL: {}", self.url)
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}

/// Categorize a raw diagnostic. First match wins.
pub fn categorize(message: &str, http_status: Option<u16>) -> ErrorCategory {
    if message.contains(MALFORMED_JSON_PREFIX) || message.contains("JSON Parse Error") {
        ErrorCategory::MalformedJson
    } else if message.contains(ALL_PATHS_FAILED_PREFIX) {
        ErrorCategory::AllPathsFailed
    } else if http_status == Some(408)
        || message.contains("HTTP 408")
        || contains_ci(message, "timeout")
        || contains_ci(message, "timed out")
    {
        ErrorCategory::Timeout
    } else if ["network error", "failed to connect", "failed to fetch", "cors", "error sending request"]
        .iter()
        .any(|needle| contains_ci(message, needle))
    {
        ErrorCategory::NetworkOrCors
    } else {
        ErrorCategory::Unclassified
    }
}

pub fn classify(failure: &FetchFailure, url: &str) -> ClassifiedError {
    let category = categorize(&failure.message, failure.http_status);
    tracing::debug!(%category, stage = %failure.stage, "classified fetch failure");
    ClassifiedError {
        category,
        url: url.to_string(),
        diagnostic: failure.message.clone(),
        http_status: failure.http_status,
    }
}
