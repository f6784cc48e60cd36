use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`CascadeError`].
pub type CascadeResult<T> = Result<T, CascadeError>;

/// Top-level error type for the gateway.
///
/// Only these errors ever reach a caller. Per-attempt upstream failures are
/// [`ProviderError`]s and are absorbed by the dispatcher.
#[derive(Error, Debug)]
pub enum CascadeError {
    /// Missing or invalid routing table or profile. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed inbound request, rejected before any candidate is attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every candidate of the cascade failed.
    #[error("All candidates failed: {}", summarize(.0))]
    Exhausted(Vec<AttemptFailure>),
}

fn summarize(failures: &[AttemptFailure]) -> String {
    if failures.is_empty() {
        return "no candidates".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.role_id, f.model, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a single upstream invocation.
///
/// Always recoverable by cascading to the next candidate.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// The attempt did not complete within the candidate's timeout.
    #[error("timed out after {secs}s")]
    Timeout {
        /// Timeout that elapsed, in seconds.
        secs: u64,
    },

    /// Connection-level failure (DNS, TLS, reset, broken stream).
    #[error("transport error: {0}")]
    Transport(String),

    /// The vendor answered with a non-success status.
    #[error("vendor error {status}: {body}")]
    Vendor {
        /// HTTP status code returned by the vendor.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The vendor answered, but the payload could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The secret variable for the candidate is not set.
    #[error("missing credential: {0} is not set")]
    MissingCredential(String),
}

impl ProviderError {
    /// Classifies this error for the failure history.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Transport(_) => FailureKind::Transport,
            Self::Vendor { .. } => FailureKind::Vendor,
            Self::Malformed(_) => FailureKind::Malformed,
            Self::MissingCredential(_) => FailureKind::Credential,
        }
    }
}

/// Coarse classification of an attempt failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Candidate timeout elapsed.
    Timeout,
    /// Transport-level failure.
    Transport,
    /// Vendor-reported error status.
    Vendor,
    /// Unparseable vendor payload.
    Malformed,
    /// Secret could not be resolved.
    Credential,
    /// The conversation could not be fitted into the candidate's context window.
    ContextBudget,
}

/// One failed attempt within a cascade, in attempt order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Role id of the candidate that failed.
    pub role_id: String,
    /// Qualified vendor model string of the candidate.
    pub model: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable reason.
    pub reason: String,
}

impl AttemptFailure {
    /// Builds a failure record from a provider error.
    pub fn from_provider(
        role_id: impl Into<String>,
        model: impl Into<String>,
        err: &ProviderError,
    ) -> Self {
        Self {
            role_id: role_id.into(),
            model: model.into(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}
