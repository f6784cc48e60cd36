use crate::backends::{ProviderBackend, ProviderReply, ProviderRequest};
use crate::budget;
use crate::chain::{self, Candidate};
use crate::config::TableHandle;
use crate::relay::{self, RelayStream};
use crate::resolver;
use crate::secrets::SecretSource;
use cascade_core::{
    AttemptFailure, CascadeError, CascadeResult, ChatRequest, FailureKind, MessageContent,
    ProviderError,
};
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Progress of one cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Nothing attempted yet.
    Pending,
    /// Candidate `i` is being attempted.
    Attempting(usize),
    /// A candidate answered.
    Succeeded,
    /// Every candidate failed.
    Exhausted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Attempting(i) => write!(f, "attempting({i})"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Exhausted => f.write_str("exhausted"),
        }
    }
}

/// Reply of the winning candidate.
pub enum DispatchReply {
    /// The vendor's complete response body, unmodified.
    Complete(serde_json::Value),
    /// A live stream to relay to the caller.
    Stream(RelayStream),
}

impl fmt::Debug for DispatchReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(body) => f.debug_tuple("Complete").field(body).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A successful cascade.
#[derive(Debug)]
pub struct Dispatched {
    /// What the winner returned.
    pub reply: DispatchReply,
    /// The candidate that answered.
    pub winner: Candidate,
    /// Failures of the candidates tried before the winner, in attempt order.
    pub failures: Vec<AttemptFailure>,
}

/// Terminal result of a cascade.
#[derive(Debug)]
pub enum CascadeOutcome {
    /// A candidate answered.
    Success(Dispatched),
    /// Every candidate failed; the history is in attempt order.
    Exhausted(Vec<AttemptFailure>),
}

impl CascadeOutcome {
    /// Converts exhaustion into the caller-visible error.
    pub fn into_result(self) -> CascadeResult<Dispatched> {
        match self {
            Self::Success(dispatched) => Ok(dispatched),
            Self::Exhausted(failures) => Err(CascadeError::Exhausted(failures)),
        }
    }
}

/// Rejects malformed requests before any candidate is attempted.
pub fn validate_request(request: &ChatRequest) -> CascadeResult<()> {
    if request.messages.is_empty() {
        return Err(CascadeError::Validation("messages must not be empty".into()));
    }
    if let Some(i) = request
        .messages
        .iter()
        .position(|m| matches!(&m.content, MessageContent::Parts(parts) if parts.is_empty()))
    {
        return Err(CascadeError::Validation(format!(
            "messages[{i}].content has no parts"
        )));
    }
    if let Some(t) = request.temperature {
        if !t.is_finite() || !(0.0..=2.0).contains(&t) {
            return Err(CascadeError::Validation(format!(
                "temperature must be between 0 and 2, got {t}"
            )));
        }
    }
    if request.max_tokens == Some(0) {
        return Err(CascadeError::Validation("max_tokens must be positive".into()));
    }
    Ok(())
}

/// Drives one request through its candidate chain.
///
/// Candidates are tried strictly one after another; the first success wins
/// and nothing after it runs. Dropping the returned future (for example when
/// the caller disconnects) drops the in-flight attempt and ends the cascade.
pub struct Dispatcher {
    table: TableHandle,
    backend: Arc<dyn ProviderBackend>,
    secrets: Arc<dyn SecretSource>,
}

impl Dispatcher {
    /// Creates a dispatcher over a routing snapshot handle.
    pub fn new(
        table: TableHandle,
        backend: Arc<dyn ProviderBackend>,
        secrets: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            table,
            backend,
            secrets,
        }
    }

    /// Handle to the routing snapshot this dispatcher reads.
    pub fn table(&self) -> &TableHandle {
        &self.table
    }

    /// Validates a request and builds its candidate chain.
    pub fn plan(&self, request: &ChatRequest) -> CascadeResult<Vec<Candidate>> {
        validate_request(request)?;
        let table = self.table.snapshot();
        let primary = resolver::resolve(request.model.as_deref(), &table)?;
        chain::build(
            &primary,
            &table,
            request.modality(),
            request,
            self.secrets.as_ref(),
        )
    }

    /// Handles a request end to end.
    pub async fn dispatch(&self, request: ChatRequest) -> CascadeResult<Dispatched> {
        let request_id = Uuid::new_v4();
        let span = info_span!("dispatch", request_id = %request_id);
        self.dispatch_in_span(&request).instrument(span).await
    }

    async fn dispatch_in_span(&self, request: &ChatRequest) -> CascadeResult<Dispatched> {
        let candidates = self.plan(request)?;
        info!(
            requested = request.model.as_deref().unwrap_or("<default>"),
            primary = %candidates[0].vendor_model,
            candidates = candidates.len(),
            modality = ?request.modality(),
            stream = request.stream,
            "Dispatching request"
        );
        self.run_cascade(request, candidates).await.into_result()
    }

    /// Runs the cascade over an already built chain.
    pub async fn run_cascade(
        &self,
        request: &ChatRequest,
        candidates: Vec<Candidate>,
    ) -> CascadeOutcome {
        let mut state = DispatchState::Pending;
        debug!(%state, candidates = candidates.len(), "Cascade starting");
        let mut failures = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.into_iter().enumerate() {
            state = DispatchState::Attempting(index);
            if index == 0 {
                info!(%state, model = %candidate.vendor_model, "Attempting primary model");
            } else {
                info!(%state, model = %candidate.vendor_model, "Attempting fallback model");
            }

            match self.attempt(index, &candidate, request).await {
                Ok(reply) => {
                    state = DispatchState::Succeeded;
                    if index > 0 {
                        info!(%state, model = %candidate.vendor_model, "Recovered with fallback");
                    } else {
                        debug!(%state, model = %candidate.vendor_model, "Primary answered");
                    }
                    return CascadeOutcome::Success(Dispatched {
                        reply,
                        winner: candidate,
                        failures,
                    });
                }
                Err(failure) => {
                    error!(
                        %state,
                        model = %failure.model,
                        kind = ?failure.kind,
                        reason = %failure.reason,
                        "Candidate failed"
                    );
                    failures.push(failure);
                }
            }
        }

        state = DispatchState::Exhausted;
        error!(%state, attempts = failures.len(), "All candidates failed");
        CascadeOutcome::Exhausted(failures)
    }

    /// One attempt. Every failure comes back as a value.
    async fn attempt(
        &self,
        index: usize,
        candidate: &Candidate,
        request: &ChatRequest,
    ) -> Result<DispatchReply, AttemptFailure> {
        let messages = if index == 0 {
            request.messages.clone()
        } else {
            budget::truncate(&request.messages, candidate.context_tokens).map_err(|e| {
                AttemptFailure {
                    role_id: candidate.role_id.clone(),
                    model: candidate.vendor_model.clone(),
                    kind: FailureKind::ContextBudget,
                    reason: e.to_string(),
                }
            })?
        };

        let provider_request = ProviderRequest::for_candidate(candidate, request, messages);
        let deadline = Instant::now() + candidate.timeout;
        let fail = |e: ProviderError| {
            AttemptFailure::from_provider(&candidate.role_id, &candidate.vendor_model, &e)
        };
        let timed_out = || ProviderError::Timeout {
            secs: candidate.timeout.as_secs(),
        };

        let reply = match timeout_at(deadline, self.backend.invoke(provider_request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(fail(e)),
            Err(_) => return Err(fail(timed_out())),
        };

        match reply {
            ProviderReply::Complete(body) => Ok(DispatchReply::Complete(body)),
            ProviderReply::Stream(mut upstream) => {
                // Nothing has reached the caller yet, so a stream that dies
                // before its first fragment still counts as a failed attempt.
                let first = match timeout_at(deadline, upstream.next()).await {
                    Ok(Some(Ok(fragment))) => Some(fragment),
                    Ok(Some(Err(e))) => return Err(fail(e)),
                    Ok(None) => {
                        warn!(model = %candidate.vendor_model, "Upstream stream ended without output");
                        None
                    }
                    Err(_) => return Err(fail(timed_out())),
                };
                Ok(DispatchReply::Stream(relay::relay(
                    first,
                    upstream,
                    candidate.timeout,
                )))
            }
        }
    }
}
