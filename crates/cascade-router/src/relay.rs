use crate::backends::FragmentStream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

/// Caller-facing unit of a relayed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayChunk {
    /// One upstream fragment, untouched.
    Fragment {
        /// The fragment payload.
        payload: serde_json::Value,
    },

    /// The upstream finished cleanly.
    Done,

    /// The upstream failed after output had started; nothing follows.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl RelayChunk {
    /// Payload of the `data:` field for server-sent-event framing.
    pub fn sse_data(&self) -> String {
        match self {
            Self::Fragment { payload } => payload.to_string(),
            Self::Done => "[DONE]".to_string(),
            Self::Error { message } => serde_json::json!({
                "error": {
                    "message": message,
                    "type": "upstream_stream_error",
                }
            })
            .to_string(),
        }
    }

    /// Whether this chunk ends the relay.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment { .. })
    }
}

/// Lazily relayed stream handed to the caller.
pub type RelayStream = Pin<Box<dyn Stream<Item = RelayChunk> + Send>>;

struct RelayState {
    first: Option<serde_json::Value>,
    upstream: FragmentStream,
    idle_timeout: Duration,
    finished: bool,
}

/// Relays a winning upstream stream to the caller.
///
/// `first` is the fragment the dispatcher already pulled to confirm the
/// stream was live. Fragments are forwarded one-to-one and in order, then a
/// single terminal chunk: [`RelayChunk::Done`] on a clean end, or
/// [`RelayChunk::Error`] when the upstream fails or stays silent longer than
/// `idle_timeout`. There is no fallback to another candidate from here on.
pub fn relay(
    first: Option<serde_json::Value>,
    upstream: FragmentStream,
    idle_timeout: Duration,
) -> RelayStream {
    let state = RelayState {
        first,
        upstream,
        idle_timeout,
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if let Some(payload) = state.first.take() {
            return Some((RelayChunk::Fragment { payload }, state));
        }

        let chunk = match tokio::time::timeout(state.idle_timeout, state.upstream.next()).await {
            Ok(Some(Ok(payload))) => RelayChunk::Fragment { payload },
            Ok(Some(Err(e))) => {
                warn!(error = %e, "Upstream stream failed mid-response");
                RelayChunk::Error {
                    message: e.to_string(),
                }
            }
            Ok(None) => RelayChunk::Done,
            Err(_) => {
                warn!(idle_secs = state.idle_timeout.as_secs(), "Upstream stream went idle");
                RelayChunk::Error {
                    message: format!(
                        "upstream idle for more than {}s",
                        state.idle_timeout.as_secs()
                    ),
                }
            }
        };
        state.finished = chunk.is_terminal();
        Some((chunk, state))
    }))
}
