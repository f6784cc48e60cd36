use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use cascade_core::ChatRequest;
use cascade_router::DispatchReply;
use futures_util::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

/// Header naming the vendor model that produced the answer.
pub const MODEL_HEADER: &str = "x-cascade-model";

/// `POST /v1/chat/completions`.
///
/// A complete reply is returned as the winning vendor's body, unmodified. A
/// streamed reply is framed as server-sent events ending in `data: [DONE]` or
/// an error event.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ChatRequest =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let dispatched = state.dispatcher.dispatch(request).await?;
    debug!(
        model = %dispatched.winner.vendor_model,
        failed_attempts = dispatched.failures.len(),
        "Cascade answered"
    );

    let mut response = match dispatched.reply {
        DispatchReply::Complete(body) => Json(body).into_response(),
        DispatchReply::Stream(chunks) => {
            let events = chunks.map(|chunk| Ok::<_, Infallible>(Event::default().data(chunk.sse_data())));
            Sse::new(events).into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&dispatched.winner.vendor_model) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(MODEL_HEADER), value);
    }
    Ok(response)
}
