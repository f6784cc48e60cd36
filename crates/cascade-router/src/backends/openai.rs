use super::{FragmentStream, ProviderBackend, ProviderReply, ProviderRequest};
use async_trait::async_trait;
use cascade_core::ProviderError;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::debug;

/// OpenAI-compatible chat completions backend.
///
/// Google, Zhipu, ERNIE, OpenAI and most self-hosted servers expose this
/// protocol, so one backend serves every provider in the rule table; only the
/// base URL, model name and credential differ.
pub struct OpenAiCompatBackend {
    http: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Creates a backend with a default HTTP client.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Creates a backend around an existing client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for OpenAiCompatBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderBackend for OpenAiCompatBackend {
    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let api_key = request
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredential(request.api_key_variable.clone()))?;

        let url = format!("{}/chat/completions", request.api_base);
        let mut builder = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json");
        if let Some(version) = &request.api_version {
            builder = builder.query(&[("api-version", version)]);
        }

        debug!(url = %url, model = %request.model, stream = request.stream, "Sending upstream request");

        let resp = builder
            .json(&request.body())
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::Vendor {
                status: status.as_u16(),
                body,
            });
        }

        if request.stream {
            let bytes = resp
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()));
            return Ok(ProviderReply::Stream(sse_fragments(bytes)));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if let Some(err) = body.get("error") {
            return Err(ProviderError::Vendor {
                status: status.as_u16(),
                body: err.to_string(),
            });
        }
        Ok(ProviderReply::Complete(body))
    }
}

/// One meaningful line of a server-sent-event stream.
#[derive(Debug, PartialEq)]
pub enum SseLine<'a> {
    /// A `data:` payload.
    Data(&'a str),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Classifies one SSE line. Comments, blank lines and other fields are ignored.
pub fn parse_sse_line(line: &str) -> Option<SseLine<'_>> {
    let line = line.trim_end_matches('\r');
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        Some(SseLine::Done)
    } else if data.is_empty() {
        None
    } else {
        Some(SseLine::Data(data))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    pending: VecDeque<Result<serde_json::Value, ProviderError>>,
    finished: bool,
}

impl SseState {
    /// Moves every complete line of the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&String::from_utf8_lossy(&line[..pos]));
            if self.finished {
                return;
            }
        }
    }

    fn push_line(&mut self, line: &str) {
        match parse_sse_line(line) {
            None => {}
            Some(SseLine::Done) => self.finished = true,
            Some(SseLine::Data(data)) => {
                let item = match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(v) => match v.get("error") {
                        Some(err) => {
                            self.finished = true;
                            Err(ProviderError::Vendor {
                                status: 200,
                                body: err.to_string(),
                            })
                        }
                        None => Ok(v),
                    },
                    Err(e) => {
                        self.finished = true;
                        Err(ProviderError::Malformed(format!("bad stream fragment: {e}")))
                    }
                };
                self.pending.push_back(item);
            }
        }
    }
}

/// Turns a raw SSE byte stream into parsed JSON fragments.
///
/// Ends on `data: [DONE]` or end of body. A transport error, an unparseable
/// fragment or an in-band `error` object yields one `Err` and ends the stream.
pub fn sse_fragments<S>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<Vec<u8>, String>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(ProviderError::Transport(format!("stream read error: {e}"))));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&String::from_utf8_lossy(&rest));
                }
            }
        }
    }))
}
