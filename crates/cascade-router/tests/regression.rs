//! Regression tests for cascade-router: routing table, HTTP backend, end-to-end cascades.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cascade_core::{CascadeError, ChatRequest, FailureKind, Message, ProviderError};
use cascade_router::{
    DispatchReply, Dispatcher, OpenAiCompatBackend, ProviderBackend, ProviderReply,
    ProviderRequest, RelayChunk, RoutingTable, StaticSecrets, TableHandle,
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// --- Routing table from a config document ---

const TOML_TABLE: &str = r#"
default_role = "primary"
fallback_order = ["glm", "ernie"]
max_context_tokens = 6000

[[profiles]]
role_id = "primary"
provider = "google"
model = "gemini-1.5-pro"
supports_media = true
timeout_secs = 30

[[profiles]]
role_id = "glm"
provider = "zhipu"
model = "glm-4"
context_tokens = 2000

[[profiles]]
role_id = "ernie"
provider = "ernie"
model = "ernie-4.0-8k"
api_key_variable = "QIANFAN_KEY"
"#;

#[test]
fn test_routing_table_from_toml() {
    let table: RoutingTable = toml::from_str(TOML_TABLE).unwrap();
    assert_eq!(table.default_role(), "primary");
    assert_eq!(table.fallback_order(), ["glm", "ernie"]);
    assert_eq!(table.profiles().len(), 3);
    assert_eq!(table.get("primary").unwrap().timeout_secs, 30);
    assert_eq!(table.context_tokens_for(table.get("glm").unwrap()), 2000);
    assert_eq!(table.context_tokens_for(table.get("ernie").unwrap()), 6000);
}

#[test]
fn test_routing_table_toml_missing_default_fails() {
    let broken = TOML_TABLE.replace("default_role = \"primary\"", "default_role = \"nope\"");
    let err = toml::from_str::<RoutingTable>(&broken).unwrap_err();
    assert!(err.to_string().contains("nope"), "unexpected error: {err}");
}

// --- Concrete scenario: A fails, B times out, C answers ---

struct RecordingBackend {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ProviderBackend for RecordingBackend {
    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.calls.lock().unwrap().push(request.model.clone());
        match request.model.as_str() {
            "model-a" => Err(ProviderError::Vendor {
                status: 500,
                body: "internal".into(),
            }),
            "model-b" => std::future::pending().await,
            _ => Ok(ProviderReply::Complete(json!({"text": "ok"}))),
        }
    }
}

fn scenario_table() -> RoutingTable {
    serde_json::from_value(json!({
        "default_role": "A",
        "fallback_order": ["B", "C"],
        "profiles": [
            {"role_id": "A", "provider": "openai", "model": "model-a", "timeout_secs": 2},
            {"role_id": "B", "provider": "openai", "model": "model-b", "timeout_secs": 2},
            {"role_id": "C", "provider": "openai", "model": "model-c", "timeout_secs": 2}
        ]
    }))
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_concrete_scenario_a_fails_b_times_out_c_answers() {
    let backend = Arc::new(RecordingBackend {
        calls: Mutex::new(Vec::new()),
    });
    let dispatcher = Dispatcher::new(
        TableHandle::new(scenario_table()),
        backend.clone(),
        Arc::new(StaticSecrets::new().with("OPENAI_API_KEY", "sk")),
    );

    let out = dispatcher
        .dispatch(ChatRequest::new(None, vec![Message::user("ping")]))
        .await
        .unwrap();

    assert_eq!(*backend.calls.lock().unwrap(), ["model-a", "model-b", "model-c"]);
    match out.reply {
        DispatchReply::Complete(body) => assert_eq!(body, json!({"text": "ok"})),
        other => panic!("expected complete reply, got {other:?}"),
    }
    assert_eq!(out.winner.role_id, "C");
    assert_eq!(out.failures.len(), 2);
    assert_eq!(out.failures[0].role_id, "A");
    assert_eq!(out.failures[0].kind, FailureKind::Vendor);
    assert_eq!(out.failures[1].role_id, "B");
    assert_eq!(out.failures[1].kind, FailureKind::Timeout);
}

#[tokio::test]
async fn test_unknown_role_uses_default_chain() {
    let backend = Arc::new(RecordingBackend {
        calls: Mutex::new(Vec::new()),
    });
    let dispatcher = Dispatcher::new(
        TableHandle::new(scenario_table()),
        backend,
        Arc::new(StaticSecrets::new()),
    );
    let plan = dispatcher
        .plan(&ChatRequest::new(Some("does-not-exist"), vec![Message::user("x")]))
        .unwrap();
    let roles: Vec<_> = plan.iter().map(|c| c.role_id.as_str()).collect();
    assert_eq!(roles, ["A", "B", "C"]);
}

// --- OpenAI-compatible HTTP backend against a mock vendor ---

fn http_table(base: &str) -> RoutingTable {
    serde_json::from_value(json!({
        "default_role": "primary",
        "fallback_order": ["backup"],
        "profiles": [
            {
                "role_id": "primary",
                "provider": "google",
                "model": "gemini-1.5-pro",
                "api_base": format!("{base}/primary"),
                "timeout_secs": 5
            },
            {
                "role_id": "backup",
                "provider": "zhipu",
                "model": "glm-4",
                "api_base": format!("{base}/backup"),
                "api_version": "2024-06-01",
                "timeout_secs": 5
            }
        ]
    }))
    .unwrap()
}

fn http_dispatcher(base: &str) -> Dispatcher {
    Dispatcher::new(
        TableHandle::new(http_table(base)),
        Arc::new(OpenAiCompatBackend::new()),
        Arc::new(
            StaticSecrets::new()
                .with("GEMINI_API_KEY", "g-key")
                .with("GLM_API_KEY", "z-key"),
        ),
    )
}

#[tokio::test]
async fn test_http_primary_success_passes_body_through() {
    let server = MockServer::start().await;
    let vendor_body = json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1}
    });
    Mock::given(method("POST"))
        .and(path("/primary/chat/completions"))
        .and(header("authorization", "Bearer g-key"))
        .and(body_partial_json(json!({"model": "gemini-1.5-pro", "max_tokens": 4096})))
        .respond_with(ResponseTemplate::new(200).set_body_json(vendor_body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let out = http_dispatcher(&server.uri())
        .dispatch(ChatRequest::new(Some("primary"), vec![Message::user("hello")]))
        .await
        .unwrap();

    match out.reply {
        DispatchReply::Complete(body) => assert_eq!(body, vendor_body),
        other => panic!("expected complete reply, got {other:?}"),
    }
    assert_eq!(out.winner.vendor_model, "gemini/gemini-1.5-pro");
}

#[tokio::test]
async fn test_http_vendor_error_falls_back_with_clamped_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/primary/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/backup/chat/completions"))
        .and(query_param("api-version", "2024-06-01"))
        .and(header("authorization", "Bearer z-key"))
        .and(body_partial_json(json!({"model": "glm-4", "temperature": 1.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "glm"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = ChatRequest::new(Some("primary"), vec![Message::user("hello")]);
    request.temperature = Some(1.5);
    let out = http_dispatcher(&server.uri()).dispatch(request).await.unwrap();

    assert_eq!(out.winner.role_id, "backup");
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].kind, FailureKind::Vendor);
    assert!(out.failures[0].reason.contains("503"));
    assert!(out.failures[0].reason.contains("overloaded"));
}

#[tokio::test]
async fn test_http_exhaustion_lists_both_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let err = http_dispatcher(&server.uri())
        .dispatch(ChatRequest::new(None, vec![Message::user("hello")]))
        .await
        .unwrap_err();
    let failures = match err {
        CascadeError::Exhausted(failures) => failures,
        other => panic!("expected exhaustion, got {other}"),
    };
    let models: Vec<_> = failures.iter().map(|f| f.model.as_str()).collect();
    assert_eq!(models, ["gemini/gemini-1.5-pro", "zhipu/glm-4"]);
}

#[tokio::test]
async fn test_http_missing_credential_is_attempt_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/backup/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(
        TableHandle::new(http_table(&server.uri())),
        Arc::new(OpenAiCompatBackend::new()),
        Arc::new(StaticSecrets::new().with("GLM_API_KEY", "z-key")),
    );
    let out = dispatcher
        .dispatch(ChatRequest::new(None, vec![Message::user("hello")]))
        .await
        .unwrap();
    assert_eq!(out.failures[0].kind, FailureKind::Credential);
    assert!(out.failures[0].reason.contains("GEMINI_API_KEY"));
    assert_eq!(out.winner.role_id, "backup");
}

#[tokio::test]
async fn test_http_stream_is_relayed_in_order() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/primary/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let mut request = ChatRequest::new(Some("primary"), vec![Message::user("hello")]);
    request.stream = true;
    let out = http_dispatcher(&server.uri()).dispatch(request).await.unwrap();

    let DispatchReply::Stream(stream) = out.reply else {
        panic!("expected stream reply");
    };
    let chunks: Vec<RelayChunk> = stream.collect().await;
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks[0],
        RelayChunk::Fragment {
            payload: json!({"choices":[{"delta":{"content":"Hel"}}]})
        }
    );
    assert_eq!(
        chunks[1],
        RelayChunk::Fragment {
            payload: json!({"choices":[{"delta":{"content":"lo"}}]})
        }
    );
    assert_eq!(chunks[2], RelayChunk::Done);
}

#[tokio::test]
async fn test_http_slow_vendor_times_out_and_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/primary/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"late": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/backup/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "backup"})))
        .mount(&server)
        .await;

    let table: RoutingTable = {
        let mut doc = json!({
            "default_role": "primary",
            "fallback_order": ["backup"],
            "profiles": [
                {"role_id": "primary", "provider": "google", "model": "gemini-1.5-pro",
                 "api_base": format!("{}/primary", server.uri()), "timeout_secs": 1},
                {"role_id": "backup", "provider": "zhipu", "model": "glm-4",
                 "api_base": format!("{}/backup", server.uri()), "timeout_secs": 5}
            ]
        });
        doc["max_context_tokens"] = json!(4096);
        serde_json::from_value(doc).unwrap()
    };
    let dispatcher = Dispatcher::new(
        TableHandle::new(table),
        Arc::new(OpenAiCompatBackend::new()),
        Arc::new(
            StaticSecrets::new()
                .with("GEMINI_API_KEY", "g")
                .with("GLM_API_KEY", "z"),
        ),
    );

    let out = dispatcher
        .dispatch(ChatRequest::new(None, vec![Message::user("hello")]))
        .await
        .unwrap();
    assert_eq!(out.failures[0].kind, FailureKind::Timeout);
    match out.reply {
        DispatchReply::Complete(body) => assert_eq!(body, json!({"from": "backup"})),
        other => panic!("expected complete reply, got {other:?}"),
    }
}
