use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use airelay_common::{RelayConfig, RelayMode};
use airelay_core::{
    OutboundRequest, RelayEngine, TransportErrorKind, UpstreamBody, UpstreamClient,
    UpstreamFailure, UpstreamResponse,
};
use airelay_protocol::RequestContext;
use airelay_provider::{ChatProvider, Platform, ProviderRegistry, RegistrySnapshot};
use airelay_storage::RequestLogInsert;

enum Scripted {
    Json(u16, &'static str),
    Transport,
    Sse(Vec<&'static str>),
}

struct ScriptedClient {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        _req: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            match step {
                Scripted::Json(status, body) => Ok(UpstreamResponse {
                    status,
                    headers: vec![(
                        "content-type".to_string(),
                        "application/json".to_string(),
                    )],
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Scripted::Transport => Err(UpstreamFailure::Transport {
                    kind: TransportErrorKind::Connect,
                    message: "connection refused".to_string(),
                }),
                Scripted::Sse(chunks) => {
                    let (tx, rx) = mpsc::channel::<Bytes>(8);
                    tokio::spawn(async move {
                        for chunk in chunks {
                            if tx.send(Bytes::from_static(chunk.as_bytes())).await.is_err() {
                                break;
                            }
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            "text/event-stream".to_string(),
                        )],
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        })
    }
}

fn provider(name: &str) -> ChatProvider {
    ChatProvider {
        name: name.to_string(),
        api_url: "https://relay.example".to_string(),
        api_key: "sk-test".to_string(),
        level: 1,
        enabled: true,
        models: Vec::new(),
        timeout_seconds: None,
    }
}

fn config(mode: RelayMode, failure_threshold: u32) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 18100,
        dsn: "sqlite::memory:".to_string(),
        proxy: None,
        failure_threshold,
        retry_wait_seconds: 0,
        blacklist_seconds: 60,
        mode,
    }
}

struct Harness {
    engine: RelayEngine,
    client: Arc<ScriptedClient>,
    log_rx: mpsc::Receiver<RequestLogInsert>,
}

fn harness(mode: RelayMode, threshold: u32, names: &[&str], script: Vec<Scripted>) -> Harness {
    let registry = Arc::new(ProviderRegistry::new(RegistrySnapshot {
        claude: names.iter().map(|n| provider(n)).collect(),
        ..Default::default()
    }));
    let client = ScriptedClient::new(script);
    let (log_tx, log_rx) = mpsc::channel(64);
    let engine = RelayEngine::new(config(mode, threshold), registry, client.clone(), log_tx);
    Harness {
        engine,
        client,
        log_rx,
    }
}

fn chat_context() -> RequestContext {
    let body = json!({"model": "claude-sonnet-4-5", "stream": false, "messages": []});
    RequestContext::extract(
        Bytes::from(serde_json::to_vec(&body).unwrap()),
        None,
        &HeaderMap::new(),
    )
}

fn body_json(body: &UpstreamBody) -> Value {
    match body {
        UpstreamBody::Bytes(bytes) => serde_json::from_slice(bytes).unwrap(),
        UpstreamBody::Stream(_) => panic!("expected buffered body"),
    }
}

fn drain_logs(rx: &mut mpsc::Receiver<RequestLogInsert>) -> Vec<RequestLogInsert> {
    let mut rows = Vec::new();
    while let Ok(row) = rx.try_recv() {
        rows.push(row);
    }
    rows
}

#[tokio::test]
async fn fallback_mode_exhausts_each_provider_once() {
    let mut h = harness(
        RelayMode::Fallback,
        3,
        &["A", "B", "C"],
        vec![
            Scripted::Json(500, "{}"),
            Scripted::Json(500, "{}"),
            Scripted::Json(500, "{}"),
        ],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;

    assert_eq!(response.status, 502);
    let body = body_json(&response.body);
    assert_eq!(body["totalAttempts"], 3);
    assert_eq!(body["lastProvider"], "C");
    assert!(body.get("mode").is_none());
    assert_eq!(h.client.calls(), 3);

    let rows = drain_logs(&mut h.log_rx);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.http_code == 500));
}

#[tokio::test]
async fn blacklist_mode_retries_until_threshold_then_switches() {
    let mut h = harness(
        RelayMode::Blacklist,
        3,
        &["A", "B"],
        vec![
            Scripted::Json(500, "{}"),
            Scripted::Json(500, "{}"),
            Scripted::Json(500, "{}"),
            Scripted::Json(200, r#"{"usage": {"input_tokens": 5, "output_tokens": 2}}"#),
        ],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(h.client.calls(), 4);

    let rows = drain_logs(&mut h.log_rx);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3].http_code, 200);
    assert_eq!(rows[3].input_tokens, 5);
    assert_eq!(rows[3].output_tokens, 2);
    assert_eq!(rows[3].provider, "B");
}

#[tokio::test]
async fn blacklisted_provider_is_skipped_on_the_next_request() {
    let mut h = harness(
        RelayMode::Blacklist,
        2,
        &["A", "B"],
        vec![
            // Request 1: A trips its threshold, B succeeds.
            Scripted::Json(500, "{}"),
            Scripted::Json(500, "{}"),
            Scripted::Json(200, "{}"),
            // Request 2: only B is eligible.
            Scripted::Json(200, "{}"),
        ],
    );

    let first = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(first.status, 200);
    assert_eq!(h.client.calls(), 3);

    let second = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(second.status, 200);
    assert_eq!(h.client.calls(), 4);

    let rows = drain_logs(&mut h.log_rx);
    assert_eq!(rows.last().unwrap().provider, "B");
}

#[tokio::test]
async fn non_retryable_status_advances_immediately_even_in_blacklist_mode() {
    let mut h = harness(
        RelayMode::Blacklist,
        5,
        &["A", "B"],
        vec![Scripted::Json(401, "{}"), Scripted::Json(200, "{}")],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(h.client.calls(), 2);
    assert_eq!(drain_logs(&mut h.log_rx).len(), 2);
}

#[tokio::test]
async fn transport_errors_are_retryable() {
    let mut h = harness(
        RelayMode::Fallback,
        1,
        &["A", "B"],
        vec![Scripted::Transport, Scripted::Json(200, "{}")],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(response.status, 200);

    let rows = drain_logs(&mut h.log_rx);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].http_code, 0);
}

#[tokio::test]
async fn empty_candidate_list_returns_503_without_log_rows() {
    let mut h = harness(RelayMode::Fallback, 3, &[], vec![]);

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(response.status, 503);
    let body = body_json(&response.body);
    assert_eq!(body["totalAttempts"], 0);
    assert_eq!(h.client.calls(), 0);
    assert!(drain_logs(&mut h.log_rx).is_empty());
}

#[tokio::test]
async fn upstream_error_body_is_not_forwarded_to_the_client() {
    let mut h = harness(
        RelayMode::Fallback,
        1,
        &["A"],
        vec![Scripted::Json(500, r#"{"secret": "upstream detail"}"#)],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    assert_eq!(response.status, 502);
    let body = body_json(&response.body);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("所有 Provider 都失败"));
    assert!(error.contains("upstream detail"));
    assert!(body.get("secret").is_none());
    drain_logs(&mut h.log_rx);
}

#[tokio::test]
async fn blacklist_mode_failure_body_carries_mode_and_hint() {
    let mut h = harness(
        RelayMode::Blacklist,
        1,
        &["A"],
        vec![Scripted::Json(500, "{}")],
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", chat_context())
        .await;
    let body = body_json(&response.body);
    assert_eq!(body["mode"], "blacklist_retry");
    assert!(body["hint"].as_str().is_some());
    drain_logs(&mut h.log_rx);
}

#[tokio::test]
async fn streaming_response_tees_usage_into_the_log_row() {
    let mut h = harness(
        RelayMode::Fallback,
        1,
        &["A"],
        vec![Scripted::Sse(vec![
            "event: message_start\ndata: {\"message\":{\"usage\":{\"input_tokens\":42,\"output_tokens\":1}}}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: message_delta\ndata: {\"usage\":{\"output_tokens\":17}}\n\n",
        ])],
    );

    let body = json!({"model": "claude-sonnet-4-5", "stream": true, "messages": []});
    let ctx = RequestContext::extract(
        Bytes::from(serde_json::to_vec(&body).unwrap()),
        None,
        &HeaderMap::new(),
    );

    let response = h
        .engine
        .relay_chat(Platform::Claude, "/v1/messages", ctx)
        .await;
    assert_eq!(response.status, 200);

    let UpstreamBody::Stream(mut rx) = response.body else {
        panic!("expected streaming body");
    };
    let mut forwarded = Vec::new();
    while let Some(chunk) = rx.recv().await {
        forwarded.extend_from_slice(&chunk);
    }
    let text = String::from_utf8(forwarded).unwrap();
    assert!(text.contains("message_start"));
    assert!(text.contains("text_delta"));

    // The log row arrives once the stream has fully drained.
    let row = tokio::time::timeout(Duration::from_secs(1), h.log_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_stream);
    assert_eq!(row.input_tokens, 42);
    assert_eq!(row.output_tokens, 17);
    assert_eq!(row.http_code, 200);
}

#[tokio::test]
async fn gemini_uses_the_reduced_filter_and_its_own_pool() {
    let registry = Arc::new(ProviderRegistry::new(RegistrySnapshot {
        gemini: vec![airelay_provider::GeminiProvider {
            name: "G".to_string(),
            base_url: "https://gemini.example".to_string(),
            api_key: Some("k".to_string()),
            bearer_token: None,
            level: 1,
            enabled: true,
            timeout_seconds: None,
        }],
        ..Default::default()
    }));
    let client = ScriptedClient::new(vec![Scripted::Json(
        200,
        r#"{"usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 3}}"#,
    )]);
    let (log_tx, mut log_rx) = mpsc::channel(8);
    let engine = RelayEngine::new(
        config(RelayMode::Fallback, 3),
        registry,
        client.clone(),
        log_tx,
    );

    let ctx = RequestContext::extract(Bytes::from_static(b"{}"), None, &HeaderMap::new());
    let response = engine.relay_gemini("gemini-2.5-pro", false, ctx).await;
    assert_eq!(response.status, 200);

    let row = log_rx.try_recv().unwrap();
    assert_eq!(row.platform, "gemini");
    assert_eq!(row.model, "gemini-2.5-pro");
    assert_eq!(row.input_tokens, 9);
    assert_eq!(row.output_tokens, 3);
}
