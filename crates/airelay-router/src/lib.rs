use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{Path, State};
use axum::http::Request;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use http::{HeaderMap, HeaderValue};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use uuid::Uuid;

use airelay_core::{RelayEngine, RelayResponse, UpstreamBody};
use airelay_protocol::{repair_dangling_tool_use, RequestContext};
use airelay_provider::Platform;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-airelay-request-id";

const RESPONSE_DROPPED_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "trailer",
];

#[derive(Clone)]
struct RouterState {
    engine: Arc<RelayEngine>,
}

pub fn relay_router(engine: Arc<RelayEngine>) -> Router {
    Router::new()
        .route("/claude/v1/messages", post(claude_messages))
        .route("/claude/v1/models", get(claude_models))
        .route("/codex/v1/chat/completions", post(codex_chat_completions))
        .route("/codex/v1/models", get(codex_models))
        .route("/gemini/v1beta/models/{*model_op}", post(gemini_generate))
        .route("/custom/{kind}/v1/messages", post(custom_messages))
        .with_state(RouterState { engine })
}

async fn claude_messages(State(state): State<RouterState>, req: Request<Body>) -> Response {
    chat_entry(state, Platform::Claude, "/v1/messages", req).await
}

async fn custom_messages(
    State(state): State<RouterState>,
    Path(kind): Path<String>,
    req: Request<Body>,
) -> Response {
    chat_entry(state, Platform::custom(kind), "/v1/messages", req).await
}

async fn codex_chat_completions(State(state): State<RouterState>, req: Request<Body>) -> Response {
    chat_entry(state, Platform::Codex, "/v1/chat/completions", req).await
}

async fn claude_models(State(state): State<RouterState>) -> Response {
    models_entry(state, Platform::Claude).await
}

async fn codex_models(State(state): State<RouterState>) -> Response {
    models_entry(state, Platform::Codex).await
}

/// The three dialect entry points are thin: extract once, repair (claude
/// dialect only), hand off to the engine, convert back.
async fn chat_entry(
    state: RouterState,
    platform: Platform,
    path: &str,
    req: Request<Body>,
) -> Response {
    let trace_id = Uuid::now_v7().to_string();
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let query = parts.uri.query().map(str::to_string);

    let body = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => return invalid_body_response(&trace_id, &err.to_string()),
    };
    let mut ctx = RequestContext::extract(body, query.as_deref(), &parts.headers);

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        platform = %platform,
        path = %path,
        model = %ctx.requested_model,
        is_stream = ctx.is_stream,
    );

    // Only the claude dialect carries tool_use/tool_result pairs to mend.
    if !matches!(platform, Platform::Codex | Platform::Gemini) {
        ctx.body = repair_dangling_tool_use(ctx.body).body;
    }

    let relay = state.engine.relay_chat(platform.clone(), path, ctx).await;
    respond(relay, &trace_id, &platform, started)
}

async fn models_entry(state: RouterState, platform: Platform) -> Response {
    let trace_id = Uuid::now_v7().to_string();
    let started = Instant::now();
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        platform = %platform,
        path = "/v1/models",
    );
    let relay = state.engine.relay_models(platform.clone()).await;
    respond(relay, &trace_id, &platform, started)
}

async fn gemini_generate(
    State(state): State<RouterState>,
    Path(model_op): Path<String>,
    req: Request<Body>,
) -> Response {
    let trace_id = Uuid::now_v7().to_string();
    let started = Instant::now();

    let Some((model, operation)) = model_op.split_once(':') else {
        return json_response(
            &trace_id,
            404,
            json!({"error": format!("unknown gemini path: {model_op}")}),
        );
    };
    let is_stream = match operation {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return json_response(
                &trace_id,
                404,
                json!({"error": format!("unknown gemini operation: {operation}")}),
            );
        }
    };
    if model.is_empty() {
        return json_response(&trace_id, 404, json!({"error": "missing model"}));
    }

    let (parts, body) = req.into_parts();
    let query = parts.uri.query().map(str::to_string);
    let body = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => return invalid_body_response(&trace_id, &err.to_string()),
    };
    let ctx = RequestContext::extract(body, query.as_deref(), &parts.headers);

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        platform = "gemini",
        model = %model,
        is_stream = is_stream,
    );

    let relay = state.engine.relay_gemini(model, is_stream, ctx).await;
    respond(relay, &trace_id, &Platform::Gemini, started)
}

fn respond(relay: RelayResponse, trace_id: &str, platform: &Platform, started: Instant) -> Response {
    info!(
        event = "downstream_responded",
        trace_id = %trace_id,
        platform = %platform,
        status = relay.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        is_stream = matches!(relay.body, UpstreamBody::Stream(_)),
    );

    let mut builder = Response::builder().status(relay.status);
    if let Some(headers) = builder.headers_mut() {
        copy_headers(headers, &relay.headers);
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }

    let body = match relay.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        }
    };

    match builder.body(body) {
        Ok(response) => response,
        Err(_) => fallback_error(trace_id),
    }
}

fn copy_headers(dst: &mut HeaderMap, src: &[(String, String)]) {
    for (name, value) in src {
        if RESPONSE_DROPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            dst.append(name, value);
        }
    }
}

fn invalid_body_response(trace_id: &str, detail: &str) -> Response {
    json_response(
        trace_id,
        400,
        json!({"error": format!("invalid request body: {detail}")}),
    )
}

fn json_response(trace_id: &str, status: u16, body: serde_json::Value) -> Response {
    let relay = RelayResponse::json(status, body);
    let mut builder = Response::builder().status(relay.status);
    if let Some(headers) = builder.headers_mut() {
        copy_headers(headers, &relay.headers);
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
    }
    let body = match relay.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(_) => Body::empty(),
    };
    match builder.body(body) {
        Ok(response) => response,
        Err(_) => fallback_error(trace_id),
    }
}

fn fallback_error(trace_id: &str) -> Response {
    let mut response = Response::new(Body::from("response build failed"));
    *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
