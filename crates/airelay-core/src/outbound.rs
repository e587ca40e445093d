use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

use airelay_protocol::{Dialect, RequestContext};
use airelay_provider::{ChatProvider, GeminiProvider, Platform};

use crate::client::{HttpMethod, OutboundRequest};

/// Default per-attempt timeout for claude/codex chat completions. The 32 hour
/// figure is intentional: it guards long-lived streaming tool-calling
/// sessions against premature cancellation.
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(32 * 60 * 60);
pub const DEFAULT_GEMINI_TIMEOUT: Duration = Duration::from_secs(300);
pub const MODELS_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// Inbound credentials are stripped alongside hop-by-hop headers: the
// provider's own credential is authoritative and the client's must not leak
// upstream.
const DROPPED_HEADERS: [&str; 6] = [
    "host",
    "content-length",
    "accept-encoding",
    "authorization",
    "x-api-key",
    "x-goog-api-key",
];

pub fn dialect_for(platform: &Platform) -> Dialect {
    match platform {
        Platform::Claude | Platform::Custom(_) => Dialect::Claude,
        Platform::Codex => Dialect::Codex,
        Platform::Gemini => Dialect::Gemini,
    }
}

pub fn build_chat_request(
    provider: &ChatProvider,
    dialect: Dialect,
    path: &str,
    ctx: &RequestContext,
) -> OutboundRequest {
    let mut url = join_url(&provider.api_url, path);
    append_query(&mut url, &ctx.query, &[]);

    let mut headers = passthrough_headers(&ctx.client_headers);
    match dialect {
        Dialect::Claude => {
            set_header(&mut headers, "x-api-key", &provider.api_key);
            if !has_header(&headers, "anthropic-version") {
                set_header(&mut headers, "anthropic-version", DEFAULT_ANTHROPIC_VERSION);
            }
        }
        Dialect::Codex => {
            set_header(
                &mut headers,
                "authorization",
                &format!("Bearer {}", provider.api_key),
            );
        }
        Dialect::Gemini => {}
    }
    if !has_header(&headers, "content-type") {
        set_header(&mut headers, "content-type", "application/json");
    }

    let body = if ctx.is_stream {
        ctx.body.clone()
    } else {
        force_stream_false(ctx.body.clone())
    };

    OutboundRequest {
        method: HttpMethod::Post,
        url,
        headers,
        body: Some(body),
        is_stream: ctx.is_stream,
        timeout: provider
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CHAT_TIMEOUT),
    }
}

pub fn build_gemini_request(
    provider: &GeminiProvider,
    model: &str,
    is_stream: bool,
    ctx: &RequestContext,
) -> OutboundRequest {
    let operation = if is_stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut url = join_url(&provider.base_url, &format!("/v1beta/models/{model}:{operation}"));
    // The client's `key` never travels upstream; provider auth replaces it.
    append_query(&mut url, &ctx.query, &["key"]);

    let mut headers = passthrough_headers(&ctx.client_headers);
    if let Some(api_key) = provider.api_key.as_deref().filter(|k| !k.is_empty()) {
        set_header(&mut headers, "x-goog-api-key", api_key);
    } else if let Some(token) = provider.bearer_token.as_deref().filter(|t| !t.is_empty()) {
        set_header(&mut headers, "authorization", &format!("Bearer {token}"));
    }
    if !has_header(&headers, "content-type") {
        set_header(&mut headers, "content-type", "application/json");
    }

    OutboundRequest {
        method: HttpMethod::Post,
        url,
        headers,
        body: Some(ctx.body.clone()),
        is_stream,
        timeout: provider
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GEMINI_TIMEOUT),
    }
}

pub fn build_models_request(provider: &ChatProvider, dialect: Dialect) -> OutboundRequest {
    let url = join_url(&provider.api_url, "/v1/models");
    let mut headers = vec![("accept".to_string(), "application/json".to_string())];
    match dialect {
        Dialect::Claude => {
            set_header(&mut headers, "x-api-key", &provider.api_key);
            set_header(&mut headers, "anthropic-version", DEFAULT_ANTHROPIC_VERSION);
        }
        Dialect::Codex | Dialect::Gemini => {
            set_header(
                &mut headers,
                "authorization",
                &format!("Bearer {}", provider.api_key),
            );
        }
    }

    OutboundRequest {
        method: HttpMethod::Get,
        url,
        headers,
        body: None,
        is_stream: false,
        timeout: MODELS_TIMEOUT,
    }
}

/// Joins a provider base with the inbound path, deduplicating a `/v1` that
/// appears on both sides (relay operators commonly configure either form).
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") && (path == "v1" || path.starts_with("v1/")) {
        path = path.trim_start_matches("v1/").trim_start_matches("v1");
    }
    format!("{base}/{path}")
}

fn append_query(url: &mut String, query: &[(String, String)], drop_keys: &[&str]) {
    let mut first = true;
    for (key, value) in query {
        if drop_keys.contains(&key.as_str()) {
            continue;
        }
        url.push(if first { '?' } else { '&' });
        first = false;
        url.push_str(key);
        if !value.is_empty() {
            url.push('=');
            url.push_str(value);
        }
    }
}

fn passthrough_headers(client_headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(client_headers.len());
    for (name, value) in client_headers {
        let name = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name) || DROPPED_HEADERS.contains(&name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.push((name.to_string(), value.to_string()));
        }
    }
    out.push(("accept-encoding".to_string(), "identity".to_string()));
    out
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    {
        Some((_, existing)) => *existing = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers
        .iter()
        .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
}

/// A non-stream inbound request must not ask the upstream to stream, even if
/// the client left `"stream": true` in the body.
fn force_stream_false(body: Bytes) -> Bytes {
    let Ok(mut root) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    match root.get_mut("stream") {
        Some(slot) if slot.as_bool() == Some(true) => {
            *slot = Value::Bool(false);
        }
        _ => return body,
    }
    match serde_json::to_vec(&root) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => body,
    }
}
