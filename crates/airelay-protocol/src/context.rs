use bytes::Bytes;
use http::HeaderMap;
use serde_json::Value;

/// Everything the relay needs from an inbound request, extracted once.
///
/// The body is parsed a single time for the `stream` flag and the requested
/// model; the raw bytes are kept for forwarding (and may be replaced by the
/// tool-use repair before dispatch). Hop-by-hop headers are intentionally
/// not stripped here; the forwarder owns that decision.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub body: Bytes,
    pub is_stream: bool,
    pub requested_model: String,
    /// Flattened query pairs: multi-valued keys are comma-joined into a
    /// single value, preserving first-seen order.
    pub query: Vec<(String, String)>,
    pub client_headers: HeaderMap,
}

impl RequestContext {
    pub fn extract(body: Bytes, raw_query: Option<&str>, headers: &HeaderMap) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(&body).ok();
        let is_stream = parsed
            .as_ref()
            .and_then(|v| v.get("stream"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let requested_model = parsed
            .as_ref()
            .and_then(|v| v.get("model"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            body,
            is_stream,
            requested_model,
            query: flatten_query(raw_query),
            client_headers: headers.clone(),
        }
    }
}

fn flatten_query(raw_query: Option<&str>) -> Vec<(String, String)> {
    let mut flattened: Vec<(String, String)> = Vec::new();
    let Some(raw) = raw_query.filter(|q| !q.is_empty()) else {
        return flattened;
    };

    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match flattened.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => flattened.push((key.to_string(), value.to_string())),
        }
    }
    flattened
}
