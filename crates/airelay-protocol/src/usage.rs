use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sse::SseEvent;

/// Wire dialect of a request/response pair. Custom provider pools speak the
/// claude dialect, so this is narrower than the platform kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Claude,
    Codex,
    Gemini,
}

/// Token counters recorded per attempt in the request log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct UsageDelta {
    input: Option<i64>,
    output: Option<i64>,
    cache_create: Option<i64>,
    cache_read: Option<i64>,
    reasoning: Option<i64>,
}

/// Accumulates token usage out of a response as bytes flow by.
///
/// Streaming responses report usage incrementally (claude sends input counts
/// in `message_start` and output counts in `message_delta`; codex attaches a
/// `usage` object to the final chunk; gemini repeats `usageMetadata` per
/// chunk), so later fields replace earlier ones field-by-field.
#[derive(Debug)]
pub struct UsageAccumulator {
    dialect: Dialect,
    total: TokenUsage,
    seen: bool,
}

impl UsageAccumulator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            total: TokenUsage::default(),
            seen: false,
        }
    }

    pub fn observe_event(&mut self, event: &SseEvent) {
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            // Non-JSON data frames ([DONE], keep-alives) carry no usage.
            return;
        };
        self.observe_json(&value);
    }

    pub fn observe_json(&mut self, value: &Value) {
        let delta = match self.dialect {
            Dialect::Claude => claude_usage(value),
            Dialect::Codex => codex_usage(value),
            Dialect::Gemini => gemini_usage(value),
        };
        if let Some(delta) = delta {
            self.apply(delta);
        }
    }

    pub fn finalize(self) -> TokenUsage {
        self.total
    }

    pub fn seen_any(&self) -> bool {
        self.seen
    }

    fn apply(&mut self, delta: UsageDelta) {
        if let Some(v) = delta.input {
            self.total.input_tokens = v;
        }
        if let Some(v) = delta.output {
            self.total.output_tokens = v;
        }
        if let Some(v) = delta.cache_create {
            self.total.cache_create_tokens = v;
        }
        if let Some(v) = delta.cache_read {
            self.total.cache_read_tokens = v;
        }
        if let Some(v) = delta.reasoning {
            self.total.reasoning_tokens = v;
        }
        self.seen = true;
    }
}

fn int(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn claude_usage(value: &Value) -> Option<UsageDelta> {
    // Non-stream body and `message_delta` carry `usage` at the top level;
    // `message_start` nests it under `message`.
    let usage = value
        .get("usage")
        .or_else(|| value.get("message").and_then(|m| m.get("usage")))?;

    Some(UsageDelta {
        input: int(usage, "input_tokens"),
        output: int(usage, "output_tokens"),
        cache_create: int(usage, "cache_creation_input_tokens"),
        cache_read: int(usage, "cache_read_input_tokens"),
        reasoning: None,
    })
}

fn codex_usage(value: &Value) -> Option<UsageDelta> {
    let usage = value.get("usage").filter(|u| !u.is_null())?;
    Some(UsageDelta {
        input: int(usage, "prompt_tokens"),
        output: int(usage, "completion_tokens"),
        cache_create: None,
        cache_read: usage
            .get("prompt_tokens_details")
            .and_then(|d| int(d, "cached_tokens")),
        reasoning: usage
            .get("completion_tokens_details")
            .and_then(|d| int(d, "reasoning_tokens")),
    })
}

fn gemini_usage(value: &Value) -> Option<UsageDelta> {
    let usage = value.get("usageMetadata")?;
    Some(UsageDelta {
        input: int(usage, "promptTokenCount"),
        output: int(usage, "candidatesTokenCount"),
        cache_create: None,
        cache_read: int(usage, "cachedContentTokenCount"),
        reasoning: int(usage, "thoughtsTokenCount"),
    })
}
