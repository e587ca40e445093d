use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;

const INTERRUPTED_TOOL_RESULT: &str = "工具调用被中断（中转站切换），请重新执行此操作";

#[derive(Debug)]
pub struct RepairOutcome {
    pub body: Bytes,
    pub repaired: bool,
}

impl RepairOutcome {
    fn unchanged(body: Bytes) -> Self {
        Self {
            body,
            repaired: false,
        }
    }
}

/// Repairs a claude-dialect message history whose last assistant turn issued
/// `tool_use` blocks that never received a `tool_result`.
///
/// Cross-provider failover can strand such a turn at a provider that never
/// produced it; the Anthropic API rejects the conversation outright. The
/// repair appends one synthetic user message carrying an error `tool_result`
/// per dangling id, in order. It never removes or rewrites existing content,
/// which also makes it idempotent: a repaired history has a trailing user
/// message with `tool_result` entries, so a second pass is a no-op.
pub fn repair_dangling_tool_use(body: Bytes) -> RepairOutcome {
    let mut root: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        // Malformed bodies are forwarded untouched; the upstream owns the
        // rejection.
        Err(_) => return RepairOutcome::unchanged(body),
    };

    let Some(messages) = root.get("messages").and_then(Value::as_array) else {
        return RepairOutcome::unchanged(body);
    };
    if messages.is_empty() {
        return RepairOutcome::unchanged(body);
    }

    let Some(assistant_idx) = messages
        .iter()
        .rposition(|msg| msg.get("role").and_then(Value::as_str) == Some("assistant"))
    else {
        return RepairOutcome::unchanged(body);
    };

    let Some(content) = messages[assistant_idx].get("content").and_then(Value::as_array) else {
        return RepairOutcome::unchanged(body);
    };

    let dangling_ids: Vec<String> = content
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|item| item.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if dangling_ids.is_empty() {
        return RepairOutcome::unchanged(body);
    }

    if has_following_tool_result(messages, assistant_idx) {
        return RepairOutcome::unchanged(body);
    }

    warn!(
        event = "tool_use_repair",
        dangling = dangling_ids.len(),
        "appending error tool_result for dangling tool_use",
    );

    let results: Vec<Value> = dangling_ids
        .iter()
        .map(|id| {
            json!({
                "type": "tool_result",
                "tool_use_id": id,
                "content": INTERRUPTED_TOOL_RESULT,
                "is_error": true,
            })
        })
        .collect();
    let synthetic = json!({"role": "user", "content": results});

    // The messages array was proven present above.
    if let Some(messages) = root.get_mut("messages").and_then(Value::as_array_mut) {
        messages.push(synthetic);
    }

    match serde_json::to_vec(&root) {
        Ok(bytes) => RepairOutcome {
            body: Bytes::from(bytes),
            repaired: true,
        },
        Err(err) => {
            warn!(event = "tool_use_repair_failed", error = %err);
            RepairOutcome::unchanged(body)
        }
    }
}

fn has_following_tool_result(messages: &[Value], assistant_idx: usize) -> bool {
    let Some(next) = messages.get(assistant_idx + 1) else {
        return false;
    };
    if next.get("role").and_then(Value::as_str) != Some("user") {
        return false;
    }
    let Some(content) = next.get("content").and_then(Value::as_array) else {
        return false;
    };
    content
        .iter()
        .any(|item| item.get("type").and_then(Value::as_str) == Some("tool_result"))
}
