use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER_LEVEL: u32 = 1;

/// Capability set shared by the two concrete provider shapes. Filtering,
/// grouping and round-robin are generic over this trait.
pub trait ProviderEndpoint {
    fn name(&self) -> &str;
    /// Priority level, normalized to >= 1. Lower is tried earlier.
    fn level(&self) -> u32;
    fn enabled(&self) -> bool;
    fn has_valid_config(&self) -> bool;
}

fn normalize_level(level: i32) -> u32 {
    if level <= 0 {
        DEFAULT_PROVIDER_LEVEL
    } else {
        level as u32
    }
}

fn default_enabled() -> bool {
    true
}

/// Upstream endpoint for the claude/codex dialects and custom pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatProvider {
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    #[serde(default)]
    pub level: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Model allowlist; empty means every model is admitted.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ChatProvider {
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }
}

impl ProviderEndpoint for ChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> u32 {
        normalize_level(self.level)
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn has_valid_config(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty()
    }
}

/// Upstream endpoint for the gemini dialect. A key is optional: some relays
/// authenticate with a bearer token instead of `x-goog-api-key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiProvider {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub level: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ProviderEndpoint for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> u32 {
        normalize_level(self.level)
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn has_valid_config(&self) -> bool {
        !self.base_url.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(name: &str) -> ChatProvider {
        ChatProvider {
            name: name.to_string(),
            api_url: "https://relay.example".to_string(),
            api_key: "sk-test".to_string(),
            level: 0,
            enabled: true,
            models: Vec::new(),
            timeout_seconds: None,
        }
    }

    #[test]
    fn level_normalizes_to_one() {
        let mut p = chat("a");
        assert_eq!(p.level(), 1);
        p.level = -3;
        assert_eq!(p.level(), 1);
        p.level = 2;
        assert_eq!(p.level(), 2);
    }

    #[test]
    fn empty_allowlist_admits_all() {
        let mut p = chat("a");
        assert!(p.supports_model("claude-sonnet-4-5"));
        p.models = vec!["claude-sonnet-4-5".to_string()];
        assert!(p.supports_model("claude-sonnet-4-5"));
        assert!(!p.supports_model("claude-opus-4-1"));
    }

    #[test]
    fn valid_config_requires_url_and_key() {
        let mut p = chat("a");
        assert!(p.has_valid_config());
        p.api_key.clear();
        assert!(!p.has_valid_config());

        let g = GeminiProvider {
            name: "g".to_string(),
            base_url: "https://gemini.example".to_string(),
            api_key: None,
            bearer_token: None,
            level: 0,
            enabled: true,
            timeout_seconds: None,
        };
        assert!(g.has_valid_config());
    }
}
