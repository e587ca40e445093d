use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::endpoint::{ChatProvider, GeminiProvider};
use crate::platform::Platform;

/// Configured providers grouped by platform kind, as loaded from the
/// settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub claude: Vec<ChatProvider>,
    #[serde(default)]
    pub codex: Vec<ChatProvider>,
    #[serde(default)]
    pub gemini: Vec<GeminiProvider>,
    #[serde(default)]
    pub custom: HashMap<String, Vec<ChatProvider>>,
}

/// Read-only provider snapshot shared by all in-flight requests.
///
/// Reads return stable copies so callers may filter and reorder freely;
/// `reload` swaps the whole snapshot atomically.
pub struct ProviderRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl ProviderRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn reload(&self, snapshot: RegistrySnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn chat_providers(&self, platform: &Platform) -> Vec<ChatProvider> {
        let snapshot = self.snapshot.load();
        match platform {
            Platform::Claude => snapshot.claude.clone(),
            Platform::Codex => snapshot.codex.clone(),
            Platform::Gemini => Vec::new(),
            Platform::Custom(name) => snapshot.custom.get(name).cloned().unwrap_or_default(),
        }
    }

    pub fn gemini_providers(&self) -> Vec<GeminiProvider> {
        self.snapshot.load().gemini.clone()
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
            level: 1,
            enabled: true,
            models: Vec::new(),
            timeout_seconds: None,
        }
    }

    #[test]
    fn reload_replaces_snapshot() {
        let registry = ProviderRegistry::new(RegistrySnapshot {
            claude: vec![chat("a")],
            ..Default::default()
        });
        assert_eq!(registry.chat_providers(&Platform::Claude).len(), 1);

        registry.reload(RegistrySnapshot {
            claude: vec![chat("a"), chat("b")],
            ..Default::default()
        });
        assert_eq!(registry.chat_providers(&Platform::Claude).len(), 2);
    }

    #[test]
    fn custom_pools_resolve_by_name() {
        let mut custom = HashMap::new();
        custom.insert("relay2".to_string(), vec![chat("x")]);
        let registry = ProviderRegistry::new(RegistrySnapshot {
            custom,
            ..Default::default()
        });

        assert_eq!(
            registry.chat_providers(&Platform::custom("relay2"))[0].name,
            "x"
        );
        assert!(registry
            .chat_providers(&Platform::custom("missing"))
            .is_empty());
    }
}
