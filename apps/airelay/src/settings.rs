use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use airelay_common::RelayConfigPatch;
use airelay_provider::RegistrySnapshot;

/// On-disk settings: relay policy plus the provider pools per platform kind.
///
/// ```json
/// {
///   "relay": {"failure_threshold": 3, "mode": "blacklist"},
///   "providers": {
///     "claude": [{"name": "primary", "api_url": "https://...", "api_key": "sk-..."}],
///     "codex": [],
///     "gemini": [],
///     "custom": {"relay2": []}
///   }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SettingsFile {
    #[serde(default)]
    pub(crate) relay: RelayConfigPatch,
    #[serde(default)]
    pub(crate) providers: RegistrySnapshot,
}

pub(crate) fn load(path: &str) -> anyhow::Result<SettingsFile> {
    if !Path::new(path).exists() {
        warn!(
            event = "settings_missing",
            path = path,
            "settings file not found; starting with no providers",
        );
        return Ok(SettingsFile::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("read settings {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse settings {path}"))
}
