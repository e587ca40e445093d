use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::platform::Platform;

#[derive(Debug, Clone, Default)]
struct BlacklistEntry {
    failures: u32,
    until: Option<SystemTime>,
}

/// In-memory transient exclusion of providers after repeated failure.
///
/// Threshold and duration are policy inputs supplied per call, so different
/// endpoints can apply distinct policies over the same shared state. Entries
/// live only in memory; a single coarse mutex guards the map and every
/// critical section is an O(1) map operation.
#[derive(Default)]
pub struct BlacklistStore {
    entries: Mutex<HashMap<(Platform, String), BlacklistEntry>>,
}

impl BlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the expiry while `(platform, name)` is blacklisted. Expired
    /// entries are treated as absent and lazily removed.
    pub fn check(&self, platform: &Platform, name: &str) -> Option<SystemTime> {
        let now = SystemTime::now();
        let key = (platform.clone(), name.to_string());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&key)?;
        match entry.until {
            Some(until) if until > now => Some(until),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Counts one failure. Once the counter reaches `threshold` the provider
    /// is excluded until `now + duration`, the counter resets, and the call
    /// returns true.
    pub fn record_failure(
        &self,
        platform: &Platform,
        name: &str,
        threshold: u32,
        duration: Duration,
    ) -> bool {
        let key = (platform.clone(), name.to_string());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(key).or_default();
        entry.failures += 1;
        if entry.failures >= threshold.max(1) {
            entry.failures = 0;
            entry.until = Some(SystemTime::now() + duration);
            true
        } else {
            false
        }
    }

    /// Any success clears the provider's entry entirely.
    pub fn record_success(&self, platform: &Platform, name: &str) {
        let key = (platform.clone(), name.to_string());
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }
}
