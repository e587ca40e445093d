use std::collections::HashMap;
use std::sync::Mutex;

use crate::platform::Platform;

/// Per-(platform, level) rotation of which provider is tried first.
///
/// The memory is a provider name rather than an index: when list membership
/// changes between requests the lookup misses and the order restarts from
/// the front.
#[derive(Default)]
pub struct RoundRobinState {
    last_start: Mutex<HashMap<String, String>>,
}

impl RoundRobinState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotates `providers` so the search starts one past the provider that
    /// led the previous request at this `(platform, level)` key. Always
    /// returns a permutation of the input.
    pub fn reorder<T>(
        &self,
        platform: &Platform,
        level: u32,
        providers: Vec<T>,
        name_of: impl Fn(&T) -> &str,
    ) -> Vec<T> {
        if providers.len() <= 1 {
            return providers;
        }

        let key = format!("{platform}:{level}");
        let mut last_start = self.last_start.lock().unwrap_or_else(|e| e.into_inner());

        let last = last_start.get(&key).cloned();
        last_start.insert(key.clone(), name_of(&providers[0]).to_string());

        let Some(last) = last else {
            return providers;
        };
        let Some(last_idx) = providers.iter().position(|p| name_of(p) == last) else {
            return providers;
        };

        let mut rotated = providers;
        rotated.rotate_left((last_idx + 1) % rotated.len());
        last_start.insert(key, name_of(&rotated[0]).to_string());
        rotated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn reorder(state: &RoundRobinState, list: &[&str]) -> Vec<String> {
        state.reorder(&Platform::Claude, 1, names(list), |s| s.as_str())
    }

    #[test]
    fn advances_one_step_per_request() {
        let state = RoundRobinState::new();
        assert_eq!(reorder(&state, &["A", "B", "C"]), names(&["A", "B", "C"]));
        assert_eq!(reorder(&state, &["A", "B", "C"]), names(&["B", "C", "A"]));
        assert_eq!(reorder(&state, &["A", "B", "C"]), names(&["C", "A", "B"]));
        assert_eq!(reorder(&state, &["A", "B", "C"]), names(&["A", "B", "C"]));
    }

    #[test]
    fn missing_last_start_restarts_from_front() {
        let state = RoundRobinState::new();
        reorder(&state, &["A", "B"]);
        reorder(&state, &["A", "B"]);
        // "B" led last time but is gone now; order is preserved.
        assert_eq!(reorder(&state, &["C", "D"]), names(&["C", "D"]));
    }

    #[test]
    fn single_provider_untouched() {
        let state = RoundRobinState::new();
        assert_eq!(reorder(&state, &["A"]), names(&["A"]));
        assert_eq!(reorder(&state, &["A"]), names(&["A"]));
    }

    #[test]
    fn output_is_a_permutation() {
        let state = RoundRobinState::new();
        for _ in 0..5 {
            let mut out = reorder(&state, &["A", "B", "C", "D"]);
            out.sort();
            assert_eq!(out, names(&["A", "B", "C", "D"]));
        }
    }

    #[test]
    fn keys_isolate_platform_and_level() {
        let state = RoundRobinState::new();
        let first = state.reorder(&Platform::Claude, 1, names(&["A", "B"]), |s| s.as_str());
        assert_eq!(first, names(&["A", "B"]));
        // Same names at another level start from scratch.
        let other = state.reorder(&Platform::Claude, 2, names(&["A", "B"]), |s| s.as_str());
        assert_eq!(other, names(&["A", "B"]));
        // The level-1 key advanced independently.
        let second = state.reorder(&Platform::Claude, 1, names(&["A", "B"]), |s| s.as_str());
        assert_eq!(second, names(&["B", "A"]));
    }
}
