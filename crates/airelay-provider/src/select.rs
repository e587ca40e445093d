use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::blacklist::BlacklistStore;
use crate::endpoint::ProviderEndpoint;
use crate::platform::Platform;
use crate::round_robin::RoundRobinState;

#[derive(Debug)]
pub struct FilterOutcome<T> {
    pub active: Vec<T>,
    pub skipped: usize,
}

/// Filter pipeline applied per provider, in order; each step may skip the
/// provider. Skipped providers are counted for diagnostics but do not affect
/// ordering. The gemini wiring passes neither hook, reducing the pipeline to
/// the enabled/valid and blacklist steps.
pub fn filter_providers<T: ProviderEndpoint>(
    providers: Vec<T>,
    platform: &Platform,
    requested_model: &str,
    blacklist: &BlacklistStore,
    model_checker: Option<&dyn Fn(&T, &str) -> bool>,
    config_validator: Option<&dyn Fn(&T) -> Vec<String>>,
) -> FilterOutcome<T> {
    let mut outcome = FilterOutcome {
        active: Vec::with_capacity(providers.len()),
        skipped: 0,
    };

    for provider in providers {
        if !provider.enabled() || !provider.has_valid_config() {
            continue;
        }

        if let Some(validator) = config_validator {
            let errors = validator(&provider);
            if !errors.is_empty() {
                warn!(
                    event = "provider_skipped",
                    platform = %platform,
                    provider = provider.name(),
                    reason = "invalid_config",
                    errors = ?errors,
                );
                outcome.skipped += 1;
                continue;
            }
        }

        if let Some(checker) = model_checker
            && !requested_model.is_empty()
            && !checker(&provider, requested_model)
        {
            debug!(
                event = "provider_skipped",
                platform = %platform,
                provider = provider.name(),
                reason = "model_unsupported",
                model = requested_model,
            );
            outcome.skipped += 1;
            continue;
        }

        if let Some(until) = blacklist.check(platform, provider.name()) {
            debug!(
                event = "provider_skipped",
                platform = %platform,
                provider = provider.name(),
                reason = "blacklisted",
                until = ?until,
            );
            outcome.skipped += 1;
            continue;
        }

        outcome.active.push(provider);
    }

    outcome
}

/// Groups providers by normalized level; the BTreeMap iterates levels in
/// ascending order (lower level = higher priority).
pub fn group_by_level<T: ProviderEndpoint>(providers: Vec<T>) -> BTreeMap<u32, Vec<T>> {
    let mut groups: BTreeMap<u32, Vec<T>> = BTreeMap::new();
    for provider in providers {
        groups.entry(provider.level()).or_default().push(provider);
    }
    groups
}

/// Flattens level groups into the final ordered candidate list, applying the
/// round-robin rotation within each level.
pub fn candidate_order<T: ProviderEndpoint>(
    providers: Vec<T>,
    platform: &Platform,
    round_robin: &RoundRobinState,
) -> Vec<T> {
    let mut ordered = Vec::with_capacity(providers.len());
    for (level, group) in group_by_level(providers) {
        ordered.extend(round_robin.reorder(platform, level, group, |p| p.name()));
    }
    ordered
}
