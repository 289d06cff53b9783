use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::rate_tracker::{RateTracker, TrackerLimits, UsageSummary};

pub type SharedTracker = Arc<Mutex<RateTracker>>;

/// Process-wide map of model name to its usage ledger.
///
/// Owned by whoever composes the handler; cloning shares the same ledgers.
#[derive(Clone, Default)]
pub struct TrackerRegistry {
    trackers: Arc<RwLock<HashMap<String, SharedTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracker for `model_name`, creating it from `limits` on
    /// first lookup. Later lookups ignore `limits`.
    pub fn get_or_create<F>(&self, model_name: &str, limits: F) -> SharedTracker
    where
        F: FnOnce() -> TrackerLimits,
    {
        if let Some(tracker) = self.trackers.read().get(model_name) {
            return tracker.clone();
        }

        let mut trackers = self.trackers.write();
        trackers
            .entry(model_name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating rate tracker for model {}", model_name);
                Arc::new(Mutex::new(RateTracker::new(model_name, limits())))
            })
            .clone()
    }

    pub fn get(&self, model_name: &str) -> Option<SharedTracker> {
        self.trackers.read().get(model_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.trackers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.read().is_empty()
    }

    pub fn usage_summary(&self) -> BTreeMap<String, UsageSummary> {
        self.trackers
            .read()
            .iter()
            .map(|(name, tracker)| (name.clone(), tracker.lock().usage_summary()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TokenCount;

    #[test]
    fn test_same_model_shares_tracker() {
        let registry = TrackerRegistry::new();
        let a = registry.get_or_create("llama3-70b-8192", TrackerLimits::default);
        let b = registry.get_or_create("llama3-70b-8192", || TrackerLimits {
            rpm: 1,
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().limits().rpm, 0);

        a.lock().record_request(TokenCount::Total(12), true);
        assert_eq!(b.lock().success_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registries_are_independent() {
        let first = TrackerRegistry::new();
        let second = TrackerRegistry::new();
        first
            .get_or_create("m", TrackerLimits::default)
            .lock()
            .record_request(TokenCount::Total(5), false);

        assert!(second.get("m").is_none());
        let summary = first.usage_summary();
        assert_eq!(summary["m"].failed_count, 1);
        assert_eq!(summary["m"].total_tokens, 5);
    }
}
