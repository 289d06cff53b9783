use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::llm::provider::{LlmCaller, ProviderConfig};
use crate::llm::registry::ConfigRegistry;
use crate::models::{Completion, TokenUsage};
use crate::tracker::{
    RateLimitAction, RateTracker, SharedTracker, TokenCount, TrackerRegistry, UsageSummary,
};

pub const DEFAULT_BUFFER_PERCENT: f64 = 0.9;

type CallerCache = Mutex<HashMap<String, Arc<dyn LlmCaller>>>;

/// Single entry point for model calls: alias lookup, pre-flight rate check,
/// the call itself and usage accounting.
pub struct ModelHandler {
    configs: ConfigRegistry,
    trackers: TrackerRegistry,
    preflight: RateLimitAction,
    buffer_percent: f64,
    async_callers: CallerCache,
    sync_callers: CallerCache,
}

impl ModelHandler {
    pub fn new(configs: ConfigRegistry, trackers: TrackerRegistry) -> Self {
        Self {
            configs,
            trackers,
            preflight: RateLimitAction::Warn,
            buffer_percent: DEFAULT_BUFFER_PERCENT,
            async_callers: Mutex::new(HashMap::new()),
            sync_callers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_preflight(mut self, action: RateLimitAction) -> Self {
        self.preflight = action;
        self
    }

    pub fn with_buffer_percent(mut self, buffer_percent: f64) -> Self {
        self.buffer_percent = buffer_percent;
        self
    }

    pub fn buffer_percent(&self) -> f64 {
        self.buffer_percent
    }

    pub fn trackers(&self) -> &TrackerRegistry {
        &self.trackers
    }

    pub async fn get_response(&self, prompt: &str, alias: &str) -> Result<Completion> {
        self.get_response_with_timeout(prompt, alias, None).await
    }

    /// Like [`get_response`](Self::get_response), but gives up after
    /// `timeout`. An expired call is recorded as a failed request.
    pub async fn get_response_with_timeout(
        &self,
        prompt: &str,
        alias: &str,
        timeout: Option<Duration>,
    ) -> Result<Completion> {
        let config = self.configs.create(alias)?;
        let params = config.params();
        params.validate()?;

        let tracker = self.tracker_for_config(config.as_ref());
        if let Some(wait) = self.preflight(alias, &tracker) {
            tracing::info!("Waiting {:?} for {} limits to reset", wait, alias);
            tokio::time::sleep(wait).await;
        }

        let caller = self.cached_caller(&self.async_callers, config.as_ref(), true);
        let call = caller.call_async(&params, prompt);
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => call.await,
        };
        Self::record(&tracker, alias, &result);
        result
    }

    /// Blocking variant for sequential runs. Must not be called from an
    /// async task; use `spawn_blocking` when inside a runtime.
    pub fn get_response_blocking(&self, prompt: &str, alias: &str) -> Result<Completion> {
        let config = self.configs.create(alias)?;
        let params = config.params();
        params.validate()?;

        let tracker = self.tracker_for_config(config.as_ref());
        if let Some(wait) = self.preflight(alias, &tracker) {
            tracing::info!("Waiting {:?} for {} limits to reset", wait, alias);
            std::thread::sleep(wait);
        }

        let caller = self.cached_caller(&self.sync_callers, config.as_ref(), false);
        let result = caller.call(&params, prompt);
        Self::record(&tracker, alias, &result);
        result
    }

    pub fn list_available_models(&self) -> Vec<String> {
        self.configs.aliases().into_iter().map(String::from).collect()
    }

    pub fn tracker_for(&self, alias: &str) -> Result<SharedTracker> {
        let config = self.configs.create(alias)?;
        Ok(self.tracker_for_config(config.as_ref()))
    }

    pub fn usage_report(&self) -> BTreeMap<String, UsageSummary> {
        self.trackers.usage_summary()
    }

    pub fn estimate_price(&self, alias: &str, usage: &TokenUsage) -> Result<f64> {
        let tracker = self.tracker_for(alias)?;
        let price = tracker
            .lock()
            .prompt_to_price(usage.prompt_tokens, usage.completion_tokens, 1.0);
        Ok(price)
    }

    fn tracker_for_config(&self, config: &dyn ProviderConfig) -> SharedTracker {
        self.trackers
            .get_or_create(config.model(), || config.tracker_limits())
    }

    fn cached_caller(
        &self,
        cache: &CallerCache,
        config: &dyn ProviderConfig,
        asynchronous: bool,
    ) -> Arc<dyn LlmCaller> {
        cache
            .lock()
            .entry(config.alias().to_string())
            .or_insert_with(|| {
                let caller = if asynchronous {
                    config.async_caller()
                } else {
                    config.caller()
                };
                Arc::from(caller)
            })
            .clone()
    }

    /// Returns how long to sleep before calling, if at all.
    fn preflight(&self, alias: &str, tracker: &SharedTracker) -> Option<Duration> {
        if self.preflight == RateLimitAction::Ignore {
            return None;
        }

        let status = tracker.lock().check_rate_limits(self.buffer_percent);
        if !status.is_near_limit() {
            return None;
        }

        tracing::warn!(
            "Rate limits approaching for {}: {}",
            alias,
            status.limit_messages.join(", ")
        );

        match self.preflight {
            RateLimitAction::Wait => RateTracker::wait_for_status(&status).map(Duration::from_secs),
            _ => None,
        }
    }

    fn record(tracker: &SharedTracker, alias: &str, result: &Result<Completion>) {
        let mut tracker = tracker.lock();
        match result {
            Ok(completion) => tracker.record_request(
                TokenCount::Split {
                    prompt: completion.usage.prompt_tokens,
                    completion: completion.usage.completion_tokens,
                },
                true,
            ),
            Err(e) => {
                tracing::debug!("Call to {} failed: {}", alias, e);
                tracker.record_request(TokenCount::Total(0), false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ack, ack_failing_on, handler_with, StubConfig};
    use crate::tracker::TrackerLimits;

    #[tokio::test]
    async fn test_get_response_records_usage() {
        let handler = handler_with(StubConfig::new("stub", ack()));

        let completion = handler.get_response("abc", "stub").await.unwrap();
        assert_eq!(completion.text, "ack:abc");

        let report = handler.usage_report();
        let summary = &report["stub-model"];
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.total_tokens, 3 + 7);
    }

    #[tokio::test]
    async fn test_failed_call_is_counted() {
        let handler = handler_with(StubConfig::new("stub", ack_failing_on("bad")));

        let err = handler.get_response("bad input", "stub").await.unwrap_err();
        assert!(matches!(err, Error::LLMApi(_)));

        let tracker = handler.tracker_for("stub").unwrap();
        assert_eq!(tracker.lock().failed_count(), 1);
        assert_eq!(tracker.lock().success_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_alias() {
        let handler = handler_with(StubConfig::new("stub", ack()));
        let err = handler.get_response("x", "missing").await.unwrap_err();
        assert!(matches!(err, Error::UnknownAlias { .. }));
        assert!(handler.usage_report().is_empty());
    }

    #[tokio::test]
    async fn test_preflight_warn_does_not_block() {
        let limits = TrackerLimits {
            rpm: 1,
            ..Default::default()
        };
        let handler = handler_with(StubConfig::new("stub", ack()).with_limits(limits));

        handler.get_response("one", "stub").await.unwrap();
        // Tracker is now at 100% of rpm; the default action only logs.
        let started = std::time::Instant::now();
        handler.get_response("two", "stub").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handler.usage_report()["stub-model"].success_count, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failure() {
        let handler = handler_with(StubConfig::new("slow", ack()).with_delay(Duration::from_millis(500)));

        let err = handler
            .get_response_with_timeout("x", "slow", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let summary = &handler.usage_report()["slow-model"];
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.total_requests, 1);

        let completion = handler
            .get_response_with_timeout("y", "slow", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(completion.text, "ack:y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_wait_sleeps_until_window_clears() {
        let limits = TrackerLimits {
            rpm: 1,
            ..Default::default()
        };
        let handler = handler_with(StubConfig::new("stub", ack()).with_limits(limits))
            .with_preflight(RateLimitAction::Wait);

        handler.get_response("one", "stub").await.unwrap();
        let started = tokio::time::Instant::now();
        handler.get_response("two", "stub").await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(handler.usage_report()["stub-model"].success_count, 2);
    }

    #[test]
    fn test_blocking_path() {
        let handler = handler_with(StubConfig::new("stub", ack()));
        let completion = handler.get_response_blocking("sync", "stub").unwrap();
        assert_eq!(completion.text, "ack:sync");
        assert_eq!(handler.list_available_models(), vec!["stub".to_string()]);
    }

    #[test]
    fn test_estimate_price() {
        let limits = TrackerLimits {
            prompt_price: 0.59,
            completion_price: 0.79,
            ..Default::default()
        };
        let handler = handler_with(StubConfig::new("stub", ack()).with_limits(limits));
        let price = handler
            .estimate_price("stub", &TokenUsage::new(1_000_000, 1_000_000))
            .unwrap();
        assert!((price - 1.38).abs() < 1e-9);
    }
}
