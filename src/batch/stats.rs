use std::time::Duration;

use serde::Serialize;

use crate::batch::pacing::effective_rpm;
use crate::models::BatchResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub items: usize,
    pub chunks: usize,
    pub successes: usize,
    pub failures: usize,
    pub total_tokens: u64,
    pub elapsed: Duration,
    pub mean_latency: Option<Duration>,
    pub effective_rpm: f64,
}

impl RunStats {
    pub fn from_results(results: &[BatchResult], chunks: usize, elapsed: Duration) -> Self {
        let successes: Vec<_> = results.iter().filter(|r| r.success()).collect();
        let total_tokens = successes
            .iter()
            .filter_map(|r| r.usage())
            .map(|u| u.total_tokens)
            .sum();
        let mean_latency = (!successes.is_empty()).then(|| {
            successes.iter().map(|r| r.elapsed()).sum::<Duration>() / successes.len() as u32
        });

        Self {
            items: results.len(),
            chunks,
            successes: successes.len(),
            failures: results.len() - successes.len(),
            total_tokens,
            elapsed,
            mean_latency,
            effective_rpm: effective_rpm(results.len(), elapsed),
        }
    }

    pub fn log(&self) {
        tracing::info!(
            "Processed {} items in {} batches in {:.2}s: {} succeeded, {} failed, {} tokens",
            self.items,
            self.chunks,
            self.elapsed.as_secs_f64(),
            self.successes,
            self.failures,
            self.total_tokens
        );
        if let Some(latency) = self.mean_latency {
            tracing::info!(
                "Average time per successful item: {:.2}s, average tokens: {:.1}",
                latency.as_secs_f64(),
                self.total_tokens as f64 / self.successes as f64
            );
        }
        tracing::info!("Overall effective rate: {:.1} requests per minute", self.effective_rpm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenUsage;

    #[test]
    fn test_stats_from_results() {
        let results = vec![
            BatchResult::ok("1", "a")
                .with_usage(TokenUsage::new(10, 5))
                .with_elapsed(Duration::from_millis(200)),
            BatchResult::ok("2", "b")
                .with_usage(TokenUsage::new(20, 5))
                .with_elapsed(Duration::from_millis(400)),
            BatchResult::failed("3", "Empty text"),
        ];
        let stats = RunStats::from_results(&results, 2, Duration::from_secs(30));

        assert_eq!(stats.successes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.total_tokens, 40);
        assert_eq!(stats.mean_latency, Some(Duration::from_millis(300)));
        assert_eq!(stats.effective_rpm, 6.0);
    }

    #[test]
    fn test_stats_without_successes() {
        let stats = RunStats::from_results(&[BatchResult::failed("1", "x")], 1, Duration::ZERO);
        assert_eq!(stats.mean_latency, None);
        assert_eq!(stats.effective_rpm, 0.0);
    }
}
