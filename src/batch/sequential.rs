use std::time::Instant;

use crate::batch::orchestrator::{progress_bar, prompt_error, BatchRun};
use crate::batch::pacing::should_wait;
use crate::batch::stats::RunStats;
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::llm::{ModelHandler, PromptTemplate};
use crate::models::{BatchResult, WorkItem};

/// Blocking counterpart of [`BatchOrchestrator`](crate::batch::BatchOrchestrator).
///
/// Items are called one at a time through the sync callers, with the same
/// chunk pacing as the async path. `request_timeout` is not applied here;
/// the HTTP client timeout bounds each call instead.
pub fn run_sequential(
    handler: &ModelHandler,
    config: &BatchConfig,
    items: &[WorkItem],
    template: &dyn PromptTemplate,
    alias: &str,
) -> Result<BatchRun> {
    if config.batch_size == 0 {
        return Err(Error::Config("batch size must be at least 1".to_string()));
    }
    let tracker = handler.tracker_for(alias)?;
    let interval = config.pacing.effective_interval(config.batch_size, config.rpm_limit);
    let total_chunks = items.len().div_ceil(config.batch_size);

    tracing::info!("Processing {} items sequentially with model {}", items.len(), alias);

    let pb = progress_bar(items.len() as u64, config.show_progress);
    let run_start = Instant::now();
    let mut last_start = None;
    let mut results = Vec::with_capacity(items.len());

    for chunk in items.chunks(config.batch_size) {
        if let Some(wait) = should_wait(last_start, interval, Instant::now()) {
            tracing::info!("Waiting {:.2}s before next batch", wait.as_secs_f64());
            std::thread::sleep(wait);
        }
        if let Some(wait) = config.pacing.tracker_wait(&tracker, handler.buffer_percent()) {
            tracing::info!("Waiting {}s for {} rate limits to reset", wait.as_secs(), alias);
            std::thread::sleep(wait);
        }
        last_start = Some(Instant::now());

        for item in chunk {
            let result = call_item(handler, item, template, alias);
            if !result.success() {
                let error = result.error().unwrap_or_default();
                if config.verbose {
                    tracing::warn!("Item {} failed: {}", item.id, error);
                } else {
                    tracing::debug!("Item {} failed: {}", item.id, error);
                }
            }
            pb.inc(1);
            results.push(result);
        }
    }

    pb.finish_with_message("Sequential processing complete");

    let stats = RunStats::from_results(&results, total_chunks, run_start.elapsed());
    stats.log();
    Ok(BatchRun { results, stats })
}

fn call_item(
    handler: &ModelHandler,
    item: &WorkItem,
    template: &dyn PromptTemplate,
    alias: &str,
) -> BatchResult {
    if item.text.trim().is_empty() {
        return BatchResult::failed(&item.id, "Empty text");
    }
    let prompt = match template.to_prompt(&item.text) {
        Ok(prompt) => prompt,
        Err(e) => return BatchResult::failed(&item.id, prompt_error(e)),
    };

    let started = Instant::now();
    match handler.get_response_blocking(&prompt, alias) {
        Ok(completion) => BatchResult::ok(&item.id, completion.text)
            .with_usage(completion.usage)
            .with_elapsed(started.elapsed()),
        Err(e) => BatchResult::failed(&item.id, format!("Model call error: {}", e))
            .with_elapsed(started.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::batch::PacingPolicy;
    use crate::llm::testing::{ack_failing_on, handler_with, StubConfig};
    use crate::llm::{OutputFormat, TextTemplate};
    use crate::tracker::RateLimitAction;

    #[test]
    fn test_run_sequential() {
        let handler = handler_with(StubConfig::new("stub", ack_failing_on("bad")));
        let config = BatchConfig {
            batch_size: 2,
            rpm_limit: 1000,
            pacing: PacingPolicy {
                interval: Duration::ZERO,
                tracker: RateLimitAction::Ignore,
                enforce_rpm: false,
            },
            request_timeout: None,
            verbose: false,
            show_progress: false,
        };
        let items = vec![
            WorkItem::new("1", "fever"),
            WorkItem::new("2", "bad"),
            WorkItem::new("3", " "),
        ];
        let template = TextTemplate::new("raw", "{description}", OutputFormat::Numbered);

        let run = run_sequential(&handler, &config, &items, &template, "stub").unwrap();

        let ids: Vec<_> = run.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(run.results[0].text(), Some("ack:fever"));
        assert!(run.results[1].error().unwrap().starts_with("Model call error:"));
        assert_eq!(run.results[2].error(), Some("Empty text"));
        assert_eq!(run.stats.chunks, 2);
        assert_eq!(run.stats.successes, 1);

        let usage = &handler.usage_report()["stub-model"];
        assert_eq!(usage.success_count, 1);
        assert_eq!(usage.failed_count, 1);
    }
}
