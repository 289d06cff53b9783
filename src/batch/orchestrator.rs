use std::time::{Duration, Instant};

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::pacing::{effective_rpm, should_wait};
use crate::batch::stats::RunStats;
use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::llm::{ModelHandler, PromptTemplate};
use crate::models::{BatchResult, WorkItem};

/// Results of a run, in chunk order, plus the run summary.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub results: Vec<BatchResult>,
    pub stats: RunStats,
}

/// Drives work items through a [`ModelHandler`] in fixed-size chunks.
///
/// Items within a chunk run concurrently; the next chunk starts only after
/// every item of the current one has finished and the pacing policy allows
/// it. A failing item never affects its siblings.
pub struct BatchOrchestrator<'a> {
    handler: &'a ModelHandler,
    config: BatchConfig,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(handler: &'a ModelHandler, config: BatchConfig) -> Self {
        Self { handler, config }
    }

    /// Runs every item. Only configuration problems found before the first
    /// chunk (unknown alias, zero batch size) are returned as errors.
    pub async fn run(
        &self,
        items: &[WorkItem],
        template: &dyn PromptTemplate,
        alias: &str,
    ) -> Result<BatchRun> {
        if self.config.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        let tracker = self.handler.tracker_for(alias)?;

        let batch_size = self.config.batch_size;
        let total_chunks = items.len().div_ceil(batch_size);
        let interval = self
            .config
            .pacing
            .effective_interval(batch_size, self.config.rpm_limit);

        tracing::info!(
            "Processing {} items with model {} in {} batches of up to {}",
            items.len(),
            alias,
            total_chunks,
            batch_size
        );

        let pb = progress_bar(items.len() as u64, self.config.show_progress);
        let run_start = Instant::now();
        let mut last_start: Option<Instant> = None;
        let mut results = Vec::with_capacity(items.len());

        for (index, chunk) in items.chunks(batch_size).enumerate() {
            let number = index + 1;

            if let Some(wait) = should_wait(last_start, interval, Instant::now()) {
                tracing::info!(
                    "Waiting {:.2}s before starting batch {} to respect rate limits",
                    wait.as_secs_f64(),
                    number
                );
                tokio::time::sleep(wait).await;
            }

            if let Some(wait) = self
                .config
                .pacing
                .tracker_wait(&tracker, self.handler.buffer_percent())
            {
                tracing::info!("Waiting {}s for {} rate limits to reset", wait.as_secs(), alias);
                tokio::time::sleep(wait).await;
            }

            let chunk_start = Instant::now();
            last_start = Some(chunk_start);
            tracing::info!("Processing batch {}/{} with {} items", number, total_chunks, chunk.len());

            let chunk_results = join_all(
                chunk
                    .iter()
                    .map(|item| self.process_item(item, template, alias, &pb)),
            )
            .await;

            self.log_chunk(number, &chunk_results, chunk_start.elapsed());
            results.extend(chunk_results);
        }

        pb.finish_with_message("Batch processing complete");

        let stats = RunStats::from_results(&results, total_chunks, run_start.elapsed());
        stats.log();

        Ok(BatchRun { results, stats })
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        template: &dyn PromptTemplate,
        alias: &str,
        pb: &ProgressBar,
    ) -> BatchResult {
        let result = self.call_item(item, template, alias).await;
        pb.inc(1);
        result
    }

    async fn call_item(
        &self,
        item: &WorkItem,
        template: &dyn PromptTemplate,
        alias: &str,
    ) -> BatchResult {
        let started = Instant::now();

        if item.text.trim().is_empty() {
            tracing::debug!("Item {} has empty text, skipping", item.id);
            return BatchResult::failed(&item.id, "Empty text");
        }

        let prompt = match template.to_prompt(&item.text) {
            Ok(prompt) => prompt,
            Err(e) => return BatchResult::failed(&item.id, prompt_error(e)),
        };

        tracing::debug!("Processing item {}", item.id);
        let outcome = self
            .handler
            .get_response_with_timeout(&prompt, alias, self.config.request_timeout)
            .await;

        match outcome {
            Ok(completion) => {
                tracing::debug!(
                    "Completed item {} in {:.2}s ({} prompt, {} completion tokens)",
                    item.id,
                    started.elapsed().as_secs_f64(),
                    completion.usage.prompt_tokens,
                    completion.usage.completion_tokens
                );
                BatchResult::ok(&item.id, completion.text)
                    .with_usage(completion.usage)
                    .with_elapsed(started.elapsed())
            }
            Err(Error::Timeout(limit)) => {
                tracing::debug!("Item {} timed out after {:?}", item.id, limit);
                BatchResult::failed(&item.id, "timeout").with_elapsed(started.elapsed())
            }
            Err(e) => BatchResult::failed(&item.id, format!("Model call error: {}", e))
                .with_elapsed(started.elapsed()),
        }
    }

    fn log_chunk(&self, number: usize, results: &[BatchResult], elapsed: Duration) {
        let successes = results.iter().filter(|r| r.success()).count();
        let tokens: u64 = results
            .iter()
            .filter_map(|r| r.usage())
            .map(|u| u.total_tokens)
            .sum();

        tracing::info!(
            "Batch {} completed in {:.2}s: {}/{} succeeded, {} tokens",
            number,
            elapsed.as_secs_f64(),
            successes,
            results.len(),
            tokens
        );

        for failed in results.iter().filter(|r| !r.success()) {
            let error = failed.error().unwrap_or_default();
            if self.config.verbose {
                tracing::warn!("Item {} failed: {}", failed.id(), error);
            } else {
                tracing::debug!("Item {} failed: {}", failed.id(), error);
            }
        }

        let rpm = effective_rpm(results.len(), elapsed);
        if self.config.rpm_limit > 0 && rpm > self.config.rpm_limit as f64 {
            tracing::warn!(
                "Effective rate of {:.1} RPM exceeds limit of {} RPM",
                rpm,
                self.config.rpm_limit
            );
        } else {
            tracing::debug!("Effective rate: {:.1} RPM / {} RPM limit", rpm, self.config.rpm_limit);
        }
    }
}

/// Runs `items` through `handler` and returns one result per item.
pub async fn process_all_batches(
    items: &[WorkItem],
    template: &dyn PromptTemplate,
    handler: &ModelHandler,
    alias: &str,
    config: &BatchConfig,
) -> Result<Vec<BatchResult>> {
    let run = BatchOrchestrator::new(handler, config.clone())
        .run(items, template, alias)
        .await?;
    Ok(run.results)
}

pub(crate) fn prompt_error(e: Error) -> String {
    match e {
        Error::PromptTemplate(_) => e.to_string(),
        other => format!("Prompt generation error: {}", other),
    }
}

pub(crate) fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}
