use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::batch::{run_sequential, BatchOrchestrator, BatchRun, RunStats};
use crate::config::BatchConfig;
use crate::diagnosis::judge::{build_judge_items, judge_template, process_judgements};
use crate::diagnosis::results::{process_results, FailureDetail};
use crate::error::{Error, Result};
use crate::llm::{ModelHandler, PromptRegistry};
use crate::models::{JudgeKind, NewCase};
use crate::storage::Storage;

/// What to run: which model, which prompt, over which cases.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub model_alias: String,
    pub prompt_alias: String,
    pub source: String,
    pub num_samples: Option<usize>,
    pub sequential: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cases: usize,
    pub stored: usize,
    pub stats: RunStats,
    pub failures: Vec<FailureDetail>,
}

/// Which stored differentials to hand to a judge model.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub kind: JudgeKind,
    pub judge_alias: String,
    /// Alias of the model whose differentials are judged.
    pub differential_model: String,
    pub source: String,
    pub num_samples: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JudgeReport {
    pub differentials: usize,
    pub judged: usize,
    pub verdicts: usize,
    pub stats: RunStats,
    pub failures: Vec<FailureDetail>,
}

/// Fetches cases, asks the model for a differential and stores the
/// parsed answers.
pub struct DiagnosisPipeline {
    handler: Arc<ModelHandler>,
    prompts: PromptRegistry,
    storage: Storage,
    config: BatchConfig,
}

impl DiagnosisPipeline {
    pub fn new(handler: ModelHandler, prompts: PromptRegistry, storage: Storage, config: BatchConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            prompts,
            storage,
            config,
        }
    }

    pub fn handler(&self) -> &ModelHandler {
        &self.handler
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Loads a JSON array of cases into the store.
    pub fn import_cases<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let cases: Vec<NewCase> = serde_json::from_str(&contents)?;

        for case in &cases {
            self.storage.add_case(case)?;
        }

        tracing::info!("Imported {} cases from {}", cases.len(), path.as_ref().display());
        Ok(cases.len())
    }

    pub async fn run(&mut self, request: &RunRequest) -> Result<RunReport> {
        // Step 1: Resolve prompt and model before touching the store
        let template = self.prompts.get(&request.prompt_alias)?;
        self.handler.tracker_for(&request.model_alias)?;

        // Step 2: Fetch cases
        let cases = self.storage.get_cases(&request.source, request.num_samples)?;
        if cases.is_empty() {
            tracing::warn!("No cases found for source {}", request.source);
            return Ok(RunReport::default());
        }
        tracing::info!(
            "Running {} on {} cases from {} with prompt {}",
            request.model_alias,
            cases.len(),
            request.source,
            request.prompt_alias
        );

        let items: Vec<_> = cases.iter().map(|c| c.to_work_item()).collect();

        // Step 3: Call the model
        let run = if request.sequential {
            let handler = self.handler.clone();
            let config = self.config.clone();
            let template = template.clone();
            let alias = request.model_alias.clone();
            tokio::task::spawn_blocking(move || {
                run_sequential(&handler, &config, &items, template.as_ref(), &alias)
            })
            .await
            .map_err(|e| Error::LLMApi(format!("Sequential run did not complete: {}", e)))??
        } else {
            BatchOrchestrator::new(&self.handler, self.config.clone())
                .run(&items, template.as_ref(), &request.model_alias)
                .await?
        };
        let BatchRun { results, stats } = run;

        // Step 4: Parse and store
        let model_id = self.storage.insert_or_fetch_model(&request.model_alias)?;
        let prompt_id = self.storage.insert_or_fetch_prompt(&request.prompt_alias)?;
        let processed = process_results(&results, &cases, model_id, prompt_id, template.output_format());
        let stored = self
            .storage
            .add_batch_differential_diagnoses(&processed.records)?
            .len();

        tracing::info!(
            "Stored {} of {} answers, {} failures",
            stored,
            results.len(),
            processed.failures.len()
        );
        if self.config.verbose {
            for failure in &processed.failures {
                tracing::warn!(
                    "{}: {} {}",
                    failure.id,
                    failure.reason,
                    failure.detail.as_deref().unwrap_or_default()
                );
            }
        }

        Ok(RunReport {
            cases: cases.len(),
            stored,
            stats,
            failures: processed.failures,
        })
    }

    pub async fn judge(&mut self, request: &JudgeRequest) -> Result<JudgeReport> {
        // Step 1: Resolve the judge model
        self.handler.tracker_for(&request.judge_alias)?;
        let template = judge_template(request.kind);

        // Step 2: Fetch stored differentials
        let differentials = self.storage.get_differentials(
            &request.source,
            &request.differential_model,
            request.num_samples,
        )?;
        let items = build_judge_items(&differentials, request.kind);
        if items.is_empty() {
            tracing::warn!(
                "No differentials by {} to judge for source {}",
                request.differential_model,
                request.source
            );
            return Ok(JudgeReport {
                differentials: differentials.len(),
                ..JudgeReport::default()
            });
        }
        tracing::info!(
            "Judging {} of {} differentials by {} with {} ({})",
            items.len(),
            differentials.len(),
            request.differential_model,
            request.judge_alias,
            request.kind
        );

        // Step 3: Call the judge
        let BatchRun { results, stats } = BatchOrchestrator::new(&self.handler, self.config.clone())
            .run(&items, &template, &request.judge_alias)
            .await?;

        // Step 4: Parse and store verdicts
        let processed = process_judgements(&results, &differentials, request.kind);
        let judge_model_id = self.storage.insert_or_fetch_model(&request.judge_alias)?;
        let verdicts = self.storage.add_judgements(judge_model_id, &processed.judged)?;

        tracing::info!(
            "Stored {} verdicts for {} differentials, {} failures",
            verdicts,
            processed.judged.len(),
            processed.failures.len()
        );
        if self.config.verbose {
            for failure in &processed.failures {
                tracing::warn!(
                    "{}: {} {}",
                    failure.id,
                    failure.reason,
                    failure.detail.as_deref().unwrap_or_default()
                );
            }
        }

        Ok(JudgeReport {
            differentials: differentials.len(),
            judged: processed.judged.len(),
            verdicts,
            stats,
            failures: processed.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::batch::PacingPolicy;
    use crate::llm::testing::{handler_with, StubConfig};
    use crate::tracker::RateLimitAction;

    fn batch_config() -> BatchConfig {
        BatchConfig {
            batch_size: 2,
            rpm_limit: 1000,
            pacing: PacingPolicy {
                interval: Duration::ZERO,
                tracker: RateLimitAction::Ignore,
                enforce_rpm: false,
            },
            request_timeout: None,
            verbose: true,
            show_progress: false,
        }
    }

    fn pipeline() -> DiagnosisPipeline {
        let responder = Arc::new(|prompt: &str| -> Result<String> {
            if prompt.contains("silent") {
                Ok(String::new())
            } else {
                Ok("<thinking>hmm</thinking>\n<top5>\n+1. Flu: fever\n+2. Cold: cough\n</top5>".to_string())
            }
        });
        let handler = handler_with(StubConfig::new("stub", responder));
        DiagnosisPipeline::new(
            handler,
            PromptRegistry::with_defaults(),
            Storage::in_memory().unwrap(),
            batch_config(),
        )
    }

    fn request(sequential: bool) -> RunRequest {
        RunRequest {
            model_alias: "stub".to_string(),
            prompt_alias: "dxgpt_improved".to_string(),
            source: "test".to_string(),
            num_samples: Some(3),
            sequential,
        }
    }

    fn seed(pipeline: &DiagnosisPipeline) {
        for text in ["fever and cough", "", "silent case", "not fetched"] {
            pipeline
                .storage()
                .add_case(&NewCase {
                    source: "test".to_string(),
                    text: text.to_string(),
                    gold_diagnosis: None,
                })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_stores_parsed_answers() {
        let mut pipeline = pipeline();
        seed(&pipeline);

        let report = pipeline.run(&request(false)).await.unwrap();

        assert_eq!(report.cases, 3);
        assert_eq!(report.stored, 1);
        assert_eq!(report.stats.successes, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].detail.as_deref(), Some("Empty text"));

        let ranks = pipeline.storage().get_ranks(1).unwrap();
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0].name.as_deref(), Some("Flu"));
    }

    #[tokio::test]
    async fn test_sequential_run() {
        let mut pipeline = pipeline();
        seed(&pipeline);

        let report = pipeline.run(&request(true)).await.unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(report.stats.items, 3);
    }

    #[tokio::test]
    async fn test_unknown_aliases_fail_before_running() {
        let mut pipeline = pipeline();
        seed(&pipeline);

        let mut bad_model = request(false);
        bad_model.model_alias = "nope".to_string();
        assert!(matches!(
            pipeline.run(&bad_model).await.unwrap_err(),
            Error::UnknownAlias { .. }
        ));

        let mut bad_prompt = request(false);
        bad_prompt.prompt_alias = "nope".to_string();
        assert!(pipeline.run(&bad_prompt).await.is_err());
        assert!(pipeline.handler().usage_report().is_empty());
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut pipeline = pipeline();
        let report = pipeline.run(&request(false)).await.unwrap();
        assert_eq!(report.cases, 0);
    }

    #[tokio::test]
    async fn test_judge_stored_differentials() {
        let responder = Arc::new(|prompt: &str| -> Result<String> {
            if prompt.contains("Confirmed diagnosis") {
                Ok(r#"{"golden_diagnosis": "Flu", "differential_diagnoses": [
                    {"diagnosis": "Flu", "category": {"code": 1, "label": "Exact synonym"}},
                    {"diagnosis": "Cold", "category": {"code": 5, "label": "Related disease group"}}
                ]}"#
                .to_string())
            } else {
                Ok("+1. Flu: fever\n+2. Cold: cough".to_string())
            }
        });
        let handler = handler_with(StubConfig::new("stub", responder));
        let mut pipeline = DiagnosisPipeline::new(
            handler,
            PromptRegistry::with_defaults(),
            Storage::in_memory().unwrap(),
            batch_config(),
        );
        for (text, gold) in [("fever", Some("Flu")), ("cough", None)] {
            pipeline
                .storage()
                .add_case(&NewCase {
                    source: "test".to_string(),
                    text: text.to_string(),
                    gold_diagnosis: gold.map(String::from),
                })
                .unwrap();
        }
        let mut run = request(false);
        run.prompt_alias = "dxgpt_standard".to_string();
        assert_eq!(pipeline.run(&run).await.unwrap().stored, 2);

        let judge = JudgeRequest {
            kind: JudgeKind::Semantic,
            judge_alias: "stub".to_string(),
            differential_model: "stub".to_string(),
            source: "test".to_string(),
            num_samples: None,
        };
        let report = pipeline.judge(&judge).await.unwrap();

        assert_eq!(report.differentials, 2);
        assert_eq!(report.judged, 1);
        assert_eq!(report.verdicts, 2);
        assert_eq!(report.stats.items, 1);
        assert!(report.failures.is_empty());

        let verdicts = pipeline.storage().get_semantic_judgements(1).unwrap();
        assert_eq!(verdicts[0].category, crate::models::SemanticCategory::ExactSynonym);
        assert_eq!(verdicts[1].category.code(), 5);

        let severity = JudgeRequest {
            kind: JudgeKind::Severity,
            ..judge
        };
        let report = pipeline.judge(&severity).await.unwrap();
        assert_eq!(report.judged, 0);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.reason == "Parse error"));
    }

    #[tokio::test]
    async fn test_judge_unknown_alias() {
        let mut pipeline = pipeline();
        let request = JudgeRequest {
            kind: JudgeKind::Severity,
            judge_alias: "nope".to_string(),
            differential_model: "stub".to_string(),
            source: "all".to_string(),
            num_samples: None,
        };
        assert!(matches!(
            pipeline.judge(&request).await.unwrap_err(),
            Error::UnknownAlias { .. }
        ));
    }

    #[test]
    fn test_import_cases() {
        let pipeline = pipeline();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"source": "PUMCH", "text": "fever", "gold_diagnosis": "Flu"}}, {{"source": "PUMCH", "text": "rash"}}]"#
        )
        .unwrap();

        assert_eq!(pipeline.import_cases(file.path()).unwrap(), 2);
        let cases = pipeline.storage().get_cases("PUMCH", None).unwrap();
        assert_eq!(cases[0].gold_diagnosis.as_deref(), Some("Flu"));
        assert!(cases[1].gold_diagnosis.is_none());
    }
}
