use std::collections::HashMap;

use serde::Serialize;

use crate::diagnosis::results::FailureDetail;
use crate::llm::{OutputFormat, TextTemplate};
use crate::models::{
    BatchResult, JudgeKind, JudgedDifferential, StoredDifferential, Verdicts, WorkItem,
};
use crate::parsers::{parse_semantic_judgement, parse_severity_judgement};

const SEVERITY_JUDGE_PROMPT: &str = r#"You are a clinician rating how serious each disease in a list is.
For every disease below assign exactly one severity: rare, critical, severe, moderate or mild.
Answer with JSON only, in this shape:
{"severity_evaluations": [{"disease": "<name as given>", "severity": "<level>", "reasoning": "<one sentence>"}]}
Diseases:
{description}"#;

const SEMANTIC_JUDGE_PROMPT: &str = r#"You are a clinical terminologist comparing predicted diagnoses with a confirmed one.
For every predicted diagnosis choose one category:
1 Exact synonym, 2 Broad synonym, 3 Exact group of diseases, 4 Broad group of diseases, 5 Related disease group, 6 Not related disease.
Answer with JSON only, in this shape:
{"golden_diagnosis": "<confirmed diagnosis>", "differential_diagnoses": [{"diagnosis": "<name as given>", "category": {"code": <1-6>, "label": "<category>"}, "reasoning": "<one sentence>"}]}
{description}"#;

pub fn judge_template(kind: JudgeKind) -> TextTemplate {
    match kind {
        JudgeKind::Severity => TextTemplate::new("judge_severity", SEVERITY_JUDGE_PROMPT, OutputFormat::Numbered),
        JudgeKind::Semantic => TextTemplate::new("judge_semantic", SEMANTIC_JUDGE_PROMPT, OutputFormat::Numbered),
    }
}

/// One work item per differential the judge can say something about.
///
/// Differentials without named ranks are skipped, and so are those without
/// a gold diagnosis when comparing semantically.
pub fn build_judge_items(differentials: &[StoredDifferential], kind: JudgeKind) -> Vec<WorkItem> {
    differentials
        .iter()
        .filter_map(|differential| {
            let names = differential.diagnosis_names();
            if names.is_empty() {
                tracing::debug!("Differential {} has no named ranks, skipping", differential.id);
                return None;
            }
            let list = names
                .iter()
                .map(|name| format!("- {}", name))
                .collect::<Vec<_>>()
                .join("\n");

            let text = match kind {
                JudgeKind::Severity => list,
                JudgeKind::Semantic => {
                    let gold = differential
                        .gold_diagnosis
                        .as_deref()
                        .map(str::trim)
                        .filter(|g| !g.is_empty())?;
                    format!("Confirmed diagnosis: {}\nPredicted diagnoses:\n{}", gold, list)
                }
            };

            Some(WorkItem::new(differential.work_item_id(), text))
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessedJudgements {
    pub judged: Vec<JudgedDifferential>,
    pub failures: Vec<FailureDetail>,
}

/// Parses judge answers against the differentials they were built from.
/// Every rejected verdict is reported as a "Not judged" failure.
pub fn process_judgements(
    results: &[BatchResult],
    differentials: &[StoredDifferential],
    kind: JudgeKind,
) -> ProcessedJudgements {
    let by_id: HashMap<String, &StoredDifferential> =
        differentials.iter().map(|d| (d.work_item_id(), d)).collect();
    let mut processed = ProcessedJudgements::default();

    for result in results {
        let Some(text) = result.text() else {
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "API Error".to_string(),
                detail: result.error().map(String::from),
            });
            continue;
        };

        let Some(differential) = by_id.get(result.id()) else {
            tracing::warn!("Judge result {} does not match any differential", result.id());
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "Unknown differential".to_string(),
                detail: None,
            });
            continue;
        };

        let known = differential.diagnosis_names();
        let verdicts = match kind {
            JudgeKind::Severity => parse_severity_judgement(text, &known).map(Verdicts::Severity),
            JudgeKind::Semantic => parse_semantic_judgement(text, &known).map(Verdicts::Semantic),
        };
        let verdicts = match verdicts {
            Ok(verdicts) => verdicts,
            Err(e) => {
                tracing::warn!("Could not parse judge answer for {}: {}", result.id(), e);
                processed.failures.push(FailureDetail {
                    id: result.id().to_string(),
                    reason: "Parse error".to_string(),
                    detail: Some(e.to_string()),
                });
                continue;
            }
        };

        for unjudged in verdicts.not_judged() {
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "Not judged".to_string(),
                detail: Some(format!("{}: {}", unjudged.disease, unjudged.reason)),
            });
        }

        processed.judged.push(JudgedDifferential {
            differential_id: differential.id,
            verdicts,
        });
    }

    processed
}
