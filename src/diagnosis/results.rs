use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::llm::OutputFormat;
use crate::models::{BatchResult, CaseRecord, DiagnosisRecord, RankedDiagnosis};
use crate::parsers::{extract_tagged_block, parse_differential, parse_json_differential};

/// Why an item produced nothing to store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    pub id: String,
    pub reason: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessedResults {
    pub records: Vec<DiagnosisRecord>,
    pub failures: Vec<FailureDetail>,
}

/// Turns raw answers into storable records.
///
/// A failed call, an answer without any ranked diagnosis, and an id that
/// matches none of `cases` each become a [`FailureDetail`].
pub fn process_results(
    results: &[BatchResult],
    cases: &[CaseRecord],
    model_id: i64,
    prompt_id: i64,
    format: OutputFormat,
) -> ProcessedResults {
    let case_ids: HashMap<String, i64> = cases.iter().map(|c| (c.work_item_id(), c.id)).collect();
    let mut processed = ProcessedResults::default();

    for result in results {
        let Some(text) = result.text() else {
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "API Error".to_string(),
                detail: result.error().map(String::from),
            });
            continue;
        };

        let Some(&case_id) = case_ids.get(result.id()) else {
            tracing::warn!("Result {} does not match any fetched case", result.id());
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "Unknown case".to_string(),
                detail: None,
            });
            continue;
        };

        let ranks = match parse_answer(text, format) {
            Ok(ranks) => ranks,
            Err(e) => {
                tracing::warn!("Could not parse answer for {}: {}", result.id(), e);
                processed.failures.push(FailureDetail {
                    id: result.id().to_string(),
                    reason: "Parse error".to_string(),
                    detail: Some(e.to_string()),
                });
                continue;
            }
        };

        if ranks.is_empty() {
            tracing::warn!("No ranked diagnoses found for {}, skipping", result.id());
            processed.failures.push(FailureDetail {
                id: result.id().to_string(),
                reason: "No ranked diagnoses".to_string(),
                detail: None,
            });
            continue;
        }

        processed.records.push(DiagnosisRecord {
            case_id,
            model_id,
            prompt_id,
            raw_response: text.to_string(),
            ranks,
        });
    }

    processed
}

/// Parses one answer according to the layout its template asked for.
/// Tagged layouts fall back to the whole answer when the tag is missing.
pub fn parse_answer(text: &str, format: OutputFormat) -> Result<Vec<RankedDiagnosis>> {
    match format {
        OutputFormat::Numbered => Ok(parse_differential(text)),
        OutputFormat::Tagged(tag) => {
            let block = extract_tagged_block(text, &[tag]).unwrap_or(text);
            Ok(parse_differential(block))
        }
        OutputFormat::JsonList(tag) => {
            let block = extract_tagged_block(text, &[tag]).unwrap_or(text);
            parse_json_differential(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<CaseRecord> {
        (1..=4)
            .map(|id| CaseRecord {
                id,
                source: "test".to_string(),
                text: format!("case {}", id),
                gold_diagnosis: None,
            })
            .collect()
    }

    #[test]
    fn test_process_results_sorts_successes_and_failures() {
        let results = vec![
            BatchResult::ok("case_1", "<top5>\n+1. Flu: fever\n+2. Cold: cough\n</top5>"),
            BatchResult::failed("case_2", "Model call error: boom"),
            BatchResult::ok("case_3", ""),
            BatchResult::ok("case_9", "+1. Flu"),
        ];

        let processed = process_results(&results, &cases(), 7, 3, OutputFormat::Tagged("top5"));

        assert_eq!(processed.records.len(), 1);
        let record = &processed.records[0];
        assert_eq!((record.case_id, record.model_id, record.prompt_id), (1, 7, 3));
        assert_eq!(record.ranks.len(), 2);
        assert_eq!(record.ranks[1].name.as_deref(), Some("Cold"));

        let reasons: Vec<_> = processed.failures.iter().map(|f| (f.id.as_str(), f.reason.as_str())).collect();
        assert_eq!(
            reasons,
            vec![
                ("case_2", "API Error"),
                ("case_3", "No ranked diagnoses"),
                ("case_9", "Unknown case"),
            ]
        );
        assert_eq!(processed.failures[0].detail.as_deref(), Some("Model call error: boom"));
    }

    #[test]
    fn test_json_answers() {
        let answer = r#"<5_diagnosis_output>[{"diagnosis": "Fabry disease", "description": "pain"}]</5_diagnosis_output>"#;
        let ranks = parse_answer(answer, OutputFormat::JsonList("5_diagnosis_output")).unwrap();
        assert_eq!(ranks[0].name.as_deref(), Some("Fabry disease"));

        let results = vec![BatchResult::ok("case_1", "<5_diagnosis_output>not json</5_diagnosis_output>")];
        let processed = process_results(&results, &cases(), 1, 1, OutputFormat::JsonList("5_diagnosis_output"));
        assert_eq!(processed.failures[0].reason, "Parse error");
    }

    #[test]
    fn test_missing_tag_falls_back_to_whole_answer() {
        let ranks = parse_answer("+1. Asthma: wheeze", OutputFormat::Tagged("top5")).unwrap();
        assert_eq!(ranks.len(), 1);
    }
}
