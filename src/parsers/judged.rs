use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{
    Judged, SemanticCategory, SemanticEvaluation, SemanticJudgement, SeverityJudgement,
    SeverityLevel, Unjudged,
};
use crate::parsers::json::extract_json;

#[derive(Deserialize)]
struct SeverityResponse {
    severity_evaluations: Vec<SeverityEntry>,
}

#[derive(Deserialize)]
struct SeverityEntry {
    #[serde(default)]
    disease: String,
    #[serde(default)]
    severity: String,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct SemanticResponse {
    #[serde(default)]
    golden_diagnosis: String,
    #[serde(default)]
    differential_diagnoses: Vec<SemanticEntry>,
}

#[derive(Deserialize)]
struct SemanticEntry {
    #[serde(default)]
    diagnosis: String,
    category: Option<CategoryEntry>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct CategoryEntry {
    #[serde(default)]
    label: String,
}

fn decode<'a, T: Deserialize<'a>>(raw: &'a str, what: &str) -> Result<T> {
    let json = extract_json(raw)?;
    serde_json::from_str(json)
        .map_err(|e| Error::ParseError(format!("Invalid {} response: {}", what, e)))
}

/// `known` holds the diagnoses that were sent to the judge; entries naming
/// anything else are rejected. An empty slice accepts every disease.
fn is_known(known: &[String], disease: &str) -> bool {
    known.is_empty() || known.iter().any(|k| k.eq_ignore_ascii_case(disease.trim()))
}

/// Parses a severity judge response.
///
/// A severity written as `"a|b"` falls back to `b` when `a` is not a valid
/// level.
pub fn parse_severity_judgement(raw: &str, known: &[String]) -> Result<Judged<SeverityJudgement>> {
    let response: SeverityResponse = decode(raw, "severity")?;
    let mut result = Judged::default();

    for entry in response.severity_evaluations {
        let disease = entry.disease.trim().to_string();
        if disease.is_empty() {
            result.not_judged.push(Unjudged {
                disease,
                reason: "Missing disease".to_string(),
            });
            continue;
        }
        if !is_known(known, &disease) {
            tracing::debug!("Judge returned a disease that was not predicted: {}", disease);
            result.not_judged.push(Unjudged {
                disease,
                reason: "Not among the predicted diagnoses".to_string(),
            });
            continue;
        }

        let severity = SeverityLevel::parse(&entry.severity).or_else(|| {
            entry
                .severity
                .split('|')
                .nth(1)
                .and_then(SeverityLevel::parse)
        });

        match severity {
            Some(severity) => result.judged.push(SeverityJudgement {
                disease,
                severity,
                reasoning: entry.reasoning,
            }),
            None => result.not_judged.push(Unjudged {
                disease,
                reason: format!("Unknown severity '{}'", entry.severity),
            }),
        }
    }

    Ok(result)
}

/// Parses a semantic-similarity judge response.
pub fn parse_semantic_judgement(raw: &str, known: &[String]) -> Result<SemanticEvaluation> {
    let response: SemanticResponse = decode(raw, "semantic")?;
    let mut evaluations = Judged::default();

    for entry in response.differential_diagnoses {
        let disease = entry.diagnosis.trim().to_string();
        let label = entry
            .category
            .map(|c| c.label)
            .filter(|label| !label.trim().is_empty());

        let Some(label) = label.filter(|_| !disease.is_empty()) else {
            evaluations.not_judged.push(Unjudged {
                disease,
                reason: "Missing diagnosis or category information".to_string(),
            });
            continue;
        };

        if !is_known(known, &disease) {
            evaluations.not_judged.push(Unjudged {
                disease,
                reason: "Not among the predicted diagnoses".to_string(),
            });
            continue;
        }

        match SemanticCategory::from_label(&label) {
            Some(category) => evaluations.judged.push(SemanticJudgement {
                diagnosis: disease,
                category,
                reasoning: entry.reasoning,
            }),
            None => evaluations.not_judged.push(Unjudged {
                disease,
                reason: format!("Unknown category '{}'", label),
            }),
        }
    }

    Ok(SemanticEvaluation {
        golden_diagnosis: response.golden_diagnosis,
        evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_judgement() {
        let raw = r#"```json
{"severity_evaluations": [
    {"disease": "Measles", "severity": "Moderate", "reasoning": "self-limiting"},
    {"disease": "Encephalitis", "severity": "unclear|critical"},
    {"disease": "Roseola", "severity": "benign"},
    {"disease": "Dengue", "severity": "severe"}
]}
```"#;
        let known = vec![
            "measles".to_string(),
            "Encephalitis".to_string(),
            "Roseola".to_string(),
        ];
        let judged = parse_severity_judgement(raw, &known).unwrap();

        assert_eq!(judged.judged.len(), 2);
        assert_eq!(judged.judged[0].severity, SeverityLevel::Moderate);
        assert_eq!(judged.judged[1].severity, SeverityLevel::Critical);
        assert_eq!(judged.not_judged.len(), 2);
        assert!(judged.not_judged[0].reason.contains("benign"));
        assert_eq!(judged.not_judged[1].disease, "Dengue");
    }

    #[test]
    fn test_semantic_judgement() {
        let raw = r#"{
            "golden_diagnosis": "Type 1 diabetes",
            "differential_diagnoses": [
                {"diagnosis": "Diabetes mellitus type 1", "category": {"code": 1, "label": "Exact synonym"}},
                {"diagnosis": "Diabetes", "category": {"code": 4, "label": "Broad group of diseases"}, "reasoning": "parent"},
                {"diagnosis": "Hyperthyroidism", "category": {"code": 9, "label": "Cousin"}},
                {"diagnosis": "Addison disease"}
            ]
        }"#;
        let evaluation = parse_semantic_judgement(raw, &[]).unwrap();

        assert_eq!(evaluation.golden_diagnosis, "Type 1 diabetes");
        let judged = &evaluation.evaluations.judged;
        assert_eq!(judged.len(), 2);
        assert_eq!(judged[0].category.code(), 1);
        assert_eq!(judged[1].category, SemanticCategory::BroadGroup);
        assert_eq!(evaluation.evaluations.not_judged.len(), 2);
    }

    #[test]
    fn test_decode_error_fails_item() {
        let err = parse_semantic_judgement("The answer is diabetes.", &[]).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));

        let err = parse_severity_judgement(r#"{"wrong_key": []}"#, &[]).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }
}
