use serde::{Deserialize, Serialize};

/// One entry of a parsed differential-diagnosis list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedDiagnosis {
    pub rank: Option<u32>,
    pub name: Option<String>,
    pub reasoning: Option<String>,
}

/// A parsed model answer for one case, ready to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub case_id: i64,
    pub model_id: i64,
    pub prompt_id: i64,
    pub raw_response: String,
    pub ranks: Vec<RankedDiagnosis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Rare,
    Critical,
    Severe,
    Moderate,
    Mild,
}

impl SeverityLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "rare" => Some(SeverityLevel::Rare),
            "critical" => Some(SeverityLevel::Critical),
            "severe" => Some(SeverityLevel::Severe),
            "moderate" => Some(SeverityLevel::Moderate),
            "mild" => Some(SeverityLevel::Mild),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityLevel::Rare => write!(f, "rare"),
            SeverityLevel::Critical => write!(f, "critical"),
            SeverityLevel::Severe => write!(f, "severe"),
            SeverityLevel::Moderate => write!(f, "moderate"),
            SeverityLevel::Mild => write!(f, "mild"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticCategory {
    ExactSynonym,
    BroadSynonym,
    ExactGroup,
    BroadGroup,
    RelatedGroup,
    NotRelated,
}

impl SemanticCategory {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "exact synonym" => Some(SemanticCategory::ExactSynonym),
            "broad synonym" => Some(SemanticCategory::BroadSynonym),
            "exact group of diseases" => Some(SemanticCategory::ExactGroup),
            "broad group of diseases" => Some(SemanticCategory::BroadGroup),
            "related disease group" => Some(SemanticCategory::RelatedGroup),
            "not related disease" => Some(SemanticCategory::NotRelated),
            _ => None,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SemanticCategory::ExactSynonym),
            2 => Some(SemanticCategory::BroadSynonym),
            3 => Some(SemanticCategory::ExactGroup),
            4 => Some(SemanticCategory::BroadGroup),
            5 => Some(SemanticCategory::RelatedGroup),
            6 => Some(SemanticCategory::NotRelated),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SemanticCategory::ExactSynonym => "Exact synonym",
            SemanticCategory::BroadSynonym => "Broad synonym",
            SemanticCategory::ExactGroup => "Exact group of diseases",
            SemanticCategory::BroadGroup => "Broad group of diseases",
            SemanticCategory::RelatedGroup => "Related disease group",
            SemanticCategory::NotRelated => "Not related disease",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            SemanticCategory::ExactSynonym => 1,
            SemanticCategory::BroadSynonym => 2,
            SemanticCategory::ExactGroup => 3,
            SemanticCategory::BroadGroup => 4,
            SemanticCategory::RelatedGroup => 5,
            SemanticCategory::NotRelated => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityJudgement {
    pub disease: String,
    pub severity: SeverityLevel,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticJudgement {
    pub diagnosis: String,
    pub category: SemanticCategory,
    pub reasoning: Option<String>,
}

/// An entry the judge returned that could not be accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unjudged {
    pub disease: String,
    pub reason: String,
}

/// Parsed output of a judge call: accepted entries plus the rejected ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judged<T> {
    pub judged: Vec<T>,
    pub not_judged: Vec<Unjudged>,
}

impl<T> Default for Judged<T> {
    fn default() -> Self {
        Self {
            judged: Vec::new(),
            not_judged: Vec::new(),
        }
    }
}

/// Semantic judge output for one case: the gold diagnosis it compared
/// against and the per-candidate verdicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvaluation {
    pub golden_diagnosis: String,
    pub evaluations: Judged<SemanticJudgement>,
}

/// Which question a judge model is asked about a stored differential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgeKind {
    /// Rate how severe each predicted disease is.
    Severity,
    /// Compare each predicted disease with the gold diagnosis.
    Semantic,
}

impl std::fmt::Display for JudgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JudgeKind::Severity => write!(f, "severity"),
            JudgeKind::Semantic => write!(f, "semantic"),
        }
    }
}

impl std::str::FromStr for JudgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "severity" => Ok(JudgeKind::Severity),
            "semantic" => Ok(JudgeKind::Semantic),
            other => Err(format!(
                "unknown judge '{}', expected severity or semantic",
                other
            )),
        }
    }
}

/// A differential already in the store, with what a judge needs to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDifferential {
    pub id: i64,
    pub case_id: i64,
    pub gold_diagnosis: Option<String>,
    pub ranks: Vec<RankedDiagnosis>,
}

impl StoredDifferential {
    pub fn work_item_id(&self) -> String {
        format!("dx_{}", self.id)
    }

    pub fn diagnosis_names(&self) -> Vec<String> {
        self.ranks.iter().filter_map(|r| r.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdicts {
    Severity(Judged<SeverityJudgement>),
    Semantic(SemanticEvaluation),
}

impl Verdicts {
    pub fn judged_count(&self) -> usize {
        match self {
            Verdicts::Severity(judged) => judged.judged.len(),
            Verdicts::Semantic(evaluation) => evaluation.evaluations.judged.len(),
        }
    }

    pub fn not_judged(&self) -> &[Unjudged] {
        match self {
            Verdicts::Severity(judged) => &judged.not_judged,
            Verdicts::Semantic(evaluation) => &evaluation.evaluations.not_judged,
        }
    }
}

/// Judge verdicts for one stored differential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgedDifferential {
    pub differential_id: i64,
    pub verdicts: Verdicts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_category_codes_round_trip_labels() {
        for code in 1..=6 {
            let category = SemanticCategory::from_code(code).unwrap();
            assert_eq!(category.code(), code);
            assert_eq!(SemanticCategory::from_label(category.label()), Some(category));
        }
        assert!(SemanticCategory::from_code(7).is_none());
    }

    #[test]
    fn test_judge_kind_from_str() {
        assert_eq!("Severity".parse::<JudgeKind>(), Ok(JudgeKind::Severity));
        assert_eq!(JudgeKind::Semantic.to_string(), "semantic");
        assert!("style".parse::<JudgeKind>().is_err());
    }
}
