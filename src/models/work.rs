use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::usage::TokenUsage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub text: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Per-item outcome of a batch run.
///
/// Constructed only through [`BatchResult::ok`] and [`BatchResult::failed`],
/// so `success`, `text` and `error` can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    id: String,
    success: bool,
    text: Option<String>,
    error: Option<String>,
    usage: Option<TokenUsage>,
    #[serde(skip)]
    elapsed: Duration,
}

impl BatchResult {
    pub fn ok(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            text: Some(text.into()),
            error: None,
            usage: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            text: None,
            error: Some(error.into()),
            usage: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// A case to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCase {
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub gold_diagnosis: Option<String>,
}

/// A clinical case as stored in the case table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: i64,
    pub source: String,
    pub text: String,
    pub gold_diagnosis: Option<String>,
}

impl CaseRecord {
    pub fn work_item_id(&self) -> String {
        format!("case_{}", self.id)
    }

    pub fn to_work_item(&self) -> WorkItem {
        WorkItem::new(self.work_item_id(), self.text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors_keep_invariant() {
        let ok = BatchResult::ok("1", "ack:a");
        assert!(ok.success());
        assert_eq!(ok.text(), Some("ack:a"));
        assert!(ok.error().is_none());

        let failed = BatchResult::failed("2", "boom");
        assert!(!failed.success());
        assert!(failed.text().is_none());
        assert_eq!(failed.error(), Some("boom"));
    }

    #[test]
    fn test_case_work_item_id() {
        let case = CaseRecord {
            id: 42,
            source: "ramedis".into(),
            text: "fever, rash".into(),
            gold_diagnosis: Some("Measles".into()),
        };
        let item = case.to_work_item();
        assert_eq!(item.id, "case_42");
        assert_eq!(item.text, "fever, rash");
    }
}
