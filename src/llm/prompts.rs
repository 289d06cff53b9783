use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

const DESCRIPTION_SLOT: &str = "{description}";

/// How a template asks the model to lay out its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `+1. Name: reasoning` lines.
    Numbered,
    /// Numbered lines wrapped in `<tag>...</tag>`.
    Tagged(&'static str),
    /// JSON array of `{diagnosis, description}` wrapped in `<tag>...</tag>`.
    JsonList(&'static str),
}

pub trait PromptTemplate: Send + Sync {
    fn alias(&self) -> &str;

    fn output_format(&self) -> OutputFormat;

    fn to_prompt(&self, description: &str) -> Result<String>;
}

/// Template with a single `{description}` slot.
#[derive(Debug, Clone)]
pub struct TextTemplate {
    alias: String,
    body: String,
    format: OutputFormat,
}

impl TextTemplate {
    pub fn new(alias: impl Into<String>, body: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            alias: alias.into(),
            body: body.into(),
            format,
        }
    }
}

impl PromptTemplate for TextTemplate {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn output_format(&self) -> OutputFormat {
        self.format
    }

    fn to_prompt(&self, description: &str) -> Result<String> {
        if !self.body.contains(DESCRIPTION_SLOT) {
            return Err(Error::PromptTemplate(format!(
                "template '{}' has no {} slot",
                self.alias, DESCRIPTION_SLOT
            )));
        }
        Ok(self.body.replace(DESCRIPTION_SLOT, description.trim()))
    }
}

const STANDARD_PROMPT: &str = r#"Act as a physician working up a new patient. List the diseases that could explain the description below, each with a short explanation.
Start every entry on a new line with '+' and its rank ("+1.", "+2.", ...), then the disease name followed by ':'. Never start an entry with '-'.
For each disease, say which of the patient's symptoms it explains and which it does not.
Symptoms: {description}"#;

const RARE_PROMPT: &str = r#"Act as a physician specialised in rare diseases. List the rare diseases that could explain the description below, each with a short explanation.
Start every entry on a new line with '+' and its rank ("+1.", "+2.", ...), then the disease name followed by ':'. Never start an entry with '-'.
For each disease, say which of the patient's symptoms it explains and which it does not.
Symptoms: {description}"#;

const IMPROVED_PROMPT: &str = r#"You are a diagnostic assistant. Analyse the patient description and produce the five most likely diagnoses.
First reason inside <thinking></thinking>: key symptoms, candidate diagnoses and what further tests would help.
Then list the diagnoses inside <top5></top5>, one per line, as "+1. Name: matching symptoms; expected symptoms that are missing".
Use '+' for entries, never '-'.
<patient_description>
{description}
</patient_description>"#;

const JSON_PROMPT: &str = r#"You are a physician generating five diagnostic hypotheses for the patient below.
Return a JSON array inside <5_diagnosis_output></5_diagnosis_output>. Each element has the keys
"diagnosis", "description", "symptoms_in_common" and "symptoms_not_in_common", ordered from most to least likely.
<patient_description>
{description}
</patient_description>"#;

/// Prompt templates keyed by alias.
#[derive(Clone, Default)]
pub struct PromptRegistry {
    templates: BTreeMap<String, Arc<dyn PromptTemplate>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(TextTemplate::new("dxgpt_standard", STANDARD_PROMPT, OutputFormat::Numbered))
            .register(TextTemplate::new("dxgpt_rare", RARE_PROMPT, OutputFormat::Numbered))
            .register(TextTemplate::new(
                "dxgpt_improved",
                IMPROVED_PROMPT,
                OutputFormat::Tagged("top5"),
            ))
            .register(TextTemplate::new(
                "dxgpt_json",
                JSON_PROMPT,
                OutputFormat::JsonList("5_diagnosis_output"),
            ));
        registry
    }

    pub fn register<T: PromptTemplate + 'static>(&mut self, template: T) -> &mut Self {
        self.templates
            .insert(template.alias().to_string(), Arc::new(template));
        self
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn PromptTemplate>> {
        self.templates.get(alias).cloned().ok_or_else(|| {
            Error::PromptTemplate(format!(
                "unknown prompt alias '{}'. Available prompts: {}",
                alias,
                self.aliases().join(", ")
            ))
        })
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates_fill_description() {
        let registry = PromptRegistry::with_defaults();
        for alias in registry.aliases() {
            let prompt = registry.get(alias).unwrap().to_prompt("  fever, rash ").unwrap();
            assert!(prompt.contains("fever, rash"), "{}", alias);
            assert!(!prompt.contains(DESCRIPTION_SLOT));
        }
    }

    #[test]
    fn test_output_formats() {
        let registry = PromptRegistry::with_defaults();
        assert_eq!(
            registry.get("dxgpt_improved").unwrap().output_format(),
            OutputFormat::Tagged("top5")
        );
        assert_eq!(
            registry.get("dxgpt_standard").unwrap().output_format(),
            OutputFormat::Numbered
        );
    }

    #[test]
    fn test_template_without_slot() {
        let template = TextTemplate::new("broken", "no slot here", OutputFormat::Numbered);
        let err = template.to_prompt("x").unwrap_err();
        assert!(err.to_string().starts_with("Prompt generation error"));
    }

    #[test]
    fn test_unknown_prompt_alias() {
        let err = PromptRegistry::with_defaults().get("nope").err().unwrap();
        assert!(err.to_string().contains("dxgpt_rare"));
    }
}
