use super::rate_tracker::{PriceScale, TrackerLimits};

struct CatalogEntry {
    model: &'static str,
    rpm: u32,
    rpd: u32,
    tpm: u64,
    tpd: u64,
    prompt_price: f64,
    completion_price: f64,
    context_window: u32,
}

impl CatalogEntry {
    fn limits(&self) -> TrackerLimits {
        TrackerLimits {
            rpm: self.rpm,
            rpd: self.rpd,
            tpm: self.tpm,
            tpd: self.tpd,
            prompt_price: self.prompt_price,
            completion_price: self.completion_price,
            price_scale: PriceScale::PerMillion,
            context_window: self.context_window,
        }
    }
}

// Free-tier limits; prices in USD per million tokens. tpd 0 = no daily token cap.
const GROQ_MODELS: &[CatalogEntry] = &[
    // Llama
    CatalogEntry { model: "llama3-8b-8192", rpm: 30, rpd: 14_400, tpm: 6_000, tpd: 500_000, prompt_price: 0.05, completion_price: 0.08, context_window: 8_192 },
    CatalogEntry { model: "llama3-70b-8192", rpm: 30, rpd: 14_400, tpm: 6_000, tpd: 500_000, prompt_price: 0.59, completion_price: 0.79, context_window: 8_192 },
    CatalogEntry { model: "llama-3.1-8b-instant", rpm: 30, rpd: 14_400, tpm: 6_000, tpd: 500_000, prompt_price: 0.05, completion_price: 0.08, context_window: 8_192 },
    CatalogEntry { model: "llama-3.2-1b-preview", rpm: 30, rpd: 7_000, tpm: 7_000, tpd: 500_000, prompt_price: 0.04, completion_price: 0.04, context_window: 8_192 },
    CatalogEntry { model: "llama-3.2-3b-preview", rpm: 30, rpd: 7_000, tpm: 7_000, tpd: 500_000, prompt_price: 0.06, completion_price: 0.06, context_window: 8_192 },
    CatalogEntry { model: "llama-3.2-11b-vision-preview", rpm: 30, rpd: 7_000, tpm: 7_000, tpd: 500_000, prompt_price: 0.0, completion_price: 0.0, context_window: 8_192 },
    CatalogEntry { model: "llama-3.2-90b-vision-preview", rpm: 15, rpd: 3_500, tpm: 7_000, tpd: 250_000, prompt_price: 0.0, completion_price: 0.0, context_window: 8_192 },
    CatalogEntry { model: "llama-3.3-70b-specdec", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 100_000, prompt_price: 0.59, completion_price: 0.99, context_window: 8_192 },
    CatalogEntry { model: "llama-3.3-70b-versatile", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 100_000, prompt_price: 0.59, completion_price: 0.79, context_window: 8_192 },
    CatalogEntry { model: "llama-guard-3-8b", rpm: 30, rpd: 14_400, tpm: 15_000, tpd: 500_000, prompt_price: 0.20, completion_price: 0.20, context_window: 8_192 },
    // Gemma
    CatalogEntry { model: "gemma2-9b-it", rpm: 30, rpd: 14_400, tpm: 15_000, tpd: 500_000, prompt_price: 0.20, completion_price: 0.20, context_window: 8_192 },
    // Mistral
    CatalogEntry { model: "mistral-saba-24b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.79, completion_price: 0.79, context_window: 32_768 },
    CatalogEntry { model: "mixtral-8x7b-32768", rpm: 30, rpd: 14_400, tpm: 6_000, tpd: 500_000, prompt_price: 0.24, completion_price: 0.24, context_window: 32_768 },
    // Qwen
    CatalogEntry { model: "qwen-2.5-32b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.79, completion_price: 0.79, context_window: 32_768 },
    CatalogEntry { model: "qwen-2.5-coder-32b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.79, completion_price: 0.79, context_window: 32_768 },
    CatalogEntry { model: "qwen-qwq-32b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.29, completion_price: 0.39, context_window: 32_768 },
    // DeepSeek
    CatalogEntry { model: "deepseek-r1-distill-llama-70b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.75, completion_price: 0.99, context_window: 32_768 },
    CatalogEntry { model: "deepseek-r1-distill-qwen-32b", rpm: 30, rpd: 1_000, tpm: 6_000, tpd: 0, prompt_price: 0.69, completion_price: 0.69, context_window: 32_768 },
];

const ANTHROPIC_MODELS: &[CatalogEntry] = &[
    CatalogEntry { model: "claude-3-opus-20240229", rpm: 50, rpd: 0, tpm: 20_000, tpd: 0, prompt_price: 15.0, completion_price: 75.0, context_window: 200_000 },
    CatalogEntry { model: "claude-3-5-sonnet-20240620", rpm: 50, rpd: 0, tpm: 40_000, tpd: 0, prompt_price: 3.0, completion_price: 15.0, context_window: 200_000 },
    CatalogEntry { model: "claude-3-haiku-20240307", rpm: 50, rpd: 0, tpm: 50_000, tpd: 0, prompt_price: 0.25, completion_price: 1.25, context_window: 200_000 },
];

/// Provider-wide Groq limits, applied when a model has no entry of its own.
const GROQ_PROVIDER_RPM: u32 = 60;
const GROQ_PROVIDER_RPD: u32 = 20_000;

pub fn groq_limits(model: &str) -> TrackerLimits {
    lookup(GROQ_MODELS, model).unwrap_or_else(|| TrackerLimits {
        rpm: GROQ_PROVIDER_RPM,
        rpd: GROQ_PROVIDER_RPD,
        ..generic_limits(model)
    })
}

pub fn anthropic_limits(model: &str) -> TrackerLimits {
    lookup(ANTHROPIC_MODELS, model).unwrap_or_else(|| generic_limits(model))
}

fn lookup(table: &[CatalogEntry], model: &str) -> Option<TrackerLimits> {
    table
        .iter()
        .find(|entry| entry.model == model)
        .map(CatalogEntry::limits)
}

/// Fallback for models missing from the catalog: no rate limits, price
/// guessed from the parameter count in the model name.
pub fn generic_limits(model: &str) -> TrackerLimits {
    let name = model.to_lowercase();
    let (prompt_price, completion_price) = if name.contains("70b") {
        (0.70, 2.10)
    } else if name.contains("90b") {
        (0.90, 2.70)
    } else {
        (0.20, 0.60)
    };

    TrackerLimits {
        prompt_price,
        completion_price,
        ..TrackerLimits::default()
    }
}

pub fn known_models() -> impl Iterator<Item = &'static str> {
    GROQ_MODELS
        .iter()
        .chain(ANTHROPIC_MODELS.iter())
        .map(|entry| entry.model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup() {
        let limits = groq_limits("llama3-70b-8192");
        assert_eq!(limits.rpm, 30);
        assert_eq!(limits.tpm, 6_000);
        assert_eq!(limits.prompt_price, 0.59);
        assert_eq!(limits.context_window, 8_192);

        let claude = anthropic_limits("claude-3-5-sonnet-20240620");
        assert_eq!(claude.completion_price, 15.0);
        assert_eq!(claude.rpd, 0);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let limits = groq_limits("some-new-70b-model");
        assert_eq!(limits.rpm, GROQ_PROVIDER_RPM);
        assert_eq!(limits.prompt_price, 0.70);
        assert_eq!(limits.tpm, 0);

        let small = generic_limits("tiny-1b");
        assert_eq!(small.completion_price, 0.60);
    }

    #[test]
    fn test_known_models_are_unique() {
        let mut names: Vec<_> = known_models().collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
