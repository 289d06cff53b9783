//! In-process provider used by unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::llm::provider::{CallParams, LlmCaller, ProviderConfig};
use crate::llm::{ConfigRegistry, ModelHandler};
use crate::models::{Completion, TokenUsage};
use crate::tracker::{TrackerLimits, TrackerRegistry};

pub type Responder = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Echoes every prompt back as `ack:<prompt>`.
pub fn ack() -> Responder {
    Arc::new(|prompt: &str| Ok(format!("ack:{}", prompt)))
}

/// Like [`ack`] but fails for prompts containing `needle`.
pub fn ack_failing_on(needle: &'static str) -> Responder {
    Arc::new(move |prompt: &str| {
        if prompt.contains(needle) {
            Err(Error::LLMApi(format!("simulated failure for '{}'", prompt)))
        } else {
            Ok(format!("ack:{}", prompt))
        }
    })
}

#[derive(Clone)]
pub struct StubConfig {
    pub alias: String,
    pub model: String,
    pub limits: TrackerLimits,
    pub delay: Duration,
    pub responder: Responder,
}

impl std::fmt::Debug for StubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubConfig")
            .field("alias", &self.alias)
            .field("model", &self.model)
            .finish()
    }
}

impl StubConfig {
    pub fn new(alias: &str, responder: Responder) -> Self {
        Self {
            alias: alias.to_string(),
            model: format!("{}-model", alias),
            limits: TrackerLimits::default(),
            delay: Duration::ZERO,
            responder,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_limits(mut self, limits: TrackerLimits) -> Self {
        self.limits = limits;
        self
    }

    fn stub_caller(&self) -> Box<dyn LlmCaller> {
        Box::new(StubCaller {
            delay: self.delay,
            responder: self.responder.clone(),
        })
    }
}

impl ProviderConfig for StubConfig {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "stub"
    }

    fn params(&self) -> CallParams {
        CallParams {
            api_key: Some("stub-key".to_string()),
            ..CallParams::new(&self.model, "http://stub.invalid", "DXBENCH_STUB_KEY")
        }
    }

    fn caller(&self) -> Box<dyn LlmCaller> {
        self.stub_caller()
    }

    fn async_caller(&self) -> Box<dyn LlmCaller> {
        self.stub_caller()
    }

    fn tracker_limits(&self) -> TrackerLimits {
        self.limits.clone()
    }
}

pub struct StubCaller {
    delay: Duration,
    responder: Responder,
}

impl StubCaller {
    fn complete(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        let text = (self.responder)(prompt)?;
        let usage = TokenUsage::new(prompt.len() as u64, text.len() as u64);
        Ok(Completion::new(
            serde_json::json!({ "text": text }),
            text,
            usage,
            params.model.clone(),
        ))
    }
}

#[async_trait]
impl LlmCaller for StubCaller {
    fn name(&self) -> &str {
        "StubCaller"
    }

    fn call(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        std::thread::sleep(self.delay);
        self.complete(params, prompt)
    }

    async fn call_async(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        tokio::time::sleep(self.delay).await;
        self.complete(params, prompt)
    }
}

/// Handler with a fresh registry holding only `config`.
pub fn handler_with(config: StubConfig) -> ModelHandler {
    let mut configs = ConfigRegistry::new();
    configs.register(config.alias.clone(), move || Box::new(config.clone()));
    ModelHandler::new(configs, TrackerRegistry::new())
}
