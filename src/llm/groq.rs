//! Groq chat completions (OpenAI-compatible API).

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::llm::provider::{
    sanitize_api_error, transport_error, warn_if_key_missing, CallParams, LlmCaller,
    ProviderConfig,
};
use crate::llm::registry::ConfigRegistry;
use crate::models::{Completion, TokenUsage};
use crate::tracker::{catalog, TrackerLimits};

pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TOP_P: f32 = 1.0;
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// (alias, model, max_tokens, json_mode)
const GROQ_ALIASES: &[(&str, &str, u32, bool)] = &[
    ("llama3-70b-versatile", "llama-3.3-70b-versatile", 32_768, false),
    ("llama3-8b-instant", "llama-3.1-8b-instant", 8_192, false),
    ("llama-guard-3-8b", "llama-guard-3-8b", 4_096, false),
    ("llama3-70b", "llama3-70b-8192", 8_192, false),
    ("llama3-8b", "llama3-8b-8192", 8_192, true),
    ("mixtral-8x7b", "mixtral-8x7b-32768", 32_768, false),
    ("gemma2-9b", "gemma2-9b-it", 8_192, false),
    ("qwen-qwq-32b", "qwen-qwq-32b", 16_384, false),
    ("mistral-saba-24b", "mistral-saba-24b", 32_768, false),
    ("qwen-coder-32b", "qwen-2.5-coder-32b", 16_384, false),
    ("qwen-2.5-32b", "qwen-2.5-32b", 16_384, false),
    ("deepseek-qwen-32b", "deepseek-r1-distill-qwen-32b", 16_384, false),
    ("deepseek-llama-70b-specdec", "deepseek-r1-distill-llama-70b-specdec", 16_384, false),
    ("deepseek-llama-70b", "deepseek-r1-distill-llama-70b", 16_384, false),
    ("llama-3.3-70b-specdec", "llama-3.3-70b-specdec", 8_192, false),
    ("llama-3.2-1b", "llama-3.2-1b-preview", 8_192, false),
    ("llama-3.2-3b", "llama-3.2-3b-preview", 8_192, false),
    ("llama-3.2-11b-vision", "llama-3.2-11b-vision-preview", 8_192, false),
    ("llama-3.2-90b-vision", "llama-3.2-90b-vision-preview", 8_192, false),
];

pub fn register_defaults(registry: &mut ConfigRegistry) {
    for &(alias, model, max_tokens, json_mode) in GROQ_ALIASES {
        registry.register(alias, move || {
            Box::new(GroqConfig::new(alias, model, max_tokens).with_json_mode(json_mode))
        });
    }
}

#[derive(Debug, Clone)]
pub struct GroqConfig {
    alias: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    json_mode: bool,
    system_message: Option<String>,
}

impl GroqConfig {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        let alias = alias.into();
        warn_if_key_missing(&alias, GROQ_API_KEY_ENV);
        Self {
            alias,
            model: model.into(),
            max_tokens,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            json_mode: false,
            system_message: None,
        }
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }
}

impl ProviderConfig for GroqConfig {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "groq"
    }

    fn params(&self) -> CallParams {
        CallParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: Some(self.top_p),
            system_message: self.system_message.clone(),
            json_mode: self.json_mode,
            ..CallParams::new(&self.model, GROQ_API_BASE, GROQ_API_KEY_ENV)
        }
    }

    fn caller(&self) -> Box<dyn LlmCaller> {
        Box::new(SyncGroqCaller::new())
    }

    fn async_caller(&self) -> Box<dyn LlmCaller> {
        Box::new(AsyncGroqCaller::new())
    }

    fn tracker_limits(&self) -> TrackerLimits {
        let mut limits = catalog::groq_limits(&self.model);
        if limits.context_window == 0 {
            limits.context_window = self.max_tokens;
        }
        limits
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

fn build_request<'a>(params: &'a CallParams, prompt: &'a str) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = params.system_message.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: prompt,
    });

    ChatRequest {
        model: &params.model,
        messages,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        top_p: params.top_p,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        stop: params.stop.as_deref(),
        seed: params.seed,
        response_format: params.json_mode.then_some(ResponseFormat {
            r#type: "json_object",
        }),
    }
}

fn completion_from_body(status: StatusCode, body: &str) -> Result<Completion> {
    if !status.is_success() {
        return Err(Error::LLMApi(format!(
            "Groq API error ({}): {}",
            status,
            sanitize_api_error("Groq", GROQ_API_KEY_ENV, body)
        )));
    }

    let raw: serde_json::Value = serde_json::from_str(body)?;
    let response: ChatResponse = serde_json::from_value(raw.clone())
        .map_err(|e| Error::LLMApi(format!("Failed to parse Groq response: {}", e)))?;

    let usage = response
        .usage
        .ok_or_else(|| Error::LLMApi("Groq response is missing usage".to_string()))?;

    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| Error::LLMApi("Empty response from Groq".to_string()))?;

    Ok(Completion::new(
        raw,
        text,
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
        response.model,
    ))
}

fn endpoint(params: &CallParams) -> String {
    format!("{}/chat/completions", params.base_url.trim_end_matches('/'))
}

/// Blocking Groq caller for sequential runs.
#[derive(Default)]
pub struct SyncGroqCaller {
    client: OnceLock<reqwest::blocking::Client>,
}

impl SyncGroqCaller {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

#[async_trait]
impl LlmCaller for SyncGroqCaller {
    fn name(&self) -> &str {
        "SyncGroqCaller"
    }

    fn call(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        let api_key = params.validate()?;
        tracing::debug!("Sending blocking request to Groq model {}", params.model);

        let response = self
            .client()?
            .post(endpoint(params))
            .bearer_auth(api_key)
            .json(&build_request(params, prompt))
            .send()
            .map_err(|e| transport_error(e, HTTP_TIMEOUT))?;

        let status = response.status();
        let body = response.text()?;
        completion_from_body(status, &body)
    }

    async fn call_async(&self, _params: &CallParams, _prompt: &str) -> Result<Completion> {
        Err(Error::BlockingInAsync(self.name().to_string()))
    }
}

/// Non-blocking Groq caller used by the batch orchestrator.
#[derive(Default)]
pub struct AsyncGroqCaller {
    client: OnceCell<reqwest::Client>,
}

impl AsyncGroqCaller {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder()
                    .timeout(HTTP_TIMEOUT)
                    .build()
                    .map_err(Error::from)
            })
            .await
    }
}

#[async_trait]
impl LlmCaller for AsyncGroqCaller {
    fn name(&self) -> &str {
        "AsyncGroqCaller"
    }

    fn call(&self, _params: &CallParams, _prompt: &str) -> Result<Completion> {
        Err(Error::AsyncOnly(self.name().to_string()))
    }

    async fn call_async(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        let api_key = params.validate()?;
        tracing::debug!("Sending request to Groq model {}", params.model);

        let response = self
            .client()
            .await?
            .post(endpoint(params))
            .bearer_auth(api_key)
            .json(&build_request(params, prompt))
            .send()
            .await
            .map_err(|e| transport_error(e, HTTP_TIMEOUT))?;

        let status = response.status();
        let body = response.text().await?;
        completion_from_body(status, &body)
    }
}
