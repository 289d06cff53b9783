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

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 2000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

const ANTHROPIC_ALIASES: &[(&str, &str)] = &[
    ("c3opus", "claude-3-opus-20240229"),
    ("c35sonnet", "claude-3-5-sonnet-20240620"),
];

pub fn register_defaults(registry: &mut ConfigRegistry) {
    for &(alias, model) in ANTHROPIC_ALIASES {
        registry.register(alias, move || Box::new(AnthropicConfig::new(alias, model)));
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    alias: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_message: Option<String>,
}

impl AnthropicConfig {
    pub fn new(alias: impl Into<String>, model: impl Into<String>) -> Self {
        let alias = alias.into();
        warn_if_key_missing(&alias, ANTHROPIC_API_KEY_ENV);
        Self {
            alias,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            system_message: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }
}

impl ProviderConfig for AnthropicConfig {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn params(&self) -> CallParams {
        CallParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_message: self.system_message.clone(),
            ..CallParams::new(&self.model, ANTHROPIC_API_BASE, ANTHROPIC_API_KEY_ENV)
        }
    }

    fn caller(&self) -> Box<dyn LlmCaller> {
        Box::new(SyncAnthropicCaller::new())
    }

    fn async_caller(&self) -> Box<dyn LlmCaller> {
        Box::new(AsyncAnthropicCaller::new())
    }

    fn tracker_limits(&self) -> TrackerLimits {
        catalog::anthropic_limits(&self.model)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

fn build_request<'a>(params: &'a CallParams, prompt: &'a str) -> MessagesRequest<'a> {
    MessagesRequest {
        model: &params.model,
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
        system: params.system_message.as_deref(),
        top_p: params.top_p,
        stop_sequences: params.stop.as_deref(),
    }
}

fn completion_from_body(status: StatusCode, body: &str) -> Result<Completion> {
    if !status.is_success() {
        return Err(Error::LLMApi(format!(
            "Claude API error ({}): {}",
            status,
            sanitize_api_error("Anthropic", ANTHROPIC_API_KEY_ENV, body)
        )));
    }

    let raw: serde_json::Value = serde_json::from_str(body)?;
    let response: MessagesResponse = serde_json::from_value(raw.clone())
        .map_err(|e| Error::LLMApi(format!("Failed to parse Claude response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(Error::LLMApi(error.message));
    }

    let usage = response
        .usage
        .ok_or_else(|| Error::LLMApi("Claude response is missing usage".to_string()))?;

    let text = response
        .content
        .into_iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text)
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(Error::LLMApi("Empty response from Claude".to_string()));
    }

    Ok(Completion::new(
        raw,
        text,
        TokenUsage::new(usage.input_tokens, usage.output_tokens),
        response.model,
    ))
}

fn endpoint(params: &CallParams) -> String {
    format!("{}/messages", params.base_url.trim_end_matches('/'))
}

#[derive(Default)]
pub struct SyncAnthropicCaller {
    client: OnceLock<reqwest::blocking::Client>,
}

impl SyncAnthropicCaller {
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
impl LlmCaller for SyncAnthropicCaller {
    fn name(&self) -> &str {
        "SyncAnthropicCaller"
    }

    fn call(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        let api_key = params.validate()?;
        tracing::debug!("Sending blocking request to Claude model {}", params.model);

        let response = self
            .client()?
            .post(endpoint(params))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

#[derive(Default)]
pub struct AsyncAnthropicCaller {
    client: OnceCell<reqwest::Client>,
}

impl AsyncAnthropicCaller {
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
impl LlmCaller for AsyncAnthropicCaller {
    fn name(&self) -> &str {
        "AsyncAnthropicCaller"
    }

    fn call(&self, _params: &CallParams, _prompt: &str) -> Result<Completion> {
        Err(Error::AsyncOnly(self.name().to_string()))
    }

    async fn call_async(&self, params: &CallParams, prompt: &str) -> Result<Completion> {
        let api_key = params.validate()?;
        tracing::debug!("Sending request to Claude model {}", params.model);

        let response = self
            .client()
            .await?
            .post(endpoint(params))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&build_request(params, prompt))
            .send()
            .await
            .map_err(|e| transport_error(e, HTTP_TIMEOUT))?;

        let status = response.status();
        let body = response.text().await?;
        completion_from_body(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let params = AnthropicConfig::new("c3opus", "claude-3-opus-20240229").params();
        assert_eq!(params.max_tokens, 2000);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(endpoint(&params), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn test_build_request_body() {
        let config = AnthropicConfig::new("c35sonnet", "claude-3-5-sonnet-20240620")
            .with_system_message("Answer briefly.");
        let params = config.params();
        let body = serde_json::to_value(build_request(&params, "cough")).unwrap();
        assert_eq!(body["system"], "Answer briefly.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("stop_sequences").is_none());
    }

    #[test]
    fn test_completion_joins_text_blocks() {
        let body = r#"{
            "model": "claude-3-5-sonnet-20240620",
            "content": [
                {"type": "text", "text": "1. Asthma"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": ": wheeze"}
            ],
            "usage": {"input_tokens": 30, "output_tokens": 8}
        }"#;
        let completion = completion_from_body(StatusCode::OK, body).unwrap();
        assert_eq!(completion.text, "1. Asthma: wheeze");
        assert_eq!(completion.usage, TokenUsage::new(30, 8));
    }

    #[test]
    fn test_empty_content_is_error() {
        let body = r#"{"model": "m", "content": [], "usage": {"input_tokens": 1, "output_tokens": 0}}"#;
        assert!(completion_from_body(StatusCode::OK, body).is_err());
    }
}
