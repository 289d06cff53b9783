use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::Completion;
use crate::tracker::TrackerLimits;

/// Issues a single chat completion against one provider family.
///
/// Callers hold no per-model state: everything model specific arrives in
/// [`CallParams`]. HTTP clients are built on first use and reused.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    fn name(&self) -> &str;

    /// Blocking call. Async-only callers return [`Error::AsyncOnly`].
    fn call(&self, params: &CallParams, prompt: &str) -> Result<Completion>;

    /// Non-blocking call. Blocking callers return [`Error::BlockingInAsync`].
    async fn call_async(&self, params: &CallParams, prompt: &str) -> Result<Completion>;
}

/// Static configuration for one model alias.
pub trait ProviderConfig: Send + Sync + fmt::Debug {
    fn alias(&self) -> &str;

    fn model(&self) -> &str;

    fn provider(&self) -> &'static str;

    /// API-ready parameters. The API key is read from the environment here,
    /// not when the config is built.
    fn params(&self) -> CallParams;

    fn caller(&self) -> Box<dyn LlmCaller>;

    fn async_caller(&self) -> Box<dyn LlmCaller>;

    /// Limits and prices of the tracker keyed by [`ProviderConfig::model`].
    fn tracker_limits(&self) -> TrackerLimits;
}

#[derive(Clone, PartialEq)]
pub struct CallParams {
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub seed: Option<u64>,
    pub system_message: Option<String>,
    pub json_mode: bool,
}

impl CallParams {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>, api_key_env: &str) -> Self {
        Self {
            model: model.into(),
            api_key: read_api_key(api_key_env),
            api_key_env: api_key_env.to_string(),
            base_url: base_url.into(),
            temperature: 0.0,
            max_tokens: 1024,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            seed: None,
            system_message: None,
            json_mode: false,
        }
    }

    /// Checks that everything needed for a request is present and returns
    /// the API key.
    pub fn validate(&self) -> Result<&str> {
        let mut missing = Vec::new();
        if self.model.trim().is_empty() {
            missing.push("model".to_string());
        }
        if self.max_tokens == 0 {
            missing.push("max_tokens".to_string());
        }
        let key = self.api_key.as_deref().filter(|k| !k.trim().is_empty());
        if key.is_none() {
            missing.push(format!("api_key ({})", self.api_key_env));
        }

        match key {
            Some(key) if missing.is_empty() => Ok(key),
            _ => Err(Error::MissingParam(missing.join(", "))),
        }
    }
}

impl fmt::Debug for CallParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallParams")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_deref().map(mask_api_key))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_mode", &self.json_mode)
            .finish_non_exhaustive()
    }
}

/// Maps a failed send to a typed error; client-side timeouts keep their limit.
pub fn transport_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(e)
    }
}

pub fn read_api_key(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|k| !k.trim().is_empty())
}

/// Aliases already warned about, so configs built per call log only once.
static WARNED_ALIASES: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Logs a warning the first time a config for `alias` is built without its
/// key. The run still starts; the first call for that alias fails instead.
/// Returns whether a warning was emitted.
pub fn warn_if_key_missing(alias: &str, env_var: &str) -> bool {
    if read_api_key(env_var).is_some() {
        return false;
    }
    if !WARNED_ALIASES.lock().insert(alias.to_string()) {
        return false;
    }
    tracing::warn!(
        "{} is not set; calls to model '{}' will fail until it is provided",
        env_var,
        alias
    );
    true
}

pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Strips anything that could echo credentials back from a provider error
/// body before it ends up in a `BatchResult`.
pub fn sanitize_api_error(provider: &str, key_env: &str, body: &str) -> String {
    let lower = body.to_lowercase();

    if lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("invalid key")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
    {
        return format!("{} authentication error. Please check {}.", provider, key_env);
    }

    if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("quota") {
        return format!("{} rate limit exceeded", provider);
    }

    if body.len() < 300 && !body.contains("gsk_") && !body.contains("sk-ant") {
        return body.to_string();
    }

    format!("{} returned an error", provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_key(key: Option<&str>) -> CallParams {
        CallParams {
            api_key: key.map(String::from),
            ..CallParams::new("llama3-70b-8192", "http://localhost", "DXBENCH_TEST_UNSET_KEY")
        }
    }

    #[test]
    fn test_validate_reports_missing_key() {
        let err = params_with_key(None).validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("DXBENCH_TEST_UNSET_KEY"));

        let params = params_with_key(Some("gsk_abcdefghijkl"));
        assert_eq!(params.validate().unwrap(), "gsk_abcdefghijkl");
    }

    #[test]
    fn test_debug_masks_key() {
        let params = params_with_key(Some("gsk_abcdefghijkl"));
        let rendered = format!("{:?}", params);
        assert!(rendered.contains("gsk_...ijkl"));
        assert!(!rendered.contains("abcdefgh"));
    }

    #[test]
    fn test_mask_non_ascii_key() {
        assert_eq!(mask_api_key("kéé1234567890"), "kéé1...7890");
        assert_eq!(mask_api_key("ééééé"), "****");
    }

    #[test]
    fn test_missing_key_warns_once_per_alias() {
        assert!(warn_if_key_missing("warn-once-a", "DXBENCH_TEST_UNSET_KEY"));
        assert!(!warn_if_key_missing("warn-once-a", "DXBENCH_TEST_UNSET_KEY"));
        assert!(warn_if_key_missing("warn-once-b", "DXBENCH_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_sanitize_api_error() {
        assert_eq!(
            sanitize_api_error("Groq", "GROQ_API_KEY", "Invalid API Key provided"),
            "Groq authentication error. Please check GROQ_API_KEY."
        );
        assert_eq!(
            sanitize_api_error("Groq", "GROQ_API_KEY", "Rate limit reached for model"),
            "Groq rate limit exceeded"
        );
        assert_eq!(
            sanitize_api_error("Groq", "GROQ_API_KEY", "model not found"),
            "model not found"
        );
    }
}
