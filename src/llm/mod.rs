pub mod anthropic;
pub mod groq;
pub mod handler;
pub mod prompts;
pub mod provider;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use anthropic::{AnthropicConfig, AsyncAnthropicCaller, SyncAnthropicCaller};
pub use groq::{AsyncGroqCaller, GroqConfig, SyncGroqCaller};
pub use handler::ModelHandler;
pub use prompts::{OutputFormat, PromptRegistry, PromptTemplate, TextTemplate};
pub use provider::{CallParams, LlmCaller, ProviderConfig};
pub use registry::ConfigRegistry;
