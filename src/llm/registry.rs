use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::llm::provider::ProviderConfig;
use crate::llm::{anthropic, groq};

type ConfigFactory = Box<dyn Fn() -> Box<dyn ProviderConfig> + Send + Sync>;

/// Alias to config factory lookup. Each lookup builds a fresh config.
#[derive(Default)]
pub struct ConfigRegistry {
    factories: BTreeMap<String, ConfigFactory>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every Groq and Anthropic alias.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        groq::register_defaults(&mut registry);
        anthropic::register_defaults(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, alias: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn ProviderConfig> + Send + Sync + 'static,
    {
        let alias = alias.into();
        if self.factories.insert(alias.clone(), Box::new(factory)).is_some() {
            tracing::debug!("Replacing config registered for alias '{}'", alias);
        }
        self
    }

    pub fn create(&self, alias: &str) -> Result<Box<dyn ProviderConfig>> {
        match self.factories.get(alias) {
            Some(factory) => Ok(factory()),
            None => Err(Error::UnknownAlias {
                alias: alias.to_string(),
                available: self.aliases().join(", "),
            }),
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.factories.contains_key(alias)
    }

    /// Registered aliases in sorted order.
    pub fn aliases(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
