use anyhow::{anyhow, Result};
use std::env;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o";
pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub trait ProviderConfig {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self>
    where
        Self: Sized;

    /// Helper function to get environment variables with error handling
    fn get_env(key: &str, required: bool, default: Option<String>) -> Result<Option<String>> {
        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) if !required => Ok(default),
            Err(env::VarError::NotPresent) => Err(anyhow!(
                "Environment variable '{}' is required but not set.",
                key
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: OPENAI_MODEL.to_string(),
            embedding_model: OPENAI_EMBEDDING_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderConfig for OpenAiProviderConfig {
    fn from_env() -> Result<Self> {
        let api_key = Self::get_env("OPENAI_API_KEY", true, None)?
            .ok_or_else(|| anyhow!("OpenAI API key must be set"))?;

        let mut config = Self::new(api_key);
        if let Some(base_url) = Self::get_env("OPENAI_BASE_URL", false, None)? {
            config.base_url = base_url;
        }
        if let Some(model) = Self::get_env("OPENAI_MODEL", false, None)? {
            config.model = model;
        }
        if let Some(model) = Self::get_env("OPENAI_EMBEDDING_MODEL", false, None)? {
            config.embedding_model = model;
        }
        Ok(config)
    }
}
