use crate::error::{to_env_var, ConfigError};
use crate::state::DEFAULT_MAX_SESSIONS;
use config::{Config, Environment};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use taskpilot::providers::configs::{
    OpenAiProviderConfig, OPENAI_BASE_URL, OPENAI_EMBEDDING_MODEL, OPENAI_MODEL,
};
use taskpilot::store::chroma::DEFAULT_COLLECTION;
use taskpilot::tasks::DEFAULT_TOP_K;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Sessions kept in memory before the least recently used one is dropped
    pub max_sessions: usize,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            base_url: self.base_url,
            api_key: self.api_key,
            model: self.model,
            embedding_model: self.embedding_model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Where retrieved documents come from. Without a url the server keeps an in-process store.
#[derive(Debug, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub url: Option<String>,
    pub collection: String,
    pub top_k: usize,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub store: StoreSettings,
    /// Working directory of the coding task
    pub workdir: PathBuf,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.max_sessions", DEFAULT_MAX_SESSIONS as u64)?
            .set_default("provider.base_url", OPENAI_BASE_URL)?
            .set_default("provider.model", OPENAI_MODEL)?
            .set_default("provider.embedding_model", OPENAI_EMBEDDING_MODEL)?
            .set_default("store.collection", DEFAULT_COLLECTION)?
            .set_default("store.top_k", DEFAULT_TOP_K as u64)?
            .set_default("workdir", ".")?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("TASKPILOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // serde reports "missing field `api_key`" without the section
                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&qualify(field)),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn missing_field(error: &str) -> Option<&str> {
    let rest = &error[error.find("missing field `")? + "missing field `".len()..];
    rest.split('`').next()
}

/// The only required settings live in the provider section
fn qualify(field: &str) -> String {
    match field {
        "api_key" => "provider.api_key".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("TASKPILOT_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("TASKPILOT_PROVIDER__API_KEY", "test-key");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.max_sessions, 1000);
        assert_eq!(settings.store.url, None);
        assert_eq!(settings.store.collection, "task2");
        assert_eq!(settings.store.top_k, 20);

        let config = settings.provider.into_config();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, None);
        assert_eq!(config.max_tokens, None);

        env::remove_var("TASKPILOT_PROVIDER__API_KEY");
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("TASKPILOT_SERVER__PORT", "8080");
        env::set_var("TASKPILOT_SERVER__MAX_SESSIONS", "50");
        env::set_var("TASKPILOT_PROVIDER__API_KEY", "test-key");
        env::set_var("TASKPILOT_PROVIDER__BASE_URL", "http://localhost:11434/v1");
        env::set_var("TASKPILOT_PROVIDER__MODEL", "gpt-4o-mini");
        env::set_var("TASKPILOT_PROVIDER__TEMPERATURE", "0.8");
        env::set_var("TASKPILOT_STORE__URL", "http://localhost:8000");
        env::set_var("TASKPILOT_STORE__TOP_K", "5");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.max_sessions, 50);
        assert_eq!(settings.store.url.as_deref(), Some("http://localhost:8000"));
        assert_eq!(settings.store.top_k, 5);

        let config = settings.provider.into_config();
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, Some(0.8));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        let err = Settings::new().unwrap_err();
        match err {
            ConfigError::MissingEnvVar { env_var } => {
                assert_eq!(env_var, "TASKPILOT_PROVIDER__API_KEY")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_sessions: 10,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
