use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the configuration key `field`
pub fn to_env_var(field: &str) -> String {
    format!("TASKPILOT_{}", field.to_uppercase().replace('.', "__"))
}
