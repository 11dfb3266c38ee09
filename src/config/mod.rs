//! Application configuration

pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use prompts::PromptTemplate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// "gemini", "openai" or "ollama"
    pub llm_provider: String,
    /// Model override; each provider has its own default
    pub llm_model: Option<String>,
    pub llm_timeout_secs: u64,
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: Option<String>,
    /// TOML file replacing the builtin medical prompt
    pub prompt_file: Option<PathBuf>,
    /// Bearer token for the admin endpoints; admin is disabled when unset
    pub admin_token: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: parse_or("PORT", get("PORT"), 5000)?,
            data_dir: get("MEDBOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            llm_provider: get("MEDBOT_LLM_PROVIDER")
                .map(|p| p.to_lowercase())
                .unwrap_or_else(|| "gemini".into()),
            llm_model: get("MEDBOT_MODEL"),
            llm_timeout_secs: parse_or("MEDBOT_LLM_TIMEOUT_SECS", get("MEDBOT_LLM_TIMEOUT_SECS"), 60)?,
            google_api_key: get("GOOGLE_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            ollama_url: get("OLLAMA_URL"),
            prompt_file: get("MEDBOT_PROMPT_FILE").map(PathBuf::from),
            admin_token: get("MEDBOT_ADMIN_TOKEN"),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("medbot.db")
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}
