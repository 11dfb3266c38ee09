//! AI provider integrations
//!
//! The intake engine only needs one thing from an AI service: turn a prompt
//! into text. [`Responder`] is that seam; [`Provider`] is the configured
//! implementation backed by a real HTTP API.

mod gemini;
mod ollama;
mod openai_compat;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider returned no text")]
    EmptyResponse,
}

/// Single-shot text completion
#[async_trait]
pub trait Responder: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

pub enum Provider {
    Gemini(GeminiProvider),
    Ollama(OllamaProvider),
    OpenAICompat(OpenAICompatProvider),
}

impl Provider {
    /// Build the provider selected by `llm_provider`.
    ///
    /// Returns [`ProviderError::NotConfigured`] when a cloud provider has no
    /// API key; the caller treats that as "AI unavailable".
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);

        match config.llm_provider.as_str() {
            "gemini" | "google" => {
                let api_key = config
                    .google_api_key
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("GOOGLE_API_KEY is not set".into()))?;
                let model = config
                    .llm_model
                    .clone()
                    .unwrap_or_else(|| gemini::DEFAULT_MODEL.into());
                Ok(Provider::Gemini(GeminiProvider::new(api_key, model, timeout)?))
            }
            "openai" => {
                let mut compat = match (&config.openai_base_url, &config.openai_api_key) {
                    (Some(base_url), _) => {
                        let mut local = OpenAICompatConfig::local(
                            base_url.clone(),
                            openai_compat::DEFAULT_MODEL,
                        );
                        local.api_key = config.openai_api_key.clone();
                        local
                    }
                    (None, Some(key)) => OpenAICompatConfig::openai(key.clone()),
                    (None, None) => {
                        return Err(ProviderError::NotConfigured(
                            "OPENAI_API_KEY or OPENAI_BASE_URL must be set".into(),
                        ))
                    }
                };
                if let Some(model) = &config.llm_model {
                    compat.default_model = model.clone();
                }
                compat.timeout_secs = config.llm_timeout_secs;
                Ok(Provider::OpenAICompat(OpenAICompatProvider::new(compat)?))
            }
            "ollama" => {
                let url = config
                    .ollama_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                let model = config
                    .llm_model
                    .clone()
                    .unwrap_or_else(|| ollama::DEFAULT_MODEL.into());
                Ok(Provider::Ollama(OllamaProvider::new(url, model, timeout)?))
            }
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

#[async_trait]
impl Responder for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::Gemini(_) => "gemini",
            Provider::Ollama(_) => "ollama",
            Provider::OpenAICompat(_) => "openai",
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let text = match self {
            Provider::Gemini(p) => p.complete(prompt).await?,
            Provider::Ollama(p) => p.complete(prompt).await?,
            Provider::OpenAICompat(p) => p.complete(prompt).await?,
        };

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}
