use crate::config::BackendConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// Text-generation capability the pipeline stages call into.
///
/// Errors propagate to the enclosing stage unchanged; retries are the
/// implementation's business.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Hosted providers speaking the OpenAI chat-completions protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenRouter,
    Fireworks,
    OpenAi,
    HuggingFace,
}

impl Provider {
    pub const fn base_url(self) -> &'static str {
        match self {
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Fireworks => "https://api.fireworks.ai/inference/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::HuggingFace => "https://api-inference.huggingface.co/models",
        }
    }

    /// Routing prefix used when naming a model across providers
    pub const fn model_prefix(self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter/",
            Provider::Fireworks => "fireworks_ai/",
            Provider::OpenAi => "",
            Provider::HuggingFace => "huggingface/",
        }
    }

    pub const fn default_api_key_env(self) -> &'static str {
        match self {
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::Fireworks => "FIREWORKS_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::HuggingFace => "HF_TOKEN",
        }
    }

    pub fn chat_completions_url(self, model: &str) -> String {
        match self {
            Provider::HuggingFace => format!("{}/{model}/v1/chat/completions", self.base_url()),
            _ => format!("{}/chat/completions", self.base_url()),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::Fireworks => "fireworks",
            Provider::OpenAi => "openai",
            Provider::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Provider::OpenRouter),
            "fireworks" => Ok(Provider::Fireworks),
            "openai" => Ok(Provider::OpenAi),
            "huggingface" => Ok(Provider::HuggingFace),
            other => Err(PipelineError::configuration(format!(
                "Unsupported provider '{other}' (expected openrouter, fireworks, openai or huggingface)"
            ))),
        }
    }
}

/// HTTP chat-completions client for a hosted [`Provider`]
pub struct HttpGenerator {
    client: Client,
    provider: Provider,
    model: String,
    api_key: String,
    temperature: Option<f32>,
}

impl HttpGenerator {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(provider, model, api_key, Duration::from_secs(60))
    }

    pub fn with_timeout(
        provider: Provider,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PipelineError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            provider,
            model: model.into(),
            api_key: api_key.into(),
            temperature: None,
        })
    }

    /// Build from config, reading the API key from the configured environment variable
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let key_env = config
            .api_key_env
            .clone()
            .unwrap_or_else(|| config.provider.default_api_key_env().to_string());
        let api_key = std::env::var(&key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::configuration(format!(
                    "API key for provider '{}' not found; set {key_env}",
                    config.provider
                ))
            })?;

        let mut generator = Self::with_timeout(
            config.provider,
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?;
        generator.temperature = config.temperature;
        log::info!(
            "Using {}{} via {}",
            config.provider.model_prefix(),
            config.model,
            config.provider.base_url()
        );
        Ok(generator)
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| PipelineError::configuration("invalid API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let url = self.provider.chat_completions_url(&self.model);
        log::debug!("POST {url} ({} prompt chars)", prompt.len());
        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::backend(format!("{} request failed: {e}", self.provider)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PipelineError::backend(format!(
                "{} returned {status}: {text}",
                self.provider
            )));
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| {
            PipelineError::backend(format!("failed to parse {} response: {e}", self.provider))
        })?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if answer.is_empty() {
            log::warn!("{} returned an empty completion", self.provider);
        }
        Ok(answer)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Replays canned responses in order and records every prompt it receives.
///
/// Fails with a backend error once the responses run out.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Load a JSON array of response strings
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let responses: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::configuration(format!(
                "{} is not a JSON array of strings: {e}",
                path.display()
            ))
        })?;
        log::info!(
            "Replaying {} scripted responses from {}",
            responses.len(),
            path.display()
        );
        Ok(Self::new(responses))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| PipelineError::backend("scripted generator poisoned"))?
            .push(prompt.to_string());
        self.responses
            .lock()
            .map_err(|_| PipelineError::backend("scripted generator poisoned"))?
            .pop_front()
            .ok_or_else(|| PipelineError::backend("scripted responses exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn provider_table() {
        assert_eq!(
            Provider::Fireworks.chat_completions_url("m"),
            "https://api.fireworks.ai/inference/v1/chat/completions"
        );
        assert_eq!(
            Provider::HuggingFace.chat_completions_url("org/model"),
            "https://api-inference.huggingface.co/models/org/model/v1/chat/completions"
        );
        assert_eq!(Provider::OpenRouter.model_prefix(), "openrouter/");
        assert_eq!(Provider::OpenAi.model_prefix(), "");
    }

    #[test]
    fn provider_parse() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!(matches!(
            "anthropic".parse::<Provider>(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn scripted_generator_replays_then_fails() {
        let generator = ScriptedGenerator::new(["one", "two"]);
        assert_eq!(generator.generate("p1").await.unwrap(), "one");
        assert_eq!(generator.generate("p2").await.unwrap(), "two");
        assert!(matches!(
            generator.generate("p3").await,
            Err(PipelineError::Backend(_))
        ));
        assert_eq!(generator.prompts(), vec!["p1", "p2", "p3"]);
        assert_eq!(generator.remaining(), 0);
    }

    #[test]
    fn scripted_generator_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("responses.json");
        std::fs::write(&path, r#"["a", "b"]"#).unwrap();
        assert_eq!(ScriptedGenerator::from_file(&path).unwrap().remaining(), 2);

        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        assert!(ScriptedGenerator::from_file(&path).is_err());
    }

    #[test]
    fn missing_api_key_is_configuration_error() {
        let config = BackendConfig {
            api_key_env: Some("PATCHWISE_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..BackendConfig::default()
        };
        assert!(matches!(
            HttpGenerator::from_config(&config),
            Err(PipelineError::Configuration(_))
        ));
    }
}
