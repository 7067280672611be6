use crate::backend::TextGenerator;
use crate::catalog::{ModelCatalog, ModelLimits};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use patchwise_code_chunker::{CodepointCodec, HfTokenizer, TokenCodec};
use std::sync::Arc;

/// Handle on one generation model: the backend, its tokenizer and its limits.
///
/// Stages borrow the session for every call instead of reaching for shared state.
#[derive(Clone)]
pub struct ModelSession {
    model: String,
    limits: ModelLimits,
    /// Tokens of `max_context` kept free for the response framing
    context_margin: usize,
    generator: Arc<dyn TextGenerator>,
    codec: Arc<dyn TokenCodec>,
}

impl ModelSession {
    pub fn new(
        model: impl Into<String>,
        limits: ModelLimits,
        generator: Arc<dyn TextGenerator>,
        codec: Arc<dyn TokenCodec>,
    ) -> Self {
        Self {
            model: model.into(),
            limits,
            context_margin: 0,
            generator,
            codec,
        }
    }

    /// Resolve model limits from the configured catalog and the tokenizer from
    /// `config.tokenizer`, falling back to one token per character
    pub fn from_config(config: &PipelineConfig, generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let catalog = ModelCatalog::load(config.backend.catalog.as_deref())?;
        let limits = catalog.limits(&config.backend.model)?;
        let codec: Arc<dyn TokenCodec> = match &config.tokenizer {
            Some(path) => Arc::new(HfTokenizer::from_file(path)?),
            None => {
                log::debug!("No tokenizer configured, counting one token per character");
                Arc::new(CodepointCodec)
            }
        };
        Ok(Self::new(config.backend.model.clone(), limits, generator, codec)
            .with_context_margin(config.context_safety_margin))
    }

    #[must_use]
    pub fn with_context_margin(mut self, margin: usize) -> Self {
        self.context_margin = margin;
        self
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        log::debug!("Requesting completion from {} ({} chars)", self.model, prompt.len());
        let response = self.generator.generate(prompt).await?;
        log::debug!("Received {} chars from {}", response.len(), self.model);
        Ok(response)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub const fn limits(&self) -> ModelLimits {
        self.limits
    }

    pub fn codec(&self) -> &dyn TokenCodec {
        self.codec.as_ref()
    }

    /// `max_response - margin`; a non-positive budget is a configuration error
    pub fn response_budget(&self, margin: usize) -> Result<usize> {
        match self.limits.max_response.checked_sub(margin) {
            Some(budget) if budget > 0 => Ok(budget),
            _ => Err(PipelineError::configuration(format!(
                "max_response {} of '{}' leaves no room after a {margin}-token margin",
                self.limits.max_response, self.model
            ))),
        }
    }

    pub fn token_count(&self, text: &str) -> Result<usize> {
        Ok(self.codec.count(text)?)
    }

    /// Whether `text` fits in `max_context` minus the context margin
    pub fn is_within_context_window(&self, text: &str) -> Result<bool> {
        let count = self.token_count(text)?;
        let window = self.limits.max_context.saturating_sub(self.context_margin);
        log::debug!("{count} tokens against context window {window}");
        Ok(count <= window)
    }

    pub fn is_within_response_window(&self, text: &str) -> Result<bool> {
        let count = self.token_count(text)?;
        log::debug!("{count} tokens against response window {}", self.limits.max_response);
        Ok(count <= self.limits.max_response)
    }
}
