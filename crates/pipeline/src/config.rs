use crate::backend::Provider;
use crate::error::{PipelineError, Result};
use patchwise_code_chunker::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a stage does when one fault or fragment fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Propagate the error; the stage produces nothing
    Abort,
    /// Log, drop that item and continue with the next one
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: Provider,
    pub model: String,
    /// Environment variable holding the API key; provider default when unset
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    /// Model catalog JSON; built-in catalog when unset
    pub catalog: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Fireworks,
            model: "accounts/fireworks/models/llama-v3p1-70b-instruct".to_string(),
            api_key_env: None,
            timeout_secs: 60,
            temperature: None,
            catalog: None,
        }
    }
}

/// Pipeline settings, loaded from TOML with `PATCHWISE_*` overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_line_span: usize,
    pub retrieval_k: usize,
    /// Tokens reserved for prompt overhead when sizing localization chunks
    pub response_safety_margin: usize,
    pub context_safety_margin: usize,
    pub synthesis_policy: FailurePolicy,
    pub integration_policy: FailurePolicy,
    /// `tokenizer.json` for token budgeting; one token per char when unset
    pub tokenizer: Option<PathBuf>,
    pub backend: BackendConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("code_index.json"),
            chunk_size: 500,
            chunk_overlap: 50,
            chunk_line_span: 10,
            retrieval_k: 5,
            response_safety_margin: 250,
            context_safety_margin: 250,
            synthesis_policy: FailurePolicy::Abort,
            integration_policy: FailurePolicy::Skip,
            tokenizer: None,
            backend: BackendConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| PipelineError::configuration(format!("Invalid config: {e}")))
    }

    /// Read `path` (defaults when `None`), then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// [`PipelineConfig::load`] with overrides looked up through `lookup`
    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::configuration(format!(
                        "Failed to read config {}: {e}",
                        path.display()
                    ))
                })?;
                log::debug!("Loaded config from {}", path.display());
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_from(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("PATCHWISE_INDEX_PATH") {
            self.index_path = PathBuf::from(path);
        }
        if let Some(model) = get("PATCHWISE_MODEL") {
            self.backend.model = model;
        }
        if let Some(provider) = get("PATCHWISE_PROVIDER") {
            self.backend.provider = provider.parse()?;
        }
        if let Some(path) = get("PATCHWISE_TOKENIZER") {
            self.tokenizer = Some(PathBuf::from(path));
        }
        if let Some(path) = get("PATCHWISE_CATALOG") {
            self.backend.catalog = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunker_config()
            .validate()
            .map_err(PipelineError::configuration)?;
        if self.retrieval_k == 0 {
            return Err(PipelineError::configuration("retrieval_k must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(PipelineError::configuration("backend.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            line_span: self.chunk_line_span,
            ..ChunkerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.retrieval_k, 5);
        assert_eq!(config.synthesis_policy, FailurePolicy::Abort);
        assert_eq!(config.integration_policy, FailurePolicy::Skip);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
retrieval_k = 3
synthesis_policy = "skip"

[backend]
provider = "openrouter"
model = "meta-llama/llama-3-8b-instruct:free"
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval_k, 3);
        assert_eq!(config.synthesis_policy, FailurePolicy::Skip);
        assert_eq!(config.backend.provider, Provider::OpenRouter);
        assert_eq!(config.backend.timeout_secs, 60);
        assert_eq!(config.chunk_size, 500);
    }

    #[test]
    fn unknown_provider_in_toml() {
        let err = PipelineConfig::from_toml("[backend]\nprovider = \"acme\"\n").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PATCHWISE_INDEX_PATH", "/tmp/idx.json"),
            ("PATCHWISE_MODEL", "gpt-4o-mini"),
            ("PATCHWISE_PROVIDER", "openai"),
            ("PATCHWISE_TOKENIZER", ""),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.index_path, PathBuf::from("/tmp/idx.json"));
        assert_eq!(config.backend.model, "gpt-4o-mini");
        assert_eq!(config.backend.provider, Provider::OpenAi);
        assert!(config.tokenizer.is_none());
    }

    #[test]
    fn bad_provider_override() {
        let mut config = PipelineConfig::default();
        let result = config.apply_env_overrides_from(|key| {
            (key == "PATCHWISE_PROVIDER").then(|| "nope".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let config = PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("patchwise.toml");
        std::fs::write(&path, "chunk_size = 200\nchunk_overlap = 20\n").unwrap();
        let config = PipelineConfig::load_with_env(Some(&path), |_| None).unwrap();
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.backend.provider, Provider::Fireworks);

        let missing = dir.path().join("missing.toml");
        assert!(PipelineConfig::load_with_env(Some(&missing), |_| None).is_err());
    }

    #[test]
    fn load_applies_overrides_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("patchwise.toml");
        std::fs::write(&path, "chunk_size = 200\nchunk_overlap = 20\n").unwrap();

        let config = PipelineConfig::load_with_env(Some(&path), |key| {
            (key == "PATCHWISE_MODEL").then(|| "gpt-4o".to_string())
        })
        .unwrap();
        assert_eq!(config.backend.model, "gpt-4o");

        std::fs::write(&path, "chunk_size = 20\nchunk_overlap = 20\n").unwrap();
        assert!(PipelineConfig::load_with_env(Some(&path), |_| None).is_err());
    }
}
