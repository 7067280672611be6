use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Token limits of one generation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub max_context: usize,
    pub max_response: usize,
}

/// Known generation models and their limits.
///
/// The file format is `{ "models": { "<id>": { "max_context": N, "max_response": N } } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelLimits>,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        let entries = [
            ("meta-llama/llama-3-8b-instruct:free", 8_192, 4_096),
            ("meta-llama/llama-3.1-70b-instruct", 131_072, 8_192),
            ("accounts/fireworks/models/llama-v3p1-8b-instruct", 131_072, 16_384),
            ("accounts/fireworks/models/llama-v3p1-70b-instruct", 131_072, 16_384),
            ("accounts/fireworks/models/qwen2p5-coder-32b-instruct", 32_768, 4_096),
            ("gpt-4o", 128_000, 16_384),
            ("gpt-4o-mini", 128_000, 16_384),
        ];
        let models = entries
            .into_iter()
            .map(|(id, max_context, max_response)| {
                (
                    id.to_string(),
                    ModelLimits {
                        max_context,
                        max_response,
                    },
                )
            })
            .collect();
        Self { models }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| PipelineError::configuration(format!("Invalid model catalog: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!(
                "Failed to read model catalog {}: {e}",
                path.display()
            ))
        })?;
        let catalog = Self::from_json(&raw)?;
        log::info!(
            "Loaded {} models from catalog {}",
            catalog.models.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Catalog file when given, built-in table otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn limits(&self, model: &str) -> Result<ModelLimits> {
        self.models.get(model).copied().ok_or_else(|| {
            let known = self.models.keys().map(String::as_str).collect::<Vec<_>>();
            PipelineError::configuration(format!(
                "Unsupported model '{model}'. Known models: {}",
                known.join(", ")
            ))
        })
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_contains_default_model() {
        let catalog = ModelCatalog::builtin();
        let limits = catalog
            .limits("accounts/fireworks/models/llama-v3p1-70b-instruct")
            .unwrap();
        assert!(limits.max_response < limits.max_context);
    }

    #[test]
    fn unknown_model_is_configuration_error() {
        let err = ModelCatalog::builtin().limits("no-such-model").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("gpt-4o"));
    }

    #[test]
    fn parses_catalog_document() {
        let catalog = ModelCatalog::from_json(
            r#"{"models": {"tiny": {"max_context": 1024, "max_response": 512}}}"#,
        )
        .unwrap();
        assert_eq!(
            catalog.limits("tiny").unwrap(),
            ModelLimits {
                max_context: 1024,
                max_response: 512
            }
        );
        assert_eq!(catalog.model_ids().collect::<Vec<_>>(), vec!["tiny"]);
    }

    #[test]
    fn malformed_catalog_rejected() {
        assert!(matches!(
            ModelCatalog::from_json("{\"models\": 3}"),
            Err(PipelineError::Configuration(_))
        ));
    }
}
