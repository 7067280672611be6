use crate::error::Result;
use crate::extract::{parse_validation, return_code_block, ValidationResult};
use crate::prompts;
use crate::session::ModelSession;

/// Reviews a patched file against the faults it was meant to fix
pub struct PatchValidator<'a> {
    session: &'a ModelSession,
    language: &'a str,
}

impl<'a> PatchValidator<'a> {
    pub const fn new(session: &'a ModelSession, language: &'a str) -> Self {
        Self { session, language }
    }

    /// One review call; the status falls back to `UNKNOWN` when the response has none
    pub async fn validate(
        &self,
        final_patch: &str,
        fault_report: &str,
    ) -> Result<ValidationResult> {
        log::info!("Validating final patch ({} chars)", final_patch.len());
        let prompt = prompts::validation_prompt(final_patch, fault_report, self.language);
        let response = self
            .session
            .generate(&prompt)
            .await
            .inspect_err(|e| log::error!("Patch validation failed: {e}"))?;
        let result = parse_validation(&response);
        log::info!("Validation complete - status: {}", result.status);
        Ok(result)
    }

    pub fn syntax_repair_prompt(&self, code: &str) -> String {
        prompts::syntax_repair_prompt(code, self.language)
    }

    /// Ask the model to fix syntax errors; returns the fenced block of its answer
    pub async fn repair_syntax(&self, code: &str) -> Result<String> {
        let response = self.session.generate(&self.syntax_repair_prompt(code)).await?;
        Ok(return_code_block(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedGenerator;
    use crate::catalog::ModelLimits;
    use crate::extract::{ValidationStatus, NONE_PROVIDED};
    use patchwise_code_chunker::CodepointCodec;
    use std::sync::Arc;

    fn session(generator: Arc<ScriptedGenerator>) -> ModelSession {
        ModelSession::new(
            "test-model",
            ModelLimits {
                max_context: 10_000,
                max_response: 1_000,
            },
            generator,
            Arc::new(CodepointCodec),
        )
    }

    #[tokio::test]
    async fn validate_parses_review() {
        let generator = Arc::new(ScriptedGenerator::new([
            "**Status:** BAD\n\n**Issues:**\nDivision by zero remains\n\n**Explanation:**\nFault 2 unresolved",
        ]));
        let session = session(generator.clone());

        let result = PatchValidator::new(&session, "python")
            .validate("def f(): return 1/0", "#### Fault 1:\n- div")
            .await
            .unwrap();

        assert_eq!(result.status, ValidationStatus::Bad);
        assert_eq!(result.issues, "Division by zero remains");
        assert_eq!(result.corrections, NONE_PROVIDED);
        assert_eq!(result.explanation, "Fault 2 unresolved");

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("def f(): return 1/0"));
        assert!(prompt.contains("#### Fault 1:\n- div"));
        assert!(prompt.contains("`python`"));
    }

    #[tokio::test]
    async fn unparseable_review_is_unknown() {
        let generator = Arc::new(ScriptedGenerator::new(["Looks fine to me."]));
        let session = session(generator);
        let result = PatchValidator::new(&session, "rust")
            .validate("fn main() {}", "")
            .await
            .unwrap();
        assert_eq!(result.status, ValidationStatus::Unknown);
        assert_eq!(result.issues, NONE_PROVIDED);
    }

    #[tokio::test]
    async fn repair_syntax_extracts_block() {
        let generator = Arc::new(ScriptedGenerator::new([
            "Here you go:\n```rust\nfn main() {}\n```",
        ]));
        let session = session(generator.clone());
        let validator = PatchValidator::new(&session, "rust");

        let repaired = validator.repair_syntax("fn main( {}").await.unwrap();
        assert_eq!(repaired, "fn main() {}\n");
        assert!(generator.prompts()[0].contains("```rust\nfn main( {}\n```"));
    }
}
