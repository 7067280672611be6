use crate::error::Result;
use crate::prompts;
use crate::session::ModelSession;
use patchwise_code_chunker::TokenBudgetedChunker;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizationResult {
    /// Consolidated report (or the single chunk's response)
    pub report: String,
    /// Raw per-chunk responses, in chunk order
    pub chunk_responses: Vec<String>,
    pub consolidated: bool,
}

/// Drives the model over token-bounded chunks of a file to produce a fault report
pub struct FaultLocalizer<'a> {
    session: &'a ModelSession,
    safety_margin: usize,
}

impl<'a> FaultLocalizer<'a> {
    pub const fn new(session: &'a ModelSession, safety_margin: usize) -> Self {
        Self {
            session,
            safety_margin,
        }
    }

    /// Analyse every chunk in order; with more than one chunk, one extra call
    /// consolidates the responses. Any backend failure aborts the whole stage.
    pub async fn localize(&self, text: &str) -> Result<LocalizationResult> {
        let budget = self.session.response_budget(self.safety_margin)?;
        let chunks = TokenBudgetedChunker::new(self.session.codec()).chunk(text, budget)?;
        log::info!(
            "Localizing faults over {} chunks (budget {budget} tokens)",
            chunks.len()
        );

        let mut chunk_responses = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            log::debug!("Analysing chunk {}", chunk.ordinal);
            let prompt = prompts::analysis_prompt(&chunk.text);
            if !self.session.is_within_context_window(&prompt)? {
                log::warn!(
                    "Prompt for chunk {} exceeds the context window of {}",
                    chunk.ordinal,
                    self.session.model()
                );
            }
            let response = self.session.generate(&prompt).await.inspect_err(|e| {
                log::error!("Fault localization failed on chunk {}: {e}", chunk.ordinal)
            })?;
            chunk_responses.push(response);
        }

        let combined = chunk_responses.join("\n");
        let (report, consolidated) = if chunk_responses.len() > 1 {
            log::info!("Consolidating {} chunk analyses", chunk_responses.len());
            let report = self
                .session
                .generate(&prompts::consolidation_prompt(&combined))
                .await
                .inspect_err(|e| log::error!("Fault report consolidation failed: {e}"))?;
            (report, true)
        } else {
            if chunk_responses.is_empty() {
                log::warn!("Nothing to localize: source text is empty");
            }
            (combined, false)
        };

        Ok(LocalizationResult {
            report,
            chunk_responses,
            consolidated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedGenerator;
    use crate::catalog::ModelLimits;
    use crate::error::PipelineError;
    use patchwise_code_chunker::CodepointCodec;
    use std::sync::Arc;

    fn session(max_response: usize, generator: Arc<ScriptedGenerator>) -> ModelSession {
        ModelSession::new(
            "test-model",
            ModelLimits {
                max_context: 10_000,
                max_response,
            },
            generator,
            Arc::new(CodepointCodec),
        )
    }

    #[tokio::test]
    async fn single_chunk_uses_raw_response() {
        let generator = Arc::new(ScriptedGenerator::new(["#### Fault 1:\nbug"]));
        let session = session(300, generator.clone());

        let result = FaultLocalizer::new(&session, 250)
            .localize("def f(): pass")
            .await
            .unwrap();

        assert_eq!(generator.call_count(), 1);
        assert_eq!(result.report, "#### Fault 1:\nbug");
        assert!(!result.consolidated);
        assert!(generator.prompts()[0].contains("def f(): pass"));
    }

    #[tokio::test]
    async fn multi_chunk_adds_consolidation_call() {
        let generator = Arc::new(ScriptedGenerator::new([
            "analysis a",
            "analysis b",
            "analysis c",
            "merged report",
        ]));
        let session = session(260, generator.clone());

        // budget 10 tokens, 25 chars -> 3 chunks
        let text = "abcdefghij0123456789ABCDE";
        let result = FaultLocalizer::new(&session, 250).localize(text).await.unwrap();

        assert_eq!(generator.call_count(), 4);
        assert_eq!(result.chunk_responses.len(), 3);
        assert_eq!(result.report, "merged report");
        assert!(result.consolidated);

        let prompts = generator.prompts();
        assert!(prompts[0].contains("abcdefghij"));
        assert!(prompts[1].contains("0123456789"));
        assert!(prompts[2].contains("ABCDE"));
        assert!(prompts[3].contains("analysis a\nanalysis b\nanalysis c"));
    }

    #[tokio::test]
    async fn backend_failure_aborts() {
        let generator = Arc::new(ScriptedGenerator::new(["only one"]));
        let session = session(255, generator.clone());

        let err = FaultLocalizer::new(&session, 250)
            .localize("0123456789")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Backend(_)));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn margin_larger_than_response_window() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let session = session(200, generator.clone());
        assert!(matches!(
            FaultLocalizer::new(&session, 250).localize("x").await,
            Err(PipelineError::Configuration(_))
        ));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_text_makes_no_calls() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let session = session(300, generator.clone());
        let result = FaultLocalizer::new(&session, 250).localize("").await.unwrap();
        assert_eq!(result.report, "");
        assert_eq!(generator.call_count(), 0);
    }
}
