use crate::config::FailurePolicy;
use crate::error::Result;
use crate::extract::{return_code_block, FaultEntry};
use crate::prompts;
use crate::session::ModelSession;
use async_trait::async_trait;
use patchwise_vector_store::TextIndex;
use serde::Serialize;

/// Source of supporting code for a fault description
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve_context(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

#[async_trait]
impl ContextRetriever for TextIndex {
    async fn retrieve_context(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let hits = self.retrieve(query, k).await?;
        Ok(hits.into_iter().map(|hit| hit.chunk_text).collect())
    }
}

/// Minimal code change proposed for one fault
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchFragment {
    pub fault_ordinal: usize,
    /// Fenced block of the response; empty when the model returned none
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SynthesisResult {
    /// Untouched backend responses, one per synthesized fault
    pub raw_responses: Vec<String>,
    pub fragments: Vec<PatchFragment>,
}

/// Retrieves context per fault and asks the model for a minimal fix
pub struct PatternSynthesizer<'a> {
    session: &'a ModelSession,
    retriever: &'a dyn ContextRetriever,
    top_k: usize,
    policy: FailurePolicy,
}

impl<'a> PatternSynthesizer<'a> {
    pub fn new(
        session: &'a ModelSession,
        retriever: &'a dyn ContextRetriever,
        top_k: usize,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            session,
            retriever,
            top_k,
            policy,
        }
    }

    pub async fn synthesize(&self, faults: &[FaultEntry]) -> Result<SynthesisResult> {
        let mut kept: Vec<(usize, String)> = Vec::with_capacity(faults.len());
        for (idx, fault) in faults.iter().enumerate() {
            log::info!("Synthesizing fix for fault {}/{}", idx + 1, faults.len());
            match self.synthesize_one(fault).await {
                Ok(response) => kept.push((fault.ordinal, response)),
                Err(e) if self.policy == FailurePolicy::Skip => {
                    log::warn!("Skipping fault {}: {e}", fault.ordinal);
                }
                Err(e) => {
                    log::error!("Pattern synthesis failed on fault {}: {e}", fault.ordinal);
                    return Err(e);
                }
            }
        }

        let fragments = kept
            .iter()
            .map(|(fault_ordinal, response)| PatchFragment {
                fault_ordinal: *fault_ordinal,
                code: return_code_block(response),
            })
            .collect();
        let raw_responses = kept.into_iter().map(|(_, response)| response).collect();

        Ok(SynthesisResult {
            raw_responses,
            fragments,
        })
    }

    async fn synthesize_one(&self, fault: &FaultEntry) -> Result<String> {
        let context = self
            .retriever
            .retrieve_context(&fault.raw_text, self.top_k)
            .await?
            .join("\n");
        log::debug!(
            "Retrieved {} chars of context for fault {}",
            context.len(),
            fault.ordinal
        );
        let prompt = prompts::synthesis_prompt(&fault.raw_text, &context);
        self.session.generate(&prompt).await
    }
}
