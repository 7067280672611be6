use crate::config::FailurePolicy;
use crate::error::Result;
use crate::extract::return_code_block;
use crate::prompts;
use crate::session::ModelSession;
use crate::synthesize::PatchFragment;
use serde::Serialize;

/// Whole-file text after applying fragments up to `fragment_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSnapshot {
    /// 1-based position of the fragment that produced this snapshot
    pub fragment_index: usize,
    pub fault_ordinal: usize,
    pub text: String,
}

/// Folds fragments into a running copy of the file, one model call per fragment
pub struct PatchIntegrator<'a> {
    session: &'a ModelSession,
    language: &'a str,
    policy: FailurePolicy,
}

impl<'a> PatchIntegrator<'a> {
    pub const fn new(session: &'a ModelSession, language: &'a str, policy: FailurePolicy) -> Self {
        Self {
            session,
            language,
            policy,
        }
    }

    /// Each prompt carries the code produced by the previous fragment, so fixes accumulate.
    ///
    /// A response without a code block empties the running code. Under
    /// [`FailurePolicy::Skip`] a failed call leaves the running code unchanged.
    pub async fn integrate(
        &self,
        original: &str,
        fragments: &[PatchFragment],
    ) -> Result<Vec<PatchSnapshot>> {
        let mut current = original.to_string();
        let mut snapshots = Vec::with_capacity(fragments.len());

        for (idx, fragment) in fragments.iter().enumerate() {
            log::info!("Integrating fragment {}/{}", idx + 1, fragments.len());
            let prompt = if current.is_empty() {
                prompts::first_integration_prompt(original, &fragment.code, self.language)
            } else {
                prompts::integration_prompt(&current, &fragment.code, self.language)
            };

            let response = match self.session.generate(&prompt).await {
                Ok(response) => response,
                Err(e) if self.policy == FailurePolicy::Skip => {
                    log::warn!("Skipping fragment {}: {e}", idx + 1);
                    continue;
                }
                Err(e) => {
                    log::error!("Patch integration failed on fragment {}: {e}", idx + 1);
                    return Err(e);
                }
            };

            current = return_code_block(&response);
            snapshots.push(PatchSnapshot {
                fragment_index: idx + 1,
                fault_ordinal: fragment.fault_ordinal,
                text: current.clone(),
            });
        }

        log::info!(
            "Integrated {}/{} fragments",
            snapshots.len(),
            fragments.len()
        );
        Ok(snapshots)
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

    fn fragments(n: usize) -> Vec<PatchFragment> {
        (1..=n)
            .map(|i| PatchFragment {
                fault_ordinal: i,
                code: format!("fix_{i}()"),
            })
            .collect()
    }

    #[tokio::test]
    async fn each_snapshot_builds_on_previous() {
        let generator = Arc::new(ScriptedGenerator::new([
            "```python\nv1\n```",
            "```python\nv2\n```",
        ]));
        let session = session(generator.clone());

        let snapshots = PatchIntegrator::new(&session, "python", FailurePolicy::Skip)
            .integrate("v0", &fragments(2))
            .await
            .unwrap();

        let texts: Vec<&str> = snapshots.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["v1\n", "v2\n"]);

        let prompts = generator.prompts();
        assert!(prompts[0].contains("Current code:\nv0"));
        assert!(prompts[0].contains("fix_1()"));
        assert!(prompts[1].contains("Current code:\nv1\n"));
        assert!(!prompts[1].contains("v0"));
    }

    #[tokio::test]
    async fn missing_block_empties_running_code() {
        let generator = Arc::new(ScriptedGenerator::new(["sorry, no code", "```\nv2\n```"]));
        let session = session(generator.clone());

        let snapshots = PatchIntegrator::new(&session, "python", FailurePolicy::Skip)
            .integrate("v0", &fragments(2))
            .await
            .unwrap();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].text, "");
        assert_eq!(snapshots[1].text, "v2\n");
        assert!(generator.prompts()[1].contains("File contents:\nv0"));
    }

    #[tokio::test]
    async fn failed_fragment_is_skipped() {
        // Exhausting the script after one response makes the second call fail.
        let generator = Arc::new(ScriptedGenerator::new(["```\nv1\n```"]));
        let session = session(generator.clone());

        let snapshots = PatchIntegrator::new(&session, "python", FailurePolicy::Skip)
            .integrate("v0", &fragments(3))
            .await
            .unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].fragment_index, 1);
        assert_eq!(generator.call_count(), 3);
        assert!(generator.prompts()[2].contains("Current code:\nv1\n"));
    }

    #[tokio::test]
    async fn abort_policy_propagates() {
        let generator = Arc::new(ScriptedGenerator::new(["```\nv1\n```"]));
        let session = session(generator.clone());

        let err = PatchIntegrator::new(&session, "python", FailurePolicy::Abort)
            .integrate("v0", &fragments(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Backend(_)));
    }

    #[tokio::test]
    async fn no_fragments_no_snapshots() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<String>::new()));
        let session = session(generator.clone());
        let snapshots = PatchIntegrator::new(&session, "python", FailurePolicy::Skip)
            .integrate("v0", &[])
            .await
            .unwrap();
        assert!(snapshots.is_empty());
        assert_eq!(generator.call_count(), 0);
    }
}
