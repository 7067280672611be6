use crate::config::{FailurePolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::extract::{extract_faults, FaultEntry, ValidationResult};
use crate::integrate::{PatchIntegrator, PatchSnapshot};
use crate::localize::{FaultLocalizer, LocalizationResult};
use crate::session::ModelSession;
use crate::source::SourceFile;
use crate::synthesize::{PatternSynthesizer, SynthesisResult};
use crate::validate::PatchValidator;
use patchwise_vector_store::TextIndex;
use serde::Serialize;
use std::fmt::Write as _;

/// How far the current run has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Localized,
    Matched,
    Patched,
    Validated,
}

/// Cross-stage state of one repair run. Each stage fills its field and
/// resets everything downstream of it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub source: SourceFile,
    pub localization: Option<LocalizationResult>,
    pub faults: Option<Vec<FaultEntry>>,
    pub synthesis: Option<SynthesisResult>,
    pub snapshots: Option<Vec<PatchSnapshot>>,
    pub validation: Option<ValidationResult>,
}

impl PipelineRun {
    fn new(source: SourceFile) -> Self {
        Self {
            source,
            localization: None,
            faults: None,
            synthesis: None,
            snapshots: None,
            validation: None,
        }
    }

    fn reset_outputs(&mut self) {
        self.localization = None;
        self.faults = None;
        self.synthesis = None;
        self.snapshots = None;
        self.validation = None;
    }

    pub fn state(&self) -> PipelineState {
        if self.validation.is_some() {
            PipelineState::Validated
        } else if self.snapshots.is_some() {
            PipelineState::Patched
        } else if self.synthesis.is_some() {
            PipelineState::Matched
        } else if self.localization.is_some() {
            PipelineState::Localized
        } else {
            PipelineState::Init
        }
    }

    /// Last snapshot, or the untouched source when no fragment was integrated
    pub fn final_patch(&self) -> Option<&str> {
        let snapshots = self.snapshots.as_ref()?;
        Some(
            snapshots
                .last()
                .map_or(self.source.content.as_str(), |s| s.text.as_str()),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct StageSettings {
    retrieval_k: usize,
    response_safety_margin: usize,
    synthesis_policy: FailurePolicy,
    integration_policy: FailurePolicy,
}

/// Sequences the four repair stages over a single active run.
///
/// The index is scoped to the run's file: `initialize` rebuilds it and a
/// successful validation or `abandon` clears it. A validated run keeps its
/// results readable but accepts no further stages until `initialize`.
pub struct PipelineOrchestrator {
    session: ModelSession,
    index: TextIndex,
    settings: StageSettings,
    run: Option<PipelineRun>,
}

impl PipelineOrchestrator {
    pub fn new(session: ModelSession, index: TextIndex, config: &PipelineConfig) -> Self {
        Self {
            session,
            index,
            settings: StageSettings {
                retrieval_k: config.retrieval_k,
                response_safety_margin: config.response_safety_margin,
                synthesis_policy: config.synthesis_policy,
                integration_policy: config.integration_policy,
            },
            run: None,
        }
    }

    /// Start a run for `source`, replacing any previous run and index contents
    pub async fn initialize(&mut self, source: SourceFile) -> Result<String> {
        if source.content.trim().is_empty() {
            return Err(PipelineError::EmptyInput(source.filename));
        }

        self.run = None;
        self.index.clear().await?;
        let added = self.index.embed(&[source.to_file_content()]).await?;
        log::info!(
            "Initialized run for {} ({}, {added} chunks indexed)",
            source.filename,
            source.language_tag
        );

        let summary = format!(
            "### File: {}\n\nLanguage: {}\n\nIndexed {added} chunks.",
            source.filename,
            source.language_name()
        );
        self.run = Some(PipelineRun::new(source));
        Ok(summary)
    }

    pub async fn localize(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "fault localization")?;
        run.reset_outputs();

        let result = FaultLocalizer::new(&self.session, self.settings.response_safety_margin)
            .localize(&run.source.content)
            .await?;
        let rendered = result.report.clone();
        run.localization = Some(result);
        Ok(rendered)
    }

    pub async fn match_patterns(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "pattern matching")?;
        let report = run
            .localization
            .as_ref()
            .ok_or(PipelineError::StageOrder {
                stage: "pattern matching",
                missing: "a fault localization report",
            })?
            .report
            .clone();
        run.faults = None;
        run.synthesis = None;
        run.snapshots = None;
        run.validation = None;

        let faults = extract_faults(&report);
        let synthesis = PatternSynthesizer::new(
            &self.session,
            &self.index,
            self.settings.retrieval_k,
            self.settings.synthesis_policy,
        )
        .synthesize(&faults)
        .await?;

        let rendered = render_synthesis(&synthesis);
        run.faults = Some(faults);
        run.synthesis = Some(synthesis);
        Ok(rendered)
    }

    pub async fn generate_patches(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "patch generation")?;
        let synthesis = run.synthesis.as_ref().ok_or(PipelineError::StageOrder {
            stage: "patch generation",
            missing: "synthesized patch fragments",
        })?;

        let language = run.source.language_name();
        let snapshots = PatchIntegrator::new(
            &self.session,
            &language,
            self.settings.integration_policy,
        )
        .integrate(&run.source.content, &synthesis.fragments)
        .await?;

        run.validation = None;
        run.snapshots = Some(snapshots);
        let final_patch = run.final_patch().unwrap_or_default();
        Ok(format!("### Final Patch\n\n```{language}\n{final_patch}\n```"))
    }

    pub async fn validate(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "patch validation")?;
        let final_patch = run.final_patch().ok_or(PipelineError::StageOrder {
            stage: "patch validation",
            missing: "generated patches",
        })?;
        let report = run
            .localization
            .as_ref()
            .map(|l| l.report.as_str())
            .unwrap_or_default();

        let language = run.source.language_name();
        let result = PatchValidator::new(&self.session, &language)
            .validate(final_patch, report)
            .await?;
        let rendered = result.render_markdown();
        run.validation = Some(result);

        self.index.clear().await?;
        Ok(rendered)
    }

    /// Reset stage outputs, then run all four stages in order
    pub async fn run_all(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "the pipeline")?;
        run.reset_outputs();

        self.localize().await?;
        self.match_patterns().await?;
        self.generate_patches().await?;
        self.validate().await
    }

    /// Ask the model to fix syntax errors in the final patch and append the
    /// result as a new snapshot
    pub async fn repair_final_patch(&mut self) -> Result<String> {
        let run = active_run(&mut self.run, "syntax repair")?;
        let final_patch = run
            .final_patch()
            .ok_or(PipelineError::StageOrder {
                stage: "syntax repair",
                missing: "generated patches",
            })?
            .to_string();

        let language = run.source.language_name();
        let repaired = PatchValidator::new(&self.session, &language)
            .repair_syntax(&final_patch)
            .await?;

        if let Some(snapshots) = run.snapshots.as_mut() {
            snapshots.push(PatchSnapshot {
                fragment_index: snapshots.len() + 1,
                fault_ordinal: 0,
                text: repaired.clone(),
            });
        }
        Ok(format!("### Repaired Patch\n\n```{language}\n{repaired}\n```"))
    }

    /// Drop the current run and clear the index
    pub async fn abandon(&mut self) -> Result<()> {
        if let Some(run) = self.run.take() {
            log::info!("Abandoning run for {}", run.source.filename);
        }
        self.index.clear().await?;
        Ok(())
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        self.run.as_ref()
    }

    pub fn state(&self) -> Option<PipelineState> {
        self.run.as_ref().map(PipelineRun::state)
    }

    pub fn index(&self) -> &TextIndex {
        &self.index
    }

    pub fn session(&self) -> &ModelSession {
        &self.session
    }
}

/// The run a stage may act on. A validated run has released its index, so
/// it must be initialized again before any stage runs.
fn active_run<'a>(
    run: &'a mut Option<PipelineRun>,
    stage: &'static str,
) -> Result<&'a mut PipelineRun> {
    match run {
        None => Err(PipelineError::StageOrder {
            stage,
            missing: "an initialized source file",
        }),
        Some(run) if run.state() == PipelineState::Validated => Err(PipelineError::StageOrder {
            stage,
            missing: "a re-initialized source file",
        }),
        Some(run) => Ok(run),
    }
}

fn render_synthesis(synthesis: &SynthesisResult) -> String {
    if synthesis.raw_responses.is_empty() {
        return "No faults to address.".to_string();
    }
    let mut out = String::new();
    for (fragment, response) in synthesis.fragments.iter().zip(&synthesis.raw_responses) {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = write!(out, "### Fault {}\n\n{}", fragment.fault_ordinal, response.trim());
    }
    out
}
