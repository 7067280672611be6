use patchwise_code_chunker::{Chunker, CodepointCodec};
use patchwise_pipeline::{
    ModelLimits, ModelSession, PipelineConfig, PipelineError, PipelineOrchestrator,
    PipelineState, ScriptedGenerator, SourceFile, ValidationStatus,
};
use patchwise_vector_store::{EmbeddingModel, TextIndex};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const REPORT: &str = "### High-Level Overview:\n- one function\n\n### Detected Faults:\n\n\
#### Fault 1:\n- **Fault Detected**: does nothing\n\n\
#### Fault 2:\n- **Fault Detected**: no docstring\n";

async fn orchestrator(
    dir: &Path,
    responses: &[&str],
) -> (PipelineOrchestrator, Arc<ScriptedGenerator>) {
    let config = PipelineConfig::default();
    let generator = Arc::new(ScriptedGenerator::new(responses.iter().copied()));
    let session = ModelSession::new(
        "test-model",
        ModelLimits {
            max_context: 8_192,
            max_response: 4_096,
        },
        generator.clone(),
        Arc::new(CodepointCodec),
    );
    let chunker = Chunker::new(config.chunker_config()).unwrap();
    let index = TextIndex::open(dir.join("index.json"), EmbeddingModel::stub(64), chunker)
        .await
        .unwrap();
    (PipelineOrchestrator::new(session, index, &config), generator)
}

#[tokio::test]
async fn full_run_threads_snapshots_through_stages() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, generator) = orchestrator(
        temp.path(),
        &[
            REPORT,
            "### High-Level Explanation:\nreturn a value\n```python\nreturn 1\n```",
            "### High-Level Explanation:\ndocument\n```python\n\"\"\"Return one.\"\"\"\n```",
            "```python\ndef f():\n    return 1\n```",
            "```python\ndef f():\n    \"\"\"Return one.\"\"\"\n    return 1\n```",
            "**Status:** GOOD\n\n**Issues:**\nNone\n\n**Explanation:**\nBoth faults fixed.",
        ],
    )
    .await;

    pipeline
        .initialize(SourceFile::new("f.py", "def f(): pass"))
        .await
        .unwrap();
    assert!(!pipeline.index().is_empty());
    assert_eq!(pipeline.state(), Some(PipelineState::Init));

    let output = pipeline.run_all().await.unwrap();
    assert_eq!(output, "### Status: GOOD\n\n### Overview:\n\nNone");
    assert_eq!(generator.call_count(), 6);

    let run = pipeline.run().unwrap();
    assert_eq!(run.state(), PipelineState::Validated);
    assert_eq!(run.faults.as_ref().unwrap().len(), 2);
    assert_eq!(run.synthesis.as_ref().unwrap().fragments.len(), 2);

    let snapshots = run.snapshots.as_ref().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].text, "def f():\n    return 1\n");
    assert_eq!(
        run.final_patch().unwrap(),
        "def f():\n    \"\"\"Return one.\"\"\"\n    return 1\n"
    );

    let prompts = generator.prompts();
    // Single chunk: the first call is the analysis, no consolidation call.
    assert!(prompts[0].contains("def f(): pass"));
    assert!(prompts[1].starts_with("You are an expert software engineer"));
    assert!(prompts[1].contains("#### Fault 1:"));
    assert!(prompts[1].contains("def f(): pass"));
    // The second integration starts from the first snapshot, not the original file.
    assert!(prompts[4].contains("Current code:\ndef f():\n    return 1\n"));
    assert!(!prompts[4].contains("def f(): pass"));
    assert!(prompts[5].contains("\"\"\"Return one.\"\"\""));

    let validation = run.validation.as_ref().unwrap();
    assert_eq!(validation.status, ValidationStatus::Good);
    assert_eq!(validation.explanation, "Both faults fixed.");
    assert!(pipeline.index().is_empty());
}

#[tokio::test]
async fn validated_run_requires_reinitialize() {
    let temp = TempDir::new().unwrap();
    let script = [
        "#### Fault 1:\n- no return",
        "```python\nreturn 1\n```",
        "```python\ndef f():\n    return 1\n```",
        "**Status:** GOOD\n\n**Issues:**\nNone",
    ];
    let responses: Vec<&str> = script.iter().chain(script.iter()).copied().collect();
    let (mut pipeline, generator) = orchestrator(temp.path(), &responses).await;

    pipeline
        .initialize(SourceFile::new("f.py", "def f(): pass"))
        .await
        .unwrap();
    pipeline.run_all().await.unwrap();
    assert!(pipeline.index().is_empty());

    let err = pipeline.run_all().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageOrder {
            missing: "a re-initialized source file",
            ..
        }
    ));
    assert!(matches!(
        pipeline.localize().await,
        Err(PipelineError::StageOrder { .. })
    ));
    assert_eq!(generator.call_count(), 4);
    // Results of the finished run stay readable
    assert_eq!(pipeline.state(), Some(PipelineState::Validated));

    pipeline
        .initialize(SourceFile::new("f.py", "def f(): pass"))
        .await
        .unwrap();
    let output = pipeline.run_all().await.unwrap();
    assert_eq!(output, "### Status: GOOD\n\n### Overview:\n\nNone");
    assert_eq!(generator.call_count(), 8);
}

#[tokio::test]
async fn stages_require_their_predecessor() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, generator) = orchestrator(temp.path(), &[]).await;

    assert!(matches!(
        pipeline.localize().await,
        Err(PipelineError::StageOrder { .. })
    ));

    pipeline
        .initialize(SourceFile::new("lib.rs", "pub fn add(a: u8, b: u8) -> u8 { a + b }"))
        .await
        .unwrap();
    assert!(matches!(
        pipeline.match_patterns().await,
        Err(PipelineError::StageOrder { .. })
    ));
    assert!(matches!(
        pipeline.generate_patches().await,
        Err(PipelineError::StageOrder { .. })
    ));
    assert!(matches!(
        pipeline.validate().await,
        Err(PipelineError::StageOrder { .. })
    ));
    assert!(matches!(
        pipeline.repair_final_patch().await,
        Err(PipelineError::StageOrder { .. })
    ));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn fault_free_report_validates_original() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, generator) = orchestrator(
        temp.path(),
        &[
            "The code appears to be fault-free.",
            "**Status:** GOOD\n\n**Issues:**\nNone",
        ],
    )
    .await;

    pipeline
        .initialize(SourceFile::new("ok.py", "def ok():\n    return True\n"))
        .await
        .unwrap();
    pipeline.localize().await.unwrap();
    assert_eq!(pipeline.match_patterns().await.unwrap(), "No faults to address.");
    pipeline.generate_patches().await.unwrap();
    assert_eq!(pipeline.state(), Some(PipelineState::Patched));

    pipeline.validate().await.unwrap();
    assert_eq!(generator.call_count(), 2);
    assert!(generator.prompts()[1].contains("def ok():\n    return True\n"));
}

#[tokio::test]
async fn backend_failure_surfaces_from_run_all() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, _generator) = orchestrator(temp.path(), &[REPORT]).await;
    pipeline
        .initialize(SourceFile::new("f.py", "def f(): pass"))
        .await
        .unwrap();

    // Synthesis aborts on the first fault once the script runs out.
    let err = pipeline.run_all().await.unwrap_err();
    assert!(matches!(err, PipelineError::Backend(_)));
    let run = pipeline.run().unwrap();
    assert_eq!(run.state(), PipelineState::Localized);
    assert!(run.synthesis.is_none());
    assert!(!pipeline.index().is_empty());
}

#[tokio::test]
async fn empty_source_rejected() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, _generator) = orchestrator(temp.path(), &[]).await;
    assert!(matches!(
        pipeline.initialize(SourceFile::new("empty.py", "  \n")).await,
        Err(PipelineError::EmptyInput(_))
    ));
    assert!(pipeline.run().is_none());
}

#[tokio::test]
async fn repair_appends_snapshot_and_abandon_clears_index() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, _generator) = orchestrator(
        temp.path(),
        &[
            "#### Fault 1:\n- syntax",
            "```python\nreturn 1\n```",
            "```python\ndef f(:\n    return 1\n```",
            "```python\ndef f():\n    return 1\n```",
        ],
    )
    .await;
    pipeline
        .initialize(SourceFile::new("f.py", "def f(): pass"))
        .await
        .unwrap();
    pipeline.localize().await.unwrap();
    pipeline.match_patterns().await.unwrap();
    pipeline.generate_patches().await.unwrap();

    let output = pipeline.repair_final_patch().await.unwrap();
    assert!(output.contains("def f():\n    return 1\n"));
    let run = pipeline.run().unwrap();
    assert_eq!(run.snapshots.as_ref().unwrap().len(), 2);
    assert_eq!(run.final_patch().unwrap(), "def f():\n    return 1\n");

    pipeline.abandon().await.unwrap();
    assert!(pipeline.run().is_none());
    assert!(pipeline.index().is_empty());
}

#[tokio::test]
async fn reinitialize_replaces_index_contents() {
    let temp = TempDir::new().unwrap();
    let (mut pipeline, _generator) = orchestrator(temp.path(), &[]).await;

    pipeline
        .initialize(SourceFile::new("a.py", "def a():\n    return 'a'\n"))
        .await
        .unwrap();
    pipeline
        .initialize(SourceFile::new("b.py", "def b():\n    return 'b'\n"))
        .await
        .unwrap();

    assert!(pipeline
        .index()
        .chunks()
        .iter()
        .all(|c| c.metadata.source_file == "b.py"));
}
