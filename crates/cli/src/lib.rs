use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use patchwise_code_chunker::Chunker;
use patchwise_pipeline::{
    HttpGenerator, ModelSession, PipelineConfig, PipelineOrchestrator, ScriptedGenerator,
    SourceFile, TextGenerator,
};
use patchwise_vector_store::{EmbeddingModel, TextIndex, DEFAULT_TOP_K};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod report;

#[derive(Parser)]
#[command(name = "patchwise")]
#[command(about = "Retrieval-augmented fault localization and repair", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Pipeline config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replay model responses from a JSON array instead of calling the provider
    #[arg(long, global = true)]
    responses: Option<PathBuf>,

    /// Override embedding backend in this process
    #[arg(long, global = true, value_enum)]
    embed_mode: Option<EmbedMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the persisted chunk index directly
    Index(IndexArgs),

    /// Run every stage on a file and print the review
    Run(RunArgs),

    /// Run the stages in order up to the named one and print its output
    Stage(StageArgs),
}

#[derive(Args)]
struct IndexArgs {
    #[command(subcommand)]
    action: IndexAction,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Chunk, embed and append files to the index
    Embed {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Nearest chunks for a query
    Query {
        text: String,

        /// Number of neighbors
        #[arg(short, long, default_value_t = DEFAULT_TOP_K)]
        k: usize,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every chunk and vector
    Clear,
}

#[derive(Args)]
struct RunArgs {
    /// Source file to repair
    file: PathBuf,

    /// Ask the model to fix syntax errors in the final patch before validating
    #[arg(long)]
    repair_syntax: bool,

    /// Output the whole run as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StageArgs {
    #[arg(value_enum)]
    stage: StageName,

    /// Source file to repair
    file: PathBuf,

    /// Output the run state as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum StageName {
    Localize,
    Match,
    Patch,
    Validate,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EmbedMode {
    Fast,
    Stub,
}

impl EmbedMode {
    const fn as_str(self) -> &'static str {
        match self {
            EmbedMode::Fast => "fast",
            EmbedMode::Stub => "stub",
        }
    }
}

#[derive(Serialize)]
struct EmbedOutput {
    files: usize,
    chunks_added: usize,
    total_chunks: usize,
    index_path: PathBuf,
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    if let Some(mode) = cli.embed_mode {
        env::set_var("PATCHWISE_EMBEDDING_MODE", mode.as_str());
    }

    // Keep stdout clean for JSON consumers
    let json_output = match &cli.command {
        Commands::Index(args) => match &args.action {
            IndexAction::Embed { json, .. } | IndexAction::Query { json, .. } => *json,
            IndexAction::Clear => false,
        },
        Commands::Run(args) => args.json,
        Commands::Stage(args) => args.json,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ORT is extremely noisy
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Index(args) => run_index(args.action, &config).await?,
        Commands::Run(args) => run_pipeline(args, &config, cli.responses.as_deref()).await?,
        Commands::Stage(args) => run_stage(args, &config, cli.responses.as_deref()).await?,
    }

    Ok(())
}

async fn open_index(config: &PipelineConfig) -> Result<TextIndex> {
    let embedder = EmbeddingModel::new().context("Failed to load embedding model")?;
    let chunker = Chunker::new(config.chunker_config()).context("Invalid chunker settings")?;
    TextIndex::open(&config.index_path, embedder, chunker)
        .await
        .with_context(|| format!("Failed to open index {}", config.index_path.display()))
}

async fn run_index(action: IndexAction, config: &PipelineConfig) -> Result<()> {
    let mut index = open_index(config).await?;

    match action {
        IndexAction::Embed { files, json } => {
            let mut contents = Vec::with_capacity(files.len());
            for path in &files {
                let source = SourceFile::from_path(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                contents.push(source.to_file_content());
            }
            let added = index.embed(&contents).await.context("Embedding failed")?;
            let output = EmbedOutput {
                files: files.len(),
                chunks_added: added,
                total_chunks: index.len(),
                index_path: index.path().to_path_buf(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "Indexed {} chunks from {} files ({} total) into {}",
                    output.chunks_added,
                    output.files,
                    output.total_chunks,
                    output.index_path.display()
                );
            }
        }
        IndexAction::Query { text, k, json } => {
            let hits = index.retrieve(&text, k).await.context("Query failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print!("{}", report::render_hits(&hits));
            }
        }
        IndexAction::Clear => {
            index.clear().await.context("Failed to clear index")?;
            println!("Cleared index {}", index.path().display());
        }
    }

    Ok(())
}

fn build_generator(
    config: &PipelineConfig,
    responses: Option<&Path>,
) -> Result<Arc<dyn TextGenerator>> {
    match responses {
        Some(path) => {
            log::info!("Replaying model responses from {}", path.display());
            let scripted = ScriptedGenerator::from_file(path)
                .with_context(|| format!("Failed to load responses {}", path.display()))?;
            Ok(Arc::new(scripted))
        }
        None => {
            let http = HttpGenerator::from_config(&config.backend)
                .context("Failed to configure generation backend")?;
            Ok(Arc::new(http))
        }
    }
}

async fn start_run(
    file: &Path,
    config: &PipelineConfig,
    responses: Option<&Path>,
) -> Result<PipelineOrchestrator> {
    let source = SourceFile::from_path(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let generator = build_generator(config, responses)?;
    let session = ModelSession::from_config(config, generator)?;
    let index = open_index(config).await?;

    let mut orchestrator = PipelineOrchestrator::new(session, index, config);
    let summary = orchestrator.initialize(source).await?;
    log::debug!("{summary}");
    Ok(orchestrator)
}

async fn run_pipeline(
    args: RunArgs,
    config: &PipelineConfig,
    responses: Option<&Path>,
) -> Result<()> {
    let mut orchestrator = start_run(&args.file, config, responses).await?;

    let review = if args.repair_syntax {
        orchestrator.localize().await?;
        orchestrator.match_patterns().await?;
        orchestrator.generate_patches().await?;
        orchestrator.repair_final_patch().await?;
        orchestrator.validate().await?
    } else {
        orchestrator.run_all().await?
    };

    let run = orchestrator
        .run()
        .context("Pipeline finished without an active run")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(run)?);
    } else {
        println!("{}", report::render_run(run, &review));
    }
    Ok(())
}

async fn run_stage(
    args: StageArgs,
    config: &PipelineConfig,
    responses: Option<&Path>,
) -> Result<()> {
    let mut orchestrator = start_run(&args.file, config, responses).await?;

    let mut output = orchestrator.localize().await?;
    if args.stage >= StageName::Match {
        output = orchestrator.match_patterns().await?;
    }
    if args.stage >= StageName::Patch {
        output = orchestrator.generate_patches().await?;
    }
    if args.stage >= StageName::Validate {
        output = orchestrator.validate().await?;
    } else {
        // The index only lives for one run
        orchestrator.abandon().await?;
    }

    if args.json {
        // `abandon` drops the run, so report the stage output alone
        let body = serde_json::json!({
            "stage": args.stage.to_possible_value().map(|v| v.get_name().to_string()),
            "output": output,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{output}");
    }
    Ok(())
}
