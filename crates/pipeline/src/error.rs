use patchwise_code_chunker::ChunkerError;
use patchwise_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Cannot run {stage}: {missing} is not available yet")]
    StageOrder {
        stage: &'static str,
        missing: &'static str,
    },

    #[error("Source file '{0}' is empty")]
    EmptyInput(String),

    #[error(transparent)]
    Index(#[from] VectorStoreError),

    #[error(transparent)]
    Chunking(#[from] ChunkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}
