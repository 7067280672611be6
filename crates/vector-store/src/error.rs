use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("No chunks could be produced from the given files")]
    EmptyInput,

    #[error("Index is empty; embed files before querying")]
    IndexNotReady,

    #[error("No valid results for query")]
    NoResults,

    #[error("Chunking error: {0}")]
    ChunkerError(#[from] patchwise_code_chunker::ChunkerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}
