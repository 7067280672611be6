use serde::{Deserialize, Serialize};

/// A named blob of source text handed to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub filename: String,
    pub content: String,
}

impl FileContent {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    /// Position of the chunk within its source file
    pub ordinal: usize,
    /// Coarse locator, `ordinal * line_span`
    pub approx_start_line: usize,
    pub language: String,
}

/// Chunk text plus metadata; one per slot in the vector index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_text: String,
    pub metadata: ChunkMetadata,
    /// `1 / (1 + d)` for squared L2 distance `d`
    pub similarity_score: f32,
}
