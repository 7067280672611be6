//! # Patchwise Vector Store
//!
//! Semantic storage and retrieval over code chunks for the repair pipeline.
//!
//! ## Architecture
//!
//! ```text
//! FileContent[]
//!     │
//!     ├──> Chunker (character windows, per-language)
//!     │
//!     ├──> Embedding Model (ONNX Runtime, or hash stub)
//!     │      └─> Vector[384]
//!     │
//!     ├──> Flat L2 Index
//!     │      └─> Exact k-NN, score = 1 / (1 + d)
//!     │
//!     └──> Persistent Storage
//!            └─> Single JSON blob, rewritten atomically
//! ```
//!
//! Set `PATCHWISE_EMBEDDING_MODE=stub` to run without model files.
//!
//! ## Example
//!
//! ```no_run
//! use patchwise_code_chunker::{Chunker, ChunkerConfig};
//! use patchwise_vector_store::{EmbeddingModel, FileContent, TextIndex};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let chunker = Chunker::new(ChunkerConfig::default())?;
//!     let mut index = TextIndex::open("code_index.json", EmbeddingModel::new()?, chunker).await?;
//!
//!     index.embed(&[FileContent::new("main.py", "def main():\n    pass\n")]).await?;
//!
//!     for hit in index.retrieve("entry point", 5).await? {
//!         let meta = &hit.metadata;
//!         println!("{}#{}: {:.3}", meta.source_file, meta.ordinal, hit.similarity_score);
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod flat_index;
mod text_index;
mod types;

pub use embeddings::{model_dir, EmbeddingModel, DEFAULT_DIMENSION, DEFAULT_MODEL_ID};
pub use error::{Result, VectorStoreError};
pub use flat_index::FlatL2Index;
pub use text_index::{TextIndex, DEFAULT_TOP_K};
pub use types::{ChunkMetadata, FileContent, IndexedChunk, RetrievedChunk};
