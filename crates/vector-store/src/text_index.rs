use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatL2Index;
use crate::types::{ChunkMetadata, FileContent, IndexedChunk, RetrievedChunk};
use patchwise_code_chunker::{language_tag, Chunker};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    schema_version: u32,
    dimension: usize,
    model_id: String,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<IndexedChunk>,
}

/// Persistent semantic index over code chunks.
///
/// Slot `i` of the vector index always corresponds to `chunks[i]`; every
/// mutation rewrites the whole blob at `path` before returning.
pub struct TextIndex {
    embedder: EmbeddingModel,
    chunker: Chunker,
    index: FlatL2Index,
    chunks: Vec<IndexedChunk>,
    path: PathBuf,
}

impl TextIndex {
    /// Open the index stored at `path`.
    ///
    /// A missing or unreadable blob starts an empty index, and so does a blob
    /// written with a different vector dimension.
    pub async fn open(
        path: impl AsRef<Path>,
        embedder: EmbeddingModel,
        chunker: Chunker,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dimension = embedder.dimension();
        let mut this = Self {
            embedder,
            chunker,
            index: FlatL2Index::new(dimension),
            chunks: Vec::new(),
            path,
        };

        match this.load().await {
            Ok(Some(persisted)) if persisted.dimension != dimension => {
                log::warn!(
                    "Ignoring index at {}: built with dimension {}, embedder has {dimension}",
                    this.path.display(),
                    persisted.dimension
                );
            }
            Ok(Some(persisted)) => {
                if persisted.model_id != this.embedder.model_id() {
                    log::warn!(
                        "Index at {} was built with '{}', now embedding with '{}'",
                        this.path.display(),
                        persisted.model_id,
                        this.embedder.model_id()
                    );
                }
                this.index = FlatL2Index::from_vectors(dimension, persisted.vectors)?;
                this.chunks = persisted.chunks;
                log::info!(
                    "Loaded index with {} chunks from {}",
                    this.chunks.len(),
                    this.path.display()
                );
            }
            Ok(None) => {
                log::debug!("No index at {}, starting empty", this.path.display());
            }
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable index at {}: {e}",
                    this.path.display()
                );
            }
        }

        Ok(this)
    }

    async fn load(&self) -> Result<Option<PersistedIndex>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedIndex = serde_json::from_str(&data)?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(VectorStoreError::EmbeddingError(format!(
                "unsupported index schema_version {}",
                persisted.schema_version
            )));
        }
        if persisted.vectors.len() != persisted.chunks.len() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "index holds {} vectors but {} chunks",
                persisted.vectors.len(),
                persisted.chunks.len()
            )));
        }
        Ok(Some(persisted))
    }

    async fn save(&self) -> Result<()> {
        let persisted = PersistedIndex {
            schema_version: SCHEMA_VERSION,
            dimension: self.index.dimension(),
            model_id: self.embedder.model_id().to_string(),
            vectors: self.index.vectors().to_vec(),
            chunks: self.chunks.clone(),
        };
        let bytes = serde_json::to_vec(&persisted)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("index");
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        log::debug!(
            "Persisted {} chunks to {}",
            self.chunks.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Chunk, embed and append `files`, then persist.
    ///
    /// Returns the number of chunks added.
    pub async fn embed(&mut self, files: &[FileContent]) -> Result<usize> {
        let mut pending = Vec::new();
        for file in files {
            let language = language_tag(&file.filename);
            let windows = self.chunker.split(&file.content, &language)?;
            log::debug!("{}: {} chunks ({language})", file.filename, windows.len());
            pending.extend(windows.into_iter().enumerate().map(|(ordinal, text)| {
                IndexedChunk {
                    text,
                    metadata: ChunkMetadata {
                        source_file: file.filename.clone(),
                        ordinal,
                        approx_start_line: self.chunker.approx_start_line(ordinal),
                        language: language.clone(),
                    },
                }
            }));
        }

        if pending.is_empty() {
            return Err(VectorStoreError::EmptyInput);
        }

        let texts: Vec<&str> = pending.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.len() != pending.len() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                pending.len(),
                vectors.len()
            )));
        }

        // Validate every vector before touching the index so a bad batch leaves it intact.
        let dimension = self.index.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let added = pending.len();
        for (chunk, vector) in pending.into_iter().zip(vectors) {
            self.index.add(vector)?;
            self.chunks.push(chunk);
        }

        self.save().await?;
        log::info!(
            "Embedded {added} chunks from {} files (total {})",
            files.len(),
            self.chunks.len()
        );
        Ok(added)
    }

    /// Up to `k` chunks nearest to `query`, best first
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.index.is_empty() {
            return Err(VectorStoreError::IndexNotReady);
        }

        let query_vector = self.embedder.embed(query).await?;
        let neighbors = self.index.search(&query_vector, k)?;

        let mut results = Vec::with_capacity(neighbors.len());
        for (slot, distance) in neighbors {
            let Some(chunk) = self.chunks.get(slot) else {
                log::warn!("Skipping neighbor {slot}: outside chunk range {}", self.chunks.len());
                continue;
            };
            results.push(RetrievedChunk {
                chunk_text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                similarity_score: 1.0 / (1.0 + distance),
            });
        }

        if results.is_empty() {
            return Err(VectorStoreError::NoResults);
        }
        log::debug!("Retrieved {} chunks for query", results.len());
        Ok(results)
    }

    /// Drop every chunk and persist the empty index
    pub async fn clear(&mut self) -> Result<()> {
        let had = self.chunks.len();
        self.index.clear();
        self.chunks.clear();
        self.save().await?;
        if had > 0 {
            log::info!("Cleared {had} chunks from {}", self.path.display());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub const fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }
}
