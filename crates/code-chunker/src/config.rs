use serde::{Deserialize, Serialize};

/// Configuration for character-window chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum window length in characters
    pub chunk_size: usize,

    /// Characters shared between consecutive windows (must be < chunk_size)
    pub chunk_overlap: usize,

    /// Lines attributed to each window when computing the approximate start line
    pub line_span: usize,

    /// Try tree-sitter boundaries before separator splitting
    pub structural: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            line_span: 10,
            structural: true,
        }
    }
}

impl ChunkerConfig {
    /// Config without the structural pass (separator splitting only)
    pub fn separators_only() -> Self {
        Self {
            structural: false,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be > 0".to_string());
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }

        Ok(())
    }
}
