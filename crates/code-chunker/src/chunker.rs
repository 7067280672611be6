use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::language::Language;
use crate::splitter::SeparatorSplitter;
use crate::structural::StructuralSplitter;

/// Character-window chunker used to build the retrieval index
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker; rejects `chunk_overlap >= chunk_size`
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::invalid_config)?;
        Ok(Self { config })
    }

    /// Split `content` into overlapping windows, using the language behind `language_tag`.
    ///
    /// Empty or whitespace-only content yields no windows.
    pub fn split(&self, content: &str, language_tag: &str) -> Result<Vec<String>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let language = Language::from_tag(language_tag);
        if language == Language::Unknown {
            log::warn!(
                "Language '{language_tag}' not supported, falling back to generic text splitting"
            );
        }

        let separators = language.separators();
        let splitter = SeparatorSplitter::new(
            self.config.chunk_size,
            self.config.chunk_overlap,
            &separators,
        );

        if self.config.structural && language.supports_ast() {
            match self.split_structural(&splitter, content, language) {
                Ok(windows) => return Ok(windows),
                Err(e) => {
                    log::warn!("Structural splitting failed, falling back to separators: {e}");
                }
            }
        }

        let windows = splitter.split(content);
        log::debug!(
            "Split {} chars into {} windows ({})",
            content.len(),
            windows.len(),
            language.as_str()
        );
        Ok(windows)
    }

    fn split_structural(
        &self,
        splitter: &SeparatorSplitter<'_>,
        content: &str,
        language: Language,
    ) -> Result<Vec<String>> {
        let mut structural = StructuralSplitter::new(language)?;
        let pieces = structural.pieces(content)?;
        Ok(splitter.merge_pieces(&pieces))
    }

    /// Approximate start line of the window at `ordinal`
    #[must_use]
    pub const fn approx_start_line(&self, ordinal: usize) -> usize {
        ordinal * self.config.line_span
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}
