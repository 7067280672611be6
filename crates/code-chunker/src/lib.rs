//! # Patchwise Code Chunker
//!
//! Splits source files into the two kinds of chunks the repair pipeline needs.
//!
//! ## Character windows (retrieval)
//!
//! Overlapping windows bounded by character length, used as the unit of embedding.
//! A structural pass is tried first for languages with a tree-sitter grammar, then
//! language separators, then the generic `\n\n` / `\n` / ` ` / char fallback.
//!
//! ```text
//! Source Text + Language Tag
//!     │
//!     ├──> Structural boundaries (tree-sitter top-level items)
//!     │
//!     ├──> Recursive separator splitting (oversized pieces)
//!     │
//!     └──> Window merge with overlap
//!          └─> Vec<String>
//! ```
//!
//! ## Token windows (analysis)
//!
//! Contiguous, non-overlapping token slices sized against a model's response budget,
//! so analysis prompts never ask for more than the backend can return.
//!
//! ## Example
//!
//! ```rust
//! use patchwise_code_chunker::{Chunker, ChunkerConfig, CodepointCodec, TokenBudgetedChunker};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let windows = chunker.split("def f():\n    return 1\n", "PY").unwrap();
//! assert_eq!(windows.len(), 1);
//!
//! let codec = CodepointCodec;
//! let slices = TokenBudgetedChunker::new(&codec).chunk("abcdef", 4).unwrap();
//! assert_eq!(slices.len(), 2);
//! ```

mod chunker;
mod config;
mod error;
mod language;
mod splitter;
mod structural;
mod token_window;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use language::{language_tag, Language, GENERIC_TAG};
pub use token_window::{CodepointCodec, HfTokenizer, TokenBudgetedChunker, TokenCodec, TokenWindow};
