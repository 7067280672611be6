use crate::error::{ChunkerError, Result};
use crate::language::Language;
use tree_sitter::Parser;

/// Cuts source text at the start of each top-level syntax node.
///
/// Gaps between nodes (blank lines, comments the grammar attaches to no node) stay
/// with the node that follows them, so concatenating the pieces yields the input.
pub(crate) struct StructuralSplitter {
    parser: Parser,
    language: Language,
}

impl StructuralSplitter {
    pub(crate) fn new(language: Language) -> Result<Self> {
        if !language.supports_ast() {
            return Err(ChunkerError::unsupported_language(language.as_str()));
        }

        let ts_language = language.tree_sitter_language()?;
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ChunkerError::tree_sitter(format!("Failed to set language: {e}")))?;

        Ok(Self { parser, language })
    }

    pub(crate) fn pieces<'t>(&mut self, content: &'t str) -> Result<Vec<&'t str>> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ChunkerError::parse("Failed to parse source code"))?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ChunkerError::parse(format!(
                "{} source has syntax errors",
                self.language.as_str()
            )));
        }

        let mut cursor = root.walk();
        let mut boundaries: Vec<usize> = root
            .children(&mut cursor)
            .map(|child| child.start_byte())
            .filter(|&offset| offset > 0 && offset < content.len())
            .collect();
        boundaries.dedup();

        let mut pieces = Vec::with_capacity(boundaries.len() + 1);
        let mut start = 0;
        for boundary in boundaries {
            let piece = content
                .get(start..boundary)
                .ok_or_else(|| ChunkerError::parse("node boundary is not a char boundary"))?;
            if !piece.is_empty() {
                pieces.push(piece);
            }
            start = boundary;
        }
        if let Some(tail) = content.get(start..) {
            if !tail.is_empty() {
                pieces.push(tail);
            }
        }

        log::debug!(
            "Structural split produced {} top-level pieces ({})",
            pieces.len(),
            self.language.as_str()
        );
        Ok(pieces)
    }
}
