/// Recursive separator splitter over character length.
///
/// Pieces shorter than `chunk_size` are merged into windows; longer pieces are split
/// again with the next separator. Separators stay attached to the start of the piece
/// that follows them so windows keep their leading keyword (`\ndef `, `\nfn `, ...).
pub(crate) struct SeparatorSplitter<'a> {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &'a [&'a str],
}

impl<'a> SeparatorSplitter<'a> {
    pub(crate) fn new(chunk_size: usize, chunk_overlap: usize, separators: &'a [&'a str]) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators,
        }
    }

    pub(crate) fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, self.separators)
    }

    /// Merge pre-split pieces, splitting the oversized ones with the configured separators.
    pub(crate) fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending));
                pending.clear();
            }
            out.extend(self.split(piece));
        }
        if !pending.is_empty() {
            out.extend(self.merge(&pending));
        }
        out
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (idx, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[idx + 1..];
                break;
            }
        }

        let pieces = split_keep_separator(text, separator);
        let mut out = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                out.extend(self.merge(&pending));
                pending.clear();
            }
            if remaining.is_empty() {
                out.push(piece.to_string());
            } else {
                out.extend(self.split_with(piece, remaining));
            }
        }
        if !pending.is_empty() {
            out.extend(self.merge(&pending));
        }
        out
    }

    /// Greedily pack pieces into windows of at most `chunk_size` chars, carrying up to
    /// `chunk_overlap` chars of trailing pieces into the next window.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_window(&mut windows, &current);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let Some(first) = current.first() else {
                        break;
                    };
                    total -= char_len(first);
                    current.remove(0);
                }
            }
            current.push(piece);
            total += len;
        }
        push_window(&mut windows, &current);
        windows
    }
}

fn push_window(windows: &mut Vec<String>, pieces: &[&str]) {
    let joined: String = pieces.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` before every occurrence of `separator`; the empty separator splits
/// into single characters.
fn split_keep_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GENERIC: &[&str] = &["\n\n", "\n", " ", ""];

    #[test]
    fn split_keeps_separator_at_piece_start() {
        let pieces = split_keep_separator("a\nb\nc", "\n");
        assert_eq!(pieces, vec!["a", "\nb", "\nc"]);
        let chars = split_keep_separator("hé", "");
        assert_eq!(chars, vec!["h", "é"]);
    }

    #[test]
    fn short_text_is_single_window() {
        let splitter = SeparatorSplitter::new(100, 10, GENERIC);
        assert_eq!(splitter.split("hello world"), vec!["hello world".to_string()]);
    }

    #[test]
    fn windows_respect_chunk_size() {
        let text = (0..200)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = SeparatorSplitter::new(50, 10, GENERIC);
        let windows = splitter.split(&text);
        assert!(windows.len() > 1);
        for window in &windows {
            assert!(char_len(window) <= 50, "window too long: {window:?}");
        }
    }

    #[test]
    fn consecutive_windows_overlap() {
        let text = (0..40)
            .map(|i| format!("w{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = SeparatorSplitter::new(20, 8, GENERIC);
        let windows = splitter.split(&text);
        assert!(windows.len() > 2);
        for pair in windows.windows(2) {
            let last_word = pair[0].split(' ').next_back().unwrap_or_default();
            assert!(
                pair[1].contains(last_word),
                "expected {:?} to carry over into {:?}",
                last_word,
                pair[1]
            );
        }
    }

    #[test]
    fn unbreakable_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let splitter = SeparatorSplitter::new(10, 0, GENERIC);
        let windows = splitter.split(&text);
        assert_eq!(windows, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        let splitter = SeparatorSplitter::new(10, 0, GENERIC);
        assert!(splitter.split("   \n\n  ").is_empty());
    }
}
