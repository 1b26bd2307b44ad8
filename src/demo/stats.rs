//! Word and character counting.

use serde::Serialize;

/// Counts shown for the current document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TextStats {
    /// Number of space-separated words
    pub words: usize,
    /// Number of characters
    pub chars: usize,
}

impl TextStats {
    /// Compute stats for a piece of text.
    pub fn of(text: &str) -> Self {
        Self {
            words: count_words(text),
            chars: text.chars().count(),
        }
    }
}

impl std::fmt::Display for TextStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} words, {} chars", self.words, self.chars)
    }
}

/// Count words in `text`.
///
/// Leading and trailing whitespace of any kind is ignored. Inside the text,
/// tabs and line breaks count as spaces and runs of spaces collapse into one
/// separator.
pub fn count_words(text: &str) -> usize {
    text.trim()
        .split(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n')
        .filter(|word| !word.is_empty())
        .count()
}
