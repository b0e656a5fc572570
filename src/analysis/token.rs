//! Token types for text analysis.

use serde::{Deserialize, Serialize};

/// A token produced by a tokenizer.
///
/// Carries the normalized text plus the byte range it was extracted from in
/// the original input, so snippet windows can point back into the source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The normalized text content of the token.
    pub text: String,

    /// The byte offset where this token starts in the original text.
    pub start_offset: usize,

    /// The byte offset just past the end of this token in the original text.
    pub end_offset: usize,
}

impl Token {
    /// Create a new token.
    pub fn new<S: Into<String>>(text: S, start_offset: usize, end_offset: usize) -> Self {
        Token {
            text: text.into(),
            start_offset,
            end_offset,
        }
    }

    /// Get the length of the token text in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Check if the token is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}..{}", self.text, self.start_offset, self.end_offset)
    }
}
