//! Tokenizer implementations.
//!
//! [`PlainTokenizer`] splits on Unicode word boundaries (UAX #29) and
//! lowercases each segment; it is the default for indexed string properties
//! and for query text. [`VerbatimTokenizer`] emits the whole input as one
//! token, for properties that should match only as an exact unit.

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::token::Token;
use crate::error::Result;

/// A tokenizer converts a string into an ordered sequence of normalized
/// tokens with byte offsets into the original text.
pub trait Tokenizer: Send + Sync + std::fmt::Debug {
    /// Tokenize the given text.
    fn tokenize(&self, text: &str) -> Result<Vec<Token>>;

    /// Get the name of this tokenizer.
    fn name(&self) -> &'static str;
}

/// A tokenizer that splits text on Unicode word boundaries and lowercases.
///
/// Non-word segments (punctuation, whitespace) are dropped. Offsets refer to
/// byte positions in the original, un-normalized text.
#[derive(Clone, Debug, Default)]
pub struct PlainTokenizer;

impl PlainTokenizer {
    /// Create a new plain tokenizer.
    pub fn new() -> Self {
        PlainTokenizer
    }
}

impl Tokenizer for PlainTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        for (start, word) in text.unicode_word_indices() {
            tokens.push(Token::new(
                word.to_lowercase(),
                start,
                start + word.len(),
            ));
        }

        Ok(tokens)
    }

    fn name(&self) -> &'static str {
        "plain"
    }
}

/// A tokenizer that emits the entire input as a single lowercased token.
#[derive(Clone, Debug, Default)]
pub struct VerbatimTokenizer;

impl VerbatimTokenizer {
    /// Create a new verbatim tokenizer.
    pub fn new() -> Self {
        VerbatimTokenizer
    }
}

impl Tokenizer for VerbatimTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Token::new(text.to_lowercase(), 0, text.len())])
    }

    fn name(&self) -> &'static str {
        "verbatim"
    }
}

/// Truncate a token's text to at most `max_len` bytes on a char boundary.
///
/// Over-long tokens are quietly shortened rather than rejected, both during
/// indexing and during query parsing, so a truncated index entry still
/// matches the same truncated query term.
pub fn truncate_token(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tokenizer_splits_and_lowercases() {
        let tokenizer = PlainTokenizer::new();
        let tokens = tokenizer.tokenize("Hello, World! Foo-bar").unwrap();

        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world", "foo", "bar"]);
    }

    #[test]
    fn test_plain_tokenizer_offsets() {
        let tokenizer = PlainTokenizer::new();
        let text = "message body";
        let tokens = tokenizer.tokenize(text).unwrap();

        assert_eq!(tokens.len(), 2);
        assert_eq!(&text[tokens[0].start_offset..tokens[0].end_offset], "message");
        assert_eq!(&text[tokens[1].start_offset..tokens[1].end_offset], "body");
    }

    #[test]
    fn test_plain_tokenizer_unicode() {
        let tokenizer = PlainTokenizer::new();
        let tokens = tokenizer.tokenize("café RÉSUMÉ").unwrap();

        assert_eq!(tokens[0].text, "café");
        assert_eq!(tokens[1].text, "résumé");
    }

    #[test]
    fn test_verbatim_tokenizer() {
        let tokenizer = VerbatimTokenizer::new();
        let tokens = tokenizer.tokenize("One Whole Value").unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "one whole value");
        assert_eq!(tokens[0].start_offset, 0);
        assert_eq!(tokens[0].end_offset, 15);

        assert!(tokenizer.tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_truncate_token() {
        assert_eq!(truncate_token("message", 3), "mes");
        assert_eq!(truncate_token("me", 3), "me");
        // Never splits a multi-byte char.
        assert_eq!(truncate_token("café", 4), "caf");
    }
}
