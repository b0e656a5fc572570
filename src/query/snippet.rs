//! Snippet computation: windows around query matches.
//!
//! Snippets are computed from the stored document text, not the index: the
//! property values are re-tokenized and every token is compared against the
//! query terms, so offsets always refer to the text as stored.

use crate::analysis::{PlainTokenizer, Token, Tokenizer};
use crate::document::Document;
use crate::error::Result;
use crate::query::parser::ParsedQuery;
use crate::query::ResultSpec;
use crate::schema::{SectionMetadata, TermMatchType};

/// One match inside one property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnippetMatch {
    /// Which value of the (possibly repeated) property matched.
    pub value_index: usize,
    /// Byte offset of the matched token in the value.
    pub exact_match_byte_start: usize,
    /// Byte length of the matched token.
    pub exact_match_byte_len: usize,
    /// Byte offset of the window around the match.
    pub window_byte_start: usize,
    /// Byte length of the window.
    pub window_byte_len: usize,
}

/// All matches of one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnippetEntry {
    /// The property the matches were found in.
    pub property_name: String,
    /// The matches, in text order, capped by the result spec.
    pub matches: Vec<SnippetMatch>,
}

/// Compute snippet entries for one document.
///
/// Only indexed string properties participate; a property with no match
/// produces no entry. Terms are expected pre-normalized (and pre-truncated)
/// the way the query pipeline matched them.
pub fn compute_snippets(
    document: &Document,
    sections: &[SectionMetadata],
    parsed: &ParsedQuery,
    term_match_type: TermMatchType,
    result_spec: &ResultSpec,
    tokenizer: &PlainTokenizer,
) -> Result<Vec<SnippetEntry>> {
    let mut entries = Vec::new();
    if parsed.terms.is_empty() || result_spec.num_matches_per_property == 0 {
        return Ok(entries);
    }

    for section in sections {
        let applicable: Vec<&str> = parsed
            .terms
            .iter()
            .filter(|term| {
                term.property_restrict
                    .as_deref()
                    .map(|p| p == section.property_name)
                    .unwrap_or(true)
            })
            .map(|term| term.text.as_str())
            .collect();
        if applicable.is_empty() {
            continue;
        }

        let mut matches = Vec::new();
        'values: for (value_index, value) in
            document.string_values(&section.property_name).iter().enumerate()
        {
            let tokens = tokenizer.tokenize(value)?;
            for (token_index, token) in tokens.iter().enumerate() {
                let is_match = applicable.iter().any(|term| match term_match_type {
                    TermMatchType::Prefix => token.text.starts_with(term),
                    _ => token.text == *term,
                });
                if !is_match {
                    continue;
                }

                let (window_start, window_end) = window_around(
                    &tokens,
                    token_index,
                    value.len(),
                    result_spec.max_window_bytes as usize,
                );
                matches.push(SnippetMatch {
                    value_index,
                    exact_match_byte_start: token.start_offset,
                    exact_match_byte_len: token.end_offset - token.start_offset,
                    window_byte_start: window_start,
                    window_byte_len: window_end - window_start,
                });
                if matches.len() >= result_spec.num_matches_per_property as usize {
                    break 'values;
                }
            }
        }

        if !matches.is_empty() {
            entries.push(SnippetEntry {
                property_name: section.property_name.clone(),
                matches,
            });
        }
    }

    Ok(entries)
}

/// A window of at most `max_window_bytes` centered on the matched token,
/// rounded inward to token boundaries.
fn window_around(
    tokens: &[Token],
    match_index: usize,
    value_len: usize,
    max_window_bytes: usize,
) -> (usize, usize) {
    let matched = &tokens[match_index];
    if max_window_bytes == 0 || matched.end_offset - matched.start_offset >= max_window_bytes {
        // Degenerate window: the match itself, capped at the budget.
        let end = if max_window_bytes == 0 {
            matched.end_offset
        } else {
            matched.end_offset.min(matched.start_offset + max_window_bytes)
        };
        return (matched.start_offset, end);
    }

    let center = (matched.start_offset + matched.end_offset) / 2;
    let mut ideal_end = (center + max_window_bytes / 2).min(value_len);
    let ideal_start = ideal_end.saturating_sub(max_window_bytes);
    ideal_end = (ideal_start + max_window_bytes).min(value_len);

    // Round inward to token boundaries; the match token is always covered.
    let window_start = tokens
        .iter()
        .map(|t| t.start_offset)
        .find(|&start| start >= ideal_start)
        .unwrap_or(matched.start_offset)
        .min(matched.start_offset);
    let window_end = tokens
        .iter()
        .rev()
        .map(|t| t.end_offset)
        .find(|&end| end <= ideal_end)
        .unwrap_or(matched.end_offset)
        .max(matched.end_offset);

    (window_start, window_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;
    use crate::schema::{StringIndexingConfig, TokenizerKind};

    fn sections(names: &[&str]) -> Vec<SectionMetadata> {
        names
            .iter()
            .enumerate()
            .map(|(id, name)| SectionMetadata {
                id: id as u8,
                property_name: name.to_string(),
                indexing: StringIndexingConfig {
                    term_match_type: TermMatchType::Prefix,
                    tokenizer: TokenizerKind::Plain,
                },
            })
            .collect()
    }

    fn spec(num_matches: u32, window: u32) -> ResultSpec {
        ResultSpec {
            num_per_page: 10,
            num_to_snippet: 10,
            num_matches_per_property: num_matches,
            max_window_bytes: window,
        }
    }

    fn doc(body: &str) -> Document {
        Document::builder("ns", "uri1", "email")
            .string_property("body", body)
            .build()
    }

    #[test]
    fn test_exact_match_positions() {
        let tokenizer = PlainTokenizer::new();
        let parsed = parse_query("body", &tokenizer).unwrap();
        let document = doc("message body content");

        let entries = compute_snippets(
            &document,
            &sections(&["body"]),
            &parsed,
            TermMatchType::ExactOnly,
            &spec(5, 64),
            &tokenizer,
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].property_name, "body");
        let m = entries[0].matches[0];
        assert_eq!(m.exact_match_byte_start, 8);
        assert_eq!(m.exact_match_byte_len, 4);
        // The whole value fits in the window.
        assert_eq!(m.window_byte_start, 0);
        assert_eq!(m.window_byte_len, 20);
    }

    #[test]
    fn test_window_is_bounded_and_token_aligned() {
        let tokenizer = PlainTokenizer::new();
        let parsed = parse_query("eee", &tokenizer).unwrap();
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh iiii";
        let document = doc(text);

        let entries = compute_snippets(
            &document,
            &sections(&["body"]),
            &parsed,
            TermMatchType::Prefix,
            &spec(1, 14),
            &tokenizer,
        )
        .unwrap();

        let m = entries[0].matches[0];
        assert!(m.window_byte_len <= 14);
        // The window covers the match.
        assert!(m.window_byte_start <= m.exact_match_byte_start);
        assert!(
            m.window_byte_start + m.window_byte_len
                >= m.exact_match_byte_start + m.exact_match_byte_len
        );
        // Token-aligned: the window never starts or ends mid-token.
        let window_text =
            &text[m.window_byte_start..m.window_byte_start + m.window_byte_len];
        assert!(!window_text.starts_with(' '));
        assert!(!window_text.ends_with(' '));
    }

    #[test]
    fn test_match_cap_per_property() {
        let tokenizer = PlainTokenizer::new();
        let parsed = parse_query("spam", &tokenizer).unwrap();
        let document = doc("spam spam spam spam");

        let entries = compute_snippets(
            &document,
            &sections(&["body"]),
            &parsed,
            TermMatchType::ExactOnly,
            &spec(2, 64),
            &tokenizer,
        )
        .unwrap();
        assert_eq!(entries[0].matches.len(), 2);
    }

    #[test]
    fn test_property_restrict_limits_sections() {
        let tokenizer = PlainTokenizer::new();
        let parsed = parse_query("subject:hello", &tokenizer).unwrap();
        let document = Document::builder("ns", "uri1", "email")
            .string_property("body", "hello body")
            .string_property("subject", "hello subject")
            .build();

        let entries = compute_snippets(
            &document,
            &sections(&["body", "subject"]),
            &parsed,
            TermMatchType::ExactOnly,
            &spec(5, 64),
            &tokenizer,
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].property_name, "subject");
    }

    #[test]
    fn test_no_match_no_entry() {
        let tokenizer = PlainTokenizer::new();
        let parsed = parse_query("absent", &tokenizer).unwrap();
        let document = doc("nothing here");

        let entries = compute_snippets(
            &document,
            &sections(&["body"]),
            &parsed,
            TermMatchType::ExactOnly,
            &spec(5, 64),
            &tokenizer,
        )
        .unwrap();
        assert!(entries.is_empty());
    }
}
