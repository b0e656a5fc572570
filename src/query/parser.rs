//! Query string parsing.
//!
//! The grammar is small: whitespace-separated terms (implicit AND), an
//! optional `property:term` restriction per token, and the empty query
//! matching everything. Term text runs through the same tokenizer as
//! indexing so it normalizes identically.

use crate::analysis::{PlainTokenizer, Tokenizer};
use crate::error::Result;

/// One parsed query term.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    /// The normalized term text.
    pub text: String,
    /// Restrict matches to this property, when present.
    pub property_restrict: Option<String>,
}

/// A parsed query: zero terms means match-all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    /// The terms, all of which must match.
    pub terms: Vec<QueryTerm>,
}

/// Parse a raw query string.
pub fn parse_query(query: &str, tokenizer: &PlainTokenizer) -> Result<ParsedQuery> {
    let mut terms = Vec::new();

    for piece in query.split_whitespace() {
        let (property, text) = match piece.split_once(':') {
            Some((property, rest)) if !property.is_empty() && !rest.is_empty() => {
                (Some(property.to_string()), rest)
            }
            _ => (None, piece),
        };

        for token in tokenizer.tokenize(text)? {
            terms.push(QueryTerm {
                text: token.text,
                property_restrict: property.clone(),
            });
        }
    }

    Ok(ParsedQuery { terms })
}
