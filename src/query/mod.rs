//! The query pipeline: parse → iterators → compose → score → page → snippet.

pub mod iterator;
pub mod pager;
pub mod parser;
pub mod ranker;
pub mod snippet;

use ahash::AHashMap;

pub use iterator::{AndIterator, CandidateDoc};
pub use pager::{NextPageTokenTable, PageResultState};
pub use parser::{parse_query, ParsedQuery, QueryTerm};
pub use ranker::{rank_hits, score_candidates, Order, RankBy, ScoredHit};
pub use snippet::{compute_snippets, SnippetEntry, SnippetMatch};

use crate::docstore::{DocumentId, DocumentStore};
use crate::document::Document;
use crate::error::{LanternError, Result};
use crate::index::Index;
use crate::schema::{SchemaStore, SectionIdMask, TermMatchType, SECTION_ID_MASK_ALL};

/// What to search for and where.
#[derive(Clone, Debug, Default)]
pub struct SearchSpec {
    /// The query text; whitespace-separated terms are implicitly ANDed, a
    /// `property:term` token restricts that term to one property, and an
    /// empty query matches every document.
    pub query: String,

    /// How query terms match indexed terms.
    pub term_match_type: TermMatchType,

    /// Only match documents in these namespaces; empty means all.
    pub namespace_filters: Vec<String>,

    /// Only match documents of these schema types; empty means all.
    pub schema_type_filters: Vec<String>,
}

/// How to order matches.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoringSpec {
    /// The ranking signal.
    pub rank_by: RankBy,
    /// Sort direction.
    pub order_by: Order,
}

/// How to shape the response.
#[derive(Clone, Copy, Debug)]
pub struct ResultSpec {
    /// Results per page. Negative is invalid; zero is a valid empty page.
    pub num_per_page: i32,

    /// How many of the leading results get snippets.
    pub num_to_snippet: u32,

    /// Snippet matches per property.
    pub num_matches_per_property: u32,

    /// Maximum snippet window width in bytes.
    pub max_window_bytes: u32,
}

impl Default for ResultSpec {
    fn default() -> Self {
        ResultSpec {
            num_per_page: 10,
            num_to_snippet: 0,
            num_matches_per_property: 0,
            max_window_bytes: 0,
        }
    }
}

/// One returned document with its snippets.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    /// The matched document.
    pub document: Document,
    /// Snippet entries, present only for leading results when requested.
    pub snippets: Vec<SnippetEntry>,
}

/// A page of results plus the continuation token.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResults {
    /// The results of this page, in rank order.
    pub results: Vec<SearchResult>,
    /// Non-zero when more pages exist.
    pub next_page_token: u64,
}

impl SearchResults {
    /// An empty terminal page.
    pub fn empty() -> Self {
        SearchResults::default()
    }
}

/// Run the retrieval stages of a query: per-term iterators, AND composition,
/// and document-store filters. Returns `(document_id, section_mask)` pairs
/// in descending document-id order.
pub fn execute(
    index: &Index,
    doc_store: &DocumentStore,
    schema_store: &SchemaStore,
    parsed: &ParsedQuery,
    spec: &SearchSpec,
) -> Result<Vec<(DocumentId, SectionIdMask)>> {
    let candidate_types = candidate_type_names(schema_store, spec)?;

    // Per restricted property: the section id it maps to, per type.
    let mut restrict_sections: AHashMap<&str, AHashMap<&str, u8>> = AHashMap::new();
    for term in &parsed.terms {
        let Some(property) = term.property_restrict.as_deref() else {
            continue;
        };
        let mut per_type = AHashMap::new();
        for type_name in &candidate_types {
            for section in schema_store.sections_of(type_name)? {
                if section.property_name == property {
                    per_type.insert(type_name.as_str(), section.id);
                }
            }
        }
        if per_type.is_empty() {
            // The restricted property is indexed nowhere: nothing can match.
            return Ok(Vec::new());
        }
        restrict_sections.insert(property, per_type);
    }

    let match_type = match spec.term_match_type {
        TermMatchType::Unknown => TermMatchType::ExactOnly,
        other => other,
    };

    let candidates: Vec<CandidateDoc> = if parsed.terms.is_empty() {
        all_documents(doc_store)
    } else {
        let mut children = Vec::with_capacity(parsed.terms.len());
        for term in &parsed.terms {
            let mask = match term.property_restrict.as_deref() {
                None => SECTION_ID_MASK_ALL,
                Some(property) => restrict_sections
                    .get(property)
                    .map(|per_type| per_type.values().fold(0u16, |mask, &id| mask | (1 << id)))
                    .unwrap_or(0),
            };
            children.push(index.get_iterator(&term.text, mask, match_type)?);
        }
        let mut and = AndIterator::new(children);
        let mut out = Vec::new();
        while let Some(candidate) = and.advance() {
            out.push(candidate);
        }
        out
    };

    let mut results = Vec::new();
    'candidates: for candidate in candidates {
        if !doc_store.is_alive(candidate.document_id) {
            continue;
        }
        let entry = doc_store
            .entry(candidate.document_id)
            .ok_or_else(|| LanternError::internal("candidate without a store entry"))?;

        if !spec.namespace_filters.is_empty() {
            let namespace = doc_store.namespace_name(entry.namespace_id).unwrap_or("");
            if !spec.namespace_filters.iter().any(|ns| ns == namespace) {
                continue;
            }
        }
        if !candidate_types.iter().any(|t| *t == entry.schema_type) {
            continue;
        }

        // Property-restricted terms must have hit the right section of this
        // document's own type.
        for (term, mask) in parsed.terms.iter().zip(&candidate.child_masks) {
            if let Some(property) = term.property_restrict.as_deref() {
                let Some(per_type) = restrict_sections.get(property) else {
                    continue 'candidates;
                };
                match per_type.get(entry.schema_type.as_str()) {
                    Some(&section_id) if mask & (1 << section_id) != 0 => {}
                    _ => continue 'candidates,
                }
            }
        }

        let section_mask = candidate
            .child_masks
            .iter()
            .fold(0u16, |acc, mask| acc | mask);
        results.push((candidate.document_id, section_mask));
    }

    Ok(results)
}

/// The schema types a query may match: the filter list when present (unknown
/// names are ignored), otherwise every type. With no schema set there is
/// nothing to match.
fn candidate_type_names(schema_store: &SchemaStore, spec: &SearchSpec) -> Result<Vec<String>> {
    let Ok(schema) = schema_store.get_schema() else {
        return Ok(Vec::new());
    };
    let all: Vec<String> = schema.types.iter().map(|t| t.name.clone()).collect();
    if spec.schema_type_filters.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|name| spec.schema_type_filters.iter().any(|f| f == name))
        .collect())
}

/// Candidates for the empty query: every document slot, newest first. Dead
/// documents are dropped by the shared filter pass.
fn all_documents(doc_store: &DocumentStore) -> Vec<CandidateDoc> {
    (0..doc_store.num_documents() as DocumentId)
        .rev()
        .map(|document_id| CandidateDoc {
            document_id,
            child_masks: Vec::new(),
        })
        .collect()
}
