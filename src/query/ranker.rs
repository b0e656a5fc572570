//! Ranking of matched documents.
//!
//! Each strategy reads one signal from the document store; scoring never
//! touches the index. Ties always break toward the higher document-id, the
//! newer insertion.

use std::cmp::Ordering;

use crate::docstore::{DocumentId, DocumentStore};
use crate::schema::SectionIdMask;

/// The ranking signal for a query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RankBy {
    /// No signal: reverse insertion order.
    #[default]
    None,
    /// The document's client-assigned score.
    DocumentScore,
    /// The document's creation timestamp.
    CreationTimestamp,
    /// Count of usage type 1 reports.
    UsageType1Count,
    /// Count of usage type 2 reports.
    UsageType2Count,
    /// Count of usage type 3 reports.
    UsageType3Count,
    /// Latest usage type 1 timestamp.
    UsageType1LastUsedTimestamp,
    /// Latest usage type 2 timestamp.
    UsageType2LastUsedTimestamp,
    /// Latest usage type 3 timestamp.
    UsageType3LastUsedTimestamp,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Best score first.
    #[default]
    Desc,
    /// Worst score first.
    Asc,
}

/// A matched document with its computed ranking score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredHit {
    /// The matched document.
    pub document_id: DocumentId,
    /// Sections the query matched in.
    pub section_mask: SectionIdMask,
    /// The ranking signal value.
    pub score: f64,
}

/// Attach the ranking signal to each candidate.
pub fn score_candidates(
    candidates: Vec<(DocumentId, SectionIdMask)>,
    rank_by: RankBy,
    doc_store: &DocumentStore,
) -> Vec<ScoredHit> {
    candidates
        .into_iter()
        .map(|(document_id, section_mask)| ScoredHit {
            document_id,
            section_mask,
            score: score_of(document_id, rank_by, doc_store),
        })
        .collect()
}

fn score_of(document_id: DocumentId, rank_by: RankBy, doc_store: &DocumentStore) -> f64 {
    let Some(entry) = doc_store.entry(document_id) else {
        return 0.0;
    };
    match rank_by {
        RankBy::None => 0.0,
        RankBy::DocumentScore => entry.score as f64,
        RankBy::CreationTimestamp => entry.creation_time_ms as f64,
        RankBy::UsageType1Count => doc_store.usage_for(document_id).counts[0] as f64,
        RankBy::UsageType2Count => doc_store.usage_for(document_id).counts[1] as f64,
        RankBy::UsageType3Count => doc_store.usage_for(document_id).counts[2] as f64,
        RankBy::UsageType1LastUsedTimestamp => {
            doc_store.usage_for(document_id).last_used_timestamp_ms[0] as f64
        }
        RankBy::UsageType2LastUsedTimestamp => {
            doc_store.usage_for(document_id).last_used_timestamp_ms[1] as f64
        }
        RankBy::UsageType3LastUsedTimestamp => {
            doc_store.usage_for(document_id).last_used_timestamp_ms[2] as f64
        }
    }
}

/// Sort hits into their final order.
pub fn rank_hits(hits: &mut [ScoredHit], order: Order) {
    hits.sort_by(|a, b| {
        let by_score = b
            .score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b.document_id.cmp(&a.document_id));
        match order {
            Order::Desc => by_score,
            Order::Asc => by_score.reverse(),
        }
    });
}
