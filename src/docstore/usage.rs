//! Per-document usage counters.
//!
//! Clients report usage events (opens, shares, and a third app-defined
//! kind); the store keeps a count and a high-water timestamp per usage type,
//! keyed by document identity so same-identity replacement and compaction
//! preserve history.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The number of distinct usage types tracked per document.
pub const USAGE_TYPE_COUNT: usize = 3;

/// One of the tracked usage types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageType {
    /// First usage type.
    Type1,
    /// Second usage type.
    Type2,
    /// Third usage type.
    Type3,
}

impl UsageType {
    /// The array slot for this usage type.
    pub fn index(self) -> usize {
        match self {
            UsageType::Type1 => 0,
            UsageType::Type2 => 1,
            UsageType::Type3 => 2,
        }
    }
}

/// A usage event reported by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Namespace of the used document.
    pub namespace: String,
    /// Uri of the used document.
    pub uri: String,
    /// Which usage type this event counts toward.
    pub usage_type: UsageType,
    /// When the usage happened, in milliseconds.
    pub usage_timestamp_ms: i64,
}

/// Accumulated usage for one document identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageScores {
    /// Event count per usage type.
    pub counts: [i32; USAGE_TYPE_COUNT],
    /// Latest reported timestamp per usage type.
    pub last_used_timestamp_ms: [i64; USAGE_TYPE_COUNT],
}

/// In-memory usage counter table, persisted with the derived maps.
#[derive(Clone, Debug, Default)]
pub struct UsageStore {
    scores: AHashMap<(String, String), UsageScores>,
}

impl UsageStore {
    /// Create an empty usage store.
    pub fn new() -> Self {
        UsageStore::default()
    }

    /// Record a usage event.
    ///
    /// Counts saturate; the last-used timestamp only moves forward, so a
    /// report with a stale timestamp never lowers the recorded one.
    pub fn report(&mut self, report: &UsageReport) -> Result<()> {
        let scores = self
            .scores
            .entry((report.namespace.clone(), report.uri.clone()))
            .or_default();
        let slot = report.usage_type.index();
        scores.counts[slot] = scores.counts[slot].saturating_add(1);
        if report.usage_timestamp_ms > scores.last_used_timestamp_ms[slot] {
            scores.last_used_timestamp_ms[slot] = report.usage_timestamp_ms;
        }
        Ok(())
    }

    /// Get the scores for a document identity, defaulting to all-zero.
    pub fn get(&self, namespace: &str, uri: &str) -> UsageScores {
        self.scores
            .get(&(namespace.to_string(), uri.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every entry whose identity is not retained by `keep`.
    pub fn retain<F: FnMut(&str, &str) -> bool>(&mut self, mut keep: F) {
        self.scores.retain(|(namespace, uri), _| keep(namespace, uri));
    }

    /// Iterate over all `(namespace, uri) → scores` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &UsageScores)> {
        self.scores.iter()
    }

    /// Install scores for an identity, merging with any existing entry.
    pub fn restore(&mut self, namespace: String, uri: String, scores: UsageScores) {
        self.scores.insert((namespace, uri), scores);
    }

    /// Number of identities with recorded usage.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no usage has been recorded.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(uri: &str, usage_type: UsageType, ts: i64) -> UsageReport {
        UsageReport {
            namespace: "ns".to_string(),
            uri: uri.to_string(),
            usage_type,
            usage_timestamp_ms: ts,
        }
    }

    #[test]
    fn test_counts_accumulate_per_type() {
        let mut store = UsageStore::new();
        store.report(&report("uri1", UsageType::Type1, 10)).unwrap();
        store.report(&report("uri1", UsageType::Type1, 20)).unwrap();
        store.report(&report("uri1", UsageType::Type2, 30)).unwrap();

        let scores = store.get("ns", "uri1");
        assert_eq!(scores.counts, [2, 1, 0]);
        assert_eq!(scores.last_used_timestamp_ms, [20, 30, 0]);
    }

    #[test]
    fn test_timestamp_never_goes_backwards() {
        let mut store = UsageStore::new();
        store.report(&report("uri1", UsageType::Type3, 100)).unwrap();
        store.report(&report("uri1", UsageType::Type3, 50)).unwrap();

        let scores = store.get("ns", "uri1");
        assert_eq!(scores.counts[2], 2);
        assert_eq!(scores.last_used_timestamp_ms[2], 100);
    }

    #[test]
    fn test_unknown_identity_is_zero() {
        let store = UsageStore::new();
        assert_eq!(store.get("ns", "nothing"), UsageScores::default());
    }

    #[test]
    fn test_retain_prunes() {
        let mut store = UsageStore::new();
        store.report(&report("uri1", UsageType::Type1, 1)).unwrap();
        store.report(&report("uri2", UsageType::Type1, 1)).unwrap();

        store.retain(|_, uri| uri == "uri2");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("ns", "uri1"), UsageScores::default());
        assert_eq!(store.get("ns", "uri2").counts[0], 1);
    }
}
