//! Unified term-id space over the two index tiers.
//!
//! Each tier interns terms with its own dense "term value index". The codec
//! maps tier-local indexes into one global [`TermId`] space so the editor's
//! dedup set and callers comparing term identity never care which tier a
//! term came from. Main-tier terms occupy `[0, main_count)`; lite-tier terms
//! follow. Rebuilt after every merge, when the main lexicon changes.

use crate::error::{LanternError, Result};
use crate::index::hit::TermId;

/// Which tier a term value index belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermTier {
    /// The immutable on-disk tier.
    Main,
    /// The mutable in-memory tier.
    Lite,
}

/// Maps tier-local term value indexes to global term-ids and back.
#[derive(Clone, Copy, Debug)]
pub struct TermIdCodec {
    main_count: u32,
}

impl TermIdCodec {
    /// Create a codec for a main lexicon of the given size.
    pub fn new(main_count: u32) -> Self {
        TermIdCodec { main_count }
    }

    /// The global term-id for a tier-local term value index.
    pub fn global_id(&self, tier: TermTier, tvi: u32) -> Result<TermId> {
        match tier {
            TermTier::Main => {
                if tvi >= self.main_count {
                    return Err(LanternError::internal(format!(
                        "main term value index {tvi} out of range {}",
                        self.main_count
                    )));
                }
                Ok(tvi)
            }
            TermTier::Lite => tvi
                .checked_add(self.main_count)
                .ok_or_else(|| LanternError::out_of_space("term-id space exhausted")),
        }
    }

    /// Decompose a global term-id into its tier and tier-local index.
    pub fn decode(&self, term_id: TermId) -> (TermTier, u32) {
        if term_id < self.main_count {
            (TermTier::Main, term_id)
        } else {
            (TermTier::Lite, term_id - self.main_count)
        }
    }
}
