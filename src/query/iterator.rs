//! Composition of posting-list iterators.

use crate::docstore::DocumentId;
use crate::index::{DocHitInfo, PostingListIterator};
use crate::schema::SectionIdMask;

/// A document matched by every term of a query, with the section mask each
/// term's iterator contributed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateDoc {
    /// The matched document.
    pub document_id: DocumentId,
    /// One mask per composed child, in child order.
    pub child_masks: Vec<SectionIdMask>,
}

/// K-way intersection over descending-document-id posting iterators.
///
/// Forward-only, like its children: each child is consumed exactly once and
/// a new query builds fresh iterators.
#[derive(Debug)]
pub struct AndIterator {
    children: Vec<PostingListIterator>,
    currents: Vec<Option<DocHitInfo>>,
}

impl AndIterator {
    /// Compose the given child iterators.
    pub fn new(mut children: Vec<PostingListIterator>) -> Self {
        let currents = children.iter_mut().map(|child| child.advance()).collect();
        AndIterator { children, currents }
    }

    /// Advance to the next document present in every child.
    pub fn advance(&mut self) -> Option<CandidateDoc> {
        if self.children.is_empty() {
            return None;
        }

        loop {
            // The next possible match is the oldest (smallest) current
            // document: children run newest-first, so anything newer in the
            // other children can be skipped.
            let mut target: Option<DocumentId> = None;
            for current in &self.currents {
                let info = (*current)?;
                target = Some(match target {
                    None => info.document_id,
                    Some(t) => t.min(info.document_id),
                });
            }
            let target = target?;

            let mut all_match = true;
            for (i, current) in self.currents.iter_mut().enumerate() {
                while let Some(info) = *current {
                    if info.document_id > target {
                        *current = self.children[i].advance();
                    } else {
                        break;
                    }
                }
                match *current {
                    None => return None,
                    Some(info) => {
                        if info.document_id != target {
                            all_match = false;
                        }
                    }
                }
            }

            if all_match {
                let child_masks = self
                    .currents
                    .iter()
                    .map(|current| current.map(|info| info.section_mask).unwrap_or(0))
                    .collect();
                for (i, current) in self.currents.iter_mut().enumerate() {
                    *current = self.children[i].advance();
                }
                return Some(CandidateDoc {
                    document_id: target,
                    child_masks,
                });
            }
        }
    }
}
