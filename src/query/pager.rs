//! Result paging and the next-page-token table.
//!
//! When a query matches more documents than one page holds, the ranked
//! remainder is parked here under a freshly minted non-zero token. The table
//! lives for the engine instance only and is cleared wholesale by anything
//! that invalidates ranked cursors: optimize, schema changes, shutdown.

use ahash::AHashMap;

use crate::query::parser::ParsedQuery;
use crate::query::ranker::ScoredHit;
use crate::query::ResultSpec;
use crate::schema::TermMatchType;

/// A parked paginator: the ranked remainder plus everything needed to
/// render further pages.
#[derive(Clone, Debug)]
pub struct PageResultState {
    /// Ranked hits not yet returned, in final order.
    pub remaining: Vec<ScoredHit>,
    /// The parsed query, kept for snippeting later pages.
    pub parsed: ParsedQuery,
    /// The query's term match type.
    pub term_match_type: TermMatchType,
    /// The result shaping spec.
    pub result_spec: ResultSpec,
    /// How many results earlier pages already returned.
    pub num_returned: usize,
}

/// Process-lifetime map from opaque token to paginator state.
#[derive(Debug, Default)]
pub struct NextPageTokenTable {
    states: AHashMap<u64, PageResultState>,
    next_token: u64,
}

impl NextPageTokenTable {
    /// Create an empty table.
    pub fn new() -> Self {
        NextPageTokenTable {
            states: AHashMap::new(),
            next_token: 1,
        }
    }

    /// Park a paginator state and mint its token.
    pub fn insert(&mut self, state: PageResultState) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.states.insert(token, state);
        token
    }

    /// Remove and return the state for a token, if the token is live.
    pub fn take(&mut self, token: u64) -> Option<PageResultState> {
        self.states.remove(&token)
    }

    /// Park a state back under the token it was taken from, so the client
    /// keeps using one token for the whole query.
    pub fn reinsert(&mut self, token: u64, state: PageResultState) {
        self.states.insert(token, state);
    }

    /// Drop one token.
    pub fn invalidate(&mut self, token: u64) {
        self.states.remove(&token);
    }

    /// Drop every token.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
