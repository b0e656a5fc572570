//! Engine configuration.

use crate::error::{LanternError, Result};

/// The default lite-index byte budget before a merge is forced.
pub const DEFAULT_INDEX_MERGE_SIZE: usize = 1024 * 1024;

/// The default cap on tokens indexed per document.
pub const DEFAULT_MAX_TOKENS_PER_DOC: usize = 10_000;

/// The default cap on token length; longer tokens are truncated.
pub const DEFAULT_MAX_TOKEN_LENGTH: usize = 30;

/// Recognized engine options, validated during `initialize`.
#[derive(Clone, Copy, Debug)]
pub struct EngineOptions {
    /// Lite-index byte budget; exceeding it triggers a merge into the main
    /// index. Must lie in `[1, i32::MAX)`.
    pub index_merge_size: usize,

    /// Maximum number of tokens indexed per document; the remainder of the
    /// document's text is stored but not searchable. Must be positive.
    pub max_tokens_per_doc: usize,

    /// Maximum token length in bytes; longer tokens are quietly truncated at
    /// both index and query time. Must be positive.
    pub max_token_length: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            index_merge_size: DEFAULT_INDEX_MERGE_SIZE,
            max_tokens_per_doc: DEFAULT_MAX_TOKENS_PER_DOC,
            max_token_length: DEFAULT_MAX_TOKEN_LENGTH,
        }
    }
}

impl EngineOptions {
    /// Check every option against its documented range.
    pub fn validate(&self) -> Result<()> {
        if self.index_merge_size == 0 || self.index_merge_size >= i32::MAX as usize {
            return Err(LanternError::invalid_argument(format!(
                "index_merge_size must be in [1, {}), got {}",
                i32::MAX,
                self.index_merge_size
            )));
        }
        if self.max_tokens_per_doc == 0 {
            return Err(LanternError::invalid_argument(
                "max_tokens_per_doc must be positive",
            ));
        }
        if self.max_token_length == 0 {
            return Err(LanternError::invalid_argument(
                "max_token_length must be positive",
            ));
        }
        Ok(())
    }
}
