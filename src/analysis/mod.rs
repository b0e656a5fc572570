//! Text analysis: tokens and tokenizers.
//!
//! The indexer and the query parser run the same tokenizer over their input
//! so a query term always normalizes the way the indexed text did.

pub mod token;
pub mod tokenizer;

pub use token::Token;
pub use tokenizer::{PlainTokenizer, Tokenizer, VerbatimTokenizer};
