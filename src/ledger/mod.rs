//! Hash-chained ledgers
//!
//! Every chain is an append-only sequence of blocks where each block commits
//! to its predecessor's hash.

pub mod block;
pub mod chain;
pub mod vote;

pub use block::{Block, ChainKind, ChainPayload, GENESIS_HASH};
pub use chain::{ChainRange, Ledger, VoteLedger, DEFAULT_MAX_APPEND_RETRIES};
pub use vote::{VoteCast, VotePayload};
