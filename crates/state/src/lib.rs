//! The state plane: plain and historical readers over the KV store, the
//! journaled intra-block state, and the writers that flush dirty state
//! while recording change-sets and history bitmaps.
//!
//! Lifetimes stack strictly: the KV transaction outlives the readers, which
//! outlive any [`IntraBlockState`] anchored on them.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod chain;
mod changes;
mod error;
mod genesis;
mod history;
mod history_index;
mod intra_block_state;
mod journal;
mod object;
mod reader;
mod writer;

pub use chain::{ChainReader, ChainWriter};
pub use changes::{account_pre_image, storage_pre_value};
pub use error::StateError;
pub use genesis::init_genesis;
pub use history::HistoryStateReader;
pub use history_index::{HistoryIndexer, DEFAULT_SHARD_CHUNK_SIZE};
pub use intra_block_state::IntraBlockState;
pub use journal::JournalEntry;
pub use reader::{PlainStateReader, StateReader};
pub use writer::{CommitmentWriter, NoopWriter, PlainStateWriter, StateWriter};
