//! Core types shared by the aura node: accounts, headers, blocks,
//! transactions and receipts.
//!
//! Wire encodings follow Ethereum conventions (RLP, EIP-2718 typed
//! envelopes); the on-disk account record uses the compact field-presence
//! encoding of the plain-state schema.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod account;
mod block;
pub mod constants;
pub mod crypto;
mod header;
mod receipt;
pub mod transaction;

pub use account::{AccountDecodeError, StateAccount};
pub use block::{calculate_receipt_root, Block, BlockBody, BlockWithSenders, SealedBlock};
pub use header::{Header, SealedHeader};
pub use receipt::{Receipt, ReceiptWithBloom, StoredReceipt};
pub use transaction::{recover_signers, sign_transaction, TransactionSigned, TxDecodeError};

pub use alloy_consensus::TxType;
pub use alloy_primitives::{
    keccak256, Address, BlockHash, BlockNumber, Bloom, Bytes, Log, LogData, StorageKey,
    StorageValue, TxHash, TxNumber, B256, B64, U256,
};
