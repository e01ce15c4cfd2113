use crate::{Header, Receipt, SealedHeader, TransactionSigned};
use alloy_consensus::proofs::ordered_trie_root_with_encoder;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// A block: header plus body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Block body.
    pub body: BlockBody,
}

/// The transactions (and, post-Shanghai, withdrawals) of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    /// Transactions in execution order.
    pub transactions: Vec<TransactionSigned>,
    /// Withdrawal operations pushed by the consensus layer.
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockBody {
    /// Total blob gas of all blob transactions in the body.
    pub fn blob_gas_used(&self) -> u64 {
        self.transactions.iter().filter_map(TransactionSigned::blob_gas).sum()
    }

    /// Number of blobs across all transactions.
    pub fn blob_count(&self) -> u64 {
        self.transactions
            .iter()
            .filter_map(|tx| tx.blob_versioned_hashes().map(|h| h.len() as u64))
            .sum()
    }

    /// Root hash of the transactions trie.
    pub fn calculate_tx_root(&self) -> B256 {
        ordered_trie_root_with_encoder(&self.transactions, |tx, buf| tx.encode_2718(buf))
    }
}

impl Block {
    /// Seals the block, hashing the header.
    pub fn seal_slow(self) -> SealedBlock {
        SealedBlock { header: SealedHeader::seal_slow(self.header), body: self.body }
    }

    /// Attaches pre-recovered senders without re-deriving them.
    pub const fn with_senders_unchecked(self, senders: Vec<Address>) -> BlockWithSenders {
        BlockWithSenders { block: self, senders }
    }
}

/// A block with its header hash computed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    /// Sealed header.
    pub header: SealedHeader,
    /// Block body.
    pub body: BlockBody,
}

impl SealedBlock {
    /// The block hash.
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// The block height.
    pub fn number(&self) -> u64 {
        self.header.number()
    }

    /// Unseals back into a plain block.
    pub fn unseal(self) -> Block {
        Block { header: self.header.into_header(), body: self.body }
    }
}

/// A block paired with the recovered sender of each transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockWithSenders {
    /// The block.
    pub block: Block,
    /// Sender of `block.body.transactions[i]` at index `i`.
    pub senders: Vec<Address>,
}

/// Root hash of the receipts trie.
pub fn calculate_receipt_root(receipts: &[Receipt]) -> B256 {
    let with_bloom: Vec<_> = receipts.iter().map(|r| r.clone().with_bloom()).collect();
    ordered_trie_root_with_encoder(&with_bloom, |receipt, buf| receipt.encode_2718(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::EMPTY_ROOT_HASH, transaction::sign_transaction};
    use alloy_consensus::{TxLegacy, TxType};
    use alloy_primitives::{b256, TxKind, U256};

    #[test]
    fn empty_body_roots_match_empty_trie() {
        let body = BlockBody::default();
        assert_eq!(body.calculate_tx_root(), EMPTY_ROOT_HASH);
        assert_eq!(calculate_receipt_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(body.blob_gas_used(), 0);
    }

    #[test]
    fn tx_root_changes_with_content() {
        let secret = b256!("2222222222222222222222222222222222222222222222222222222222222222");
        let tx = sign_transaction(
            TxLegacy {
                chain_id: Some(9917),
                nonce: 0,
                gas_price: 1,
                gas_limit: 21_000,
                to: TxKind::Create,
                value: U256::ZERO,
                input: Default::default(),
            },
            secret,
        )
        .unwrap();
        let body = BlockBody { transactions: vec![tx], withdrawals: None };
        assert_ne!(body.calculate_tx_root(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn receipt_root_is_order_sensitive() {
        let a = Receipt { tx_type: TxType::Legacy, success: true, cumulative_gas_used: 21_000, logs: vec![] };
        let b = Receipt { tx_type: TxType::Legacy, success: false, cumulative_gas_used: 42_000, logs: vec![] };
        assert_ne!(
            calculate_receipt_root(&[a.clone(), b.clone()]),
            calculate_receipt_root(&[b, a])
        );
    }
}
