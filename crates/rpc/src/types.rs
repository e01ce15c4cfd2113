//! JSON-RPC response shapes.
//!
//! Responses are emitted in the standard Ethereum wire shape: quantities
//! as 0x-hex, byte payloads as 0x-prefixed hex.

use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use alloy_rpc_types_eth::Log as RpcLog;
use aura_primitives::{
    Block, Header, Receipt, SealedHeader, TransactionSigned, TxType,
};
use serde::Serialize;

/// A block as returned by `eth_getBlockBy*`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    /// Block hash.
    pub hash: B256,
    /// Parent hash.
    pub parent_hash: B256,
    /// Ommers hash (always the empty-list hash).
    pub sha3_uncles: B256,
    /// Proposer (and vote candidate slot under PoA).
    pub miner: Address,
    /// State root.
    pub state_root: B256,
    /// Transactions root.
    pub transactions_root: B256,
    /// Receipts root.
    pub receipts_root: B256,
    /// Logs bloom.
    pub logs_bloom: Bloom,
    /// In-turn (2) or no-turn (1) difficulty.
    pub difficulty: U256,
    /// Cumulative difficulty up to this block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_difficulty: Option<U256>,
    /// Block height.
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    /// Gas limit.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_limit: u64,
    /// Gas used.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Timestamp.
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    /// Extra data (vanity, checkpoint signers, seal).
    pub extra_data: Bytes,
    /// Mix digest.
    pub mix_hash: B256,
    /// Vote marker nonce.
    pub nonce: B64,
    /// Base fee, post-London.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub base_fee_per_gas: Option<u64>,
    /// Withdrawals root, post-Shanghai.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<B256>,
    /// Blob gas used, post-Cancun.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    /// Excess blob gas, post-Cancun.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub excess_blob_gas: Option<u64>,
    /// Parent beacon block root, post-Cancun.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
    /// EIP-7685 requests hash, post-Pectra.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_hash: Option<B256>,
    /// RLP size of the block.
    #[serde(with = "alloy_serde::quantity")]
    pub size: u64,
    /// Transactions, as hashes or full objects.
    pub transactions: RpcBlockTransactions,
    /// Always empty under PoA.
    pub uncles: Vec<B256>,
}

/// Hashes or full transactions, depending on the request flag.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcBlockTransactions {
    /// Just the hashes.
    Hashes(Vec<B256>),
    /// Full transaction objects.
    Full(Vec<RpcTransaction>),
}

/// A transaction as returned by `eth_getTransactionBy*`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Sender nonce.
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    /// Containing block hash; `None` while pending.
    pub block_hash: Option<B256>,
    /// Containing block number; `None` while pending.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub block_number: Option<u64>,
    /// Index inside the block; `None` while pending.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub transaction_index: Option<u64>,
    /// Recovered sender.
    pub from: Address,
    /// Target; `None` for deployments.
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Legacy gas price or effective price once mined.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub gas_price: Option<u128>,
    /// Gas limit.
    #[serde(with = "alloy_serde::quantity")]
    pub gas: u64,
    /// Max fee per gas, dynamic-fee types.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub max_fee_per_gas: Option<u128>,
    /// Max priority fee per gas, dynamic-fee types.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Max fee per blob gas, blob transactions.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub max_fee_per_blob_gas: Option<u128>,
    /// Blob versioned hashes, blob transactions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_versioned_hashes: Option<Vec<B256>>,
    /// Call data.
    pub input: Bytes,
    /// Envelope type.
    #[serde(rename = "type", with = "alloy_serde::quantity")]
    pub tx_type: u8,
    /// Chain id, when replay-protected.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub chain_id: Option<u64>,
    /// Signature r.
    pub r: U256,
    /// Signature s.
    pub s: U256,
    /// Signature parity/v.
    pub v: U256,
}

/// A receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Index in the block.
    #[serde(with = "alloy_serde::quantity")]
    pub transaction_index: u64,
    /// Containing block hash.
    pub block_hash: B256,
    /// Containing block number.
    #[serde(with = "alloy_serde::quantity")]
    pub block_number: u64,
    /// Sender.
    pub from: Address,
    /// Target; `None` for deployments.
    pub to: Option<Address>,
    /// Gas used by the block up to and including this transaction.
    #[serde(with = "alloy_serde::quantity")]
    pub cumulative_gas_used: u64,
    /// Gas used by this transaction alone.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Deployed contract address, for successful deployments.
    pub contract_address: Option<Address>,
    /// Emitted logs with block/tx positions filled in.
    pub logs: Vec<RpcLog>,
    /// Bloom over the logs.
    pub logs_bloom: Bloom,
    /// EIP-658 status.
    #[serde(with = "alloy_serde::quantity")]
    pub status: u64,
    /// Price per gas actually charged.
    #[serde(with = "alloy_serde::quantity")]
    pub effective_gas_price: u128,
    /// Envelope type.
    #[serde(rename = "type", with = "alloy_serde::quantity")]
    pub tx_type: u8,
    /// Blob gas used, blob transactions.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub blob_gas_used: Option<u64>,
    /// Blob gas price, blob transactions.
    #[serde(skip_serializing_if = "Option::is_none", with = "alloy_serde::quantity::opt")]
    pub blob_gas_price: Option<u128>,
}

/// `eth_feeHistory` response.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcFeeHistory {
    /// First block of the window.
    #[serde(with = "alloy_serde::quantity")]
    pub oldest_block: u64,
    /// Base fee per block, plus one entry for the next block.
    #[serde(with = "alloy_serde::quantity::vec")]
    pub base_fee_per_gas: Vec<u128>,
    /// Gas used ratio per block.
    pub gas_used_ratio: Vec<f64>,
    /// Blob base fee per block.
    #[serde(with = "alloy_serde::quantity::vec")]
    pub base_fee_per_blob_gas: Vec<u128>,
    /// Blob gas used ratio per block.
    pub blob_gas_used_ratio: Vec<f64>,
    /// Percentile rewards per block, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<Vec<Vec<u128>>>,
}

/// `eth_syncing` response: this node executes at the tip or reports the
/// pivot range.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcSyncStatus {
    /// Not syncing; serialized as `false`.
    NotSyncing(bool),
    /// Sync progress.
    Syncing {
        /// First block of the sync run.
        #[serde(rename = "startingBlock", with = "alloy_serde::quantity")]
        starting_block: u64,
        /// Current head.
        #[serde(rename = "currentBlock", with = "alloy_serde::quantity")]
        current_block: u64,
        /// Sync target.
        #[serde(rename = "highestBlock", with = "alloy_serde::quantity")]
        highest_block: u64,
    },
}

/// One storage entry of `eth_getProof`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcStorageProof {
    /// Queried slot.
    pub key: B256,
    /// Its value.
    pub value: U256,
    /// Merkle proof nodes; empty in the trie-less design.
    pub proof: Vec<Bytes>,
}

/// `eth_getProof` response. The plain-state schema keeps no tries, so the
/// account record is authoritative and the proof vectors are empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccountProof {
    /// Queried account.
    pub address: Address,
    /// Account balance.
    pub balance: U256,
    /// Account nonce.
    #[serde(with = "alloy_serde::quantity")]
    pub nonce: u64,
    /// Code hash.
    pub code_hash: B256,
    /// Storage root placeholder.
    pub storage_hash: B256,
    /// Merkle proof nodes; empty in the trie-less design.
    pub account_proof: Vec<Bytes>,
    /// Per-slot entries.
    pub storage_proof: Vec<RpcStorageProof>,
}

/// `eth_createAccessList` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccessListResult {
    /// The produced access list.
    pub access_list: alloy_eips::eip2930::AccessList,
    /// Gas used when executing with that list.
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    /// Failure reason, if execution did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `txpool_status` response.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RpcTxpoolStatus {
    /// Executable transactions.
    #[serde(with = "alloy_serde::quantity")]
    pub pending: u64,
    /// Transactions queued behind nonce gaps.
    #[serde(with = "alloy_serde::quantity")]
    pub queued: u64,
}

/// Builds the RPC view of a transaction.
pub fn rpc_transaction(
    tx: &TransactionSigned,
    from: Address,
    meta: Option<(B256, u64, u64)>,
    base_fee: Option<u64>,
) -> RpcTransaction {
    let signature = tx.signature();
    let gas_price = match tx.tx_type() {
        TxType::Legacy | TxType::Eip2930 => Some(tx.max_fee_per_gas()),
        // dynamic-fee transactions report the effective price once mined
        _ => meta.is_some().then(|| tx.effective_gas_price(base_fee)),
    };
    RpcTransaction {
        hash: tx.hash(),
        nonce: tx.nonce(),
        block_hash: meta.map(|(hash, _, _)| hash),
        block_number: meta.map(|(_, number, _)| number),
        transaction_index: meta.map(|(_, _, index)| index),
        from,
        to: tx.to().to().copied(),
        value: tx.value(),
        gas_price,
        gas: tx.gas_limit(),
        max_fee_per_gas: tx.max_priority_fee_per_gas().map(|_| tx.max_fee_per_gas()),
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
        max_fee_per_blob_gas: tx.max_fee_per_blob_gas(),
        blob_versioned_hashes: tx.blob_versioned_hashes().map(<[B256]>::to_vec),
        input: tx.input().clone(),
        tx_type: tx.tx_type() as u8,
        chain_id: tx.chain_id(),
        r: signature.r(),
        s: signature.s(),
        v: U256::from(signature.v().y_parity_byte() as u64),
    }
}

/// Builds the RPC view of a block.
pub fn rpc_block(
    block: &Block,
    hash: B256,
    senders: &[Address],
    total_difficulty: Option<U256>,
    full: bool,
) -> RpcBlock {
    let header = &block.header;
    let transactions = if full {
        RpcBlockTransactions::Full(
            block
                .body
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| {
                    let from = senders.get(index).copied().unwrap_or_default();
                    rpc_transaction(
                        tx,
                        from,
                        Some((hash, header.number, index as u64)),
                        header.base_fee_per_gas,
                    )
                })
                .collect(),
        )
    } else {
        RpcBlockTransactions::Hashes(
            block.body.transactions.iter().map(TransactionSigned::hash).collect(),
        )
    };

    RpcBlock {
        hash,
        parent_hash: header.parent_hash,
        sha3_uncles: header.ommers_hash,
        miner: header.beneficiary,
        state_root: header.state_root,
        transactions_root: header.transactions_root,
        receipts_root: header.receipts_root,
        logs_bloom: header.logs_bloom,
        difficulty: header.difficulty,
        total_difficulty,
        number: header.number,
        gas_limit: header.gas_limit,
        gas_used: header.gas_used,
        timestamp: header.timestamp,
        extra_data: header.extra_data.clone(),
        mix_hash: header.mix_hash,
        nonce: header.nonce,
        base_fee_per_gas: header.base_fee_per_gas,
        withdrawals_root: header.withdrawals_root,
        blob_gas_used: header.blob_gas_used,
        excess_blob_gas: header.excess_blob_gas,
        parent_beacon_block_root: header.parent_beacon_block_root,
        requests_hash: header.requests_hash,
        size: block_rlp_size(header),
        transactions,
        uncles: Vec::new(),
    }
}

fn block_rlp_size(header: &Header) -> u64 {
    use alloy_rlp::Encodable;
    header.length() as u64
}

/// Positions receipt logs within their block.
pub fn rpc_logs(
    receipt: &Receipt,
    block_hash: B256,
    block_number: u64,
    tx_hash: B256,
    tx_index: u64,
    first_log_index: u64,
) -> Vec<RpcLog> {
    receipt
        .logs
        .iter()
        .enumerate()
        .map(|(offset, log)| RpcLog {
            inner: log.clone(),
            block_hash: Some(block_hash),
            block_number: Some(block_number),
            block_timestamp: None,
            transaction_hash: Some(tx_hash),
            transaction_index: Some(tx_index),
            log_index: Some(first_log_index + offset as u64),
            removed: false,
        })
        .collect()
}

/// Builds the RPC receipt for the transaction at `tx_index`.
#[allow(clippy::too_many_arguments)]
pub fn rpc_receipt(
    header: &SealedHeader,
    tx: &TransactionSigned,
    from: Address,
    receipt: &Receipt,
    prev_cumulative: u64,
    tx_index: u64,
    first_log_index: u64,
) -> RpcReceipt {
    let success = receipt.success;
    let gas_used = receipt.cumulative_gas_used - prev_cumulative;
    let blob_gas_used = tx.blob_gas();
    RpcReceipt {
        transaction_hash: tx.hash(),
        transaction_index: tx_index,
        block_hash: header.hash(),
        block_number: header.number(),
        from,
        to: tx.to().to().copied(),
        cumulative_gas_used: receipt.cumulative_gas_used,
        gas_used,
        contract_address: (tx.is_create() && success)
            .then(|| from.create(tx.nonce())),
        logs: rpc_logs(
            receipt,
            header.hash(),
            header.number(),
            tx.hash(),
            tx_index,
            first_log_index,
        ),
        logs_bloom: receipt.bloom_slow(),
        status: success as u64,
        effective_gas_price: tx.effective_gas_price(header.base_fee_per_gas),
        tx_type: receipt.tx_type as u8,
        blob_gas_used,
        blob_gas_price: blob_gas_used.map(|_| {
            alloy_eips::eip4844::calc_blob_gasprice(header.excess_blob_gas.unwrap_or_default())
        }),
    }
}
