//! Payload/block conversions and EIP-7685 request validation.

use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::{Bytes, B256, U256};
use alloy_rpc_types_engine::{ExecutionPayloadV1, ExecutionPayloadV2, ExecutionPayloadV3};
use aura_consensus::{DIFF_INTURN, DIFF_NOTURN, NONCE_AUTH, NONCE_DROP};
use aura_primitives::{
    constants::EMPTY_OMMER_ROOT_HASH, BlockBody, Header, SealedBlock, SealedHeader,
    TransactionSigned,
};
use sha2::{Digest, Sha256};

/// Payload-shape failure, surfaced with a human-readable reason and never
/// an internal error.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum PayloadError {
    /// No consensus-field assignment reproduces the declared block hash.
    #[error("invalid block hash: declared {declared}")]
    InvalidBlockHash {
        /// Hash the payload declared.
        declared: B256,
    },

    /// A transaction byte string does not decode.
    #[error("invalid transaction at index {index}: {reason}")]
    InvalidTransaction {
        /// Index in the payload.
        index: usize,
        /// Decoder complaint.
        reason: String,
    },

    /// The declared and computed blob versioned hashes differ.
    #[error("blob versioned hashes mismatch")]
    VersionedHashesMismatch,

    /// An execution-requests entry is malformed.
    #[error("invalid execution requests: {0}")]
    InvalidExecutionRequests(String),
}

/// Decodes the payload body into transactions.
pub fn decode_payload_transactions(
    transactions: &[Bytes],
) -> Result<Vec<TransactionSigned>, PayloadError> {
    transactions
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            TransactionSigned::decode_enveloped(raw)
                .map_err(|err| PayloadError::InvalidTransaction { index, reason: err.to_string() })
        })
        .collect()
}

/// Rebuilds the sealed block a V3 payload describes.
///
/// Execution payloads do not carry the PoA difficulty or the vote nonce;
/// imports derive them by trying every difficulty/nonce assignment
/// ({2, 1} x {drop, auth}) until one reproduces the declared block hash.
/// The vote candidate itself rides in the fee-recipient slot.
pub fn try_payload_into_block(
    payload: &ExecutionPayloadV3,
    parent_beacon_block_root: B256,
    requests_hash: Option<B256>,
) -> Result<SealedBlock, PayloadError> {
    let v2 = &payload.payload_inner;
    let v1 = &v2.payload_inner;

    let transactions = decode_payload_transactions(&v1.transactions)?;
    let body =
        BlockBody { transactions, withdrawals: Some(v2.withdrawals.clone()) };

    let base = Header {
        parent_hash: v1.parent_hash,
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        beneficiary: v1.fee_recipient,
        state_root: v1.state_root,
        transactions_root: body.calculate_tx_root(),
        receipts_root: v1.receipts_root,
        logs_bloom: v1.logs_bloom,
        difficulty: DIFF_INTURN,
        number: v1.block_number,
        gas_limit: v1.gas_limit,
        gas_used: v1.gas_used,
        timestamp: v1.timestamp,
        extra_data: v1.extra_data.clone(),
        mix_hash: v1.prev_randao,
        nonce: NONCE_DROP,
        base_fee_per_gas: Some(base_fee_to_u64(v1.base_fee_per_gas)),
        withdrawals_root: Some(alloy_consensus_withdrawals_root(&v2.withdrawals)),
        blob_gas_used: Some(payload.blob_gas_used),
        excess_blob_gas: Some(payload.excess_blob_gas),
        parent_beacon_block_root: Some(parent_beacon_block_root),
        requests_hash,
    };

    for difficulty in [DIFF_INTURN, DIFF_NOTURN] {
        for nonce in [NONCE_DROP, NONCE_AUTH] {
            let header = Header { difficulty, nonce, ..base.clone() };
            let hash = header.hash_slow();
            if hash == v1.block_hash {
                return Ok(SealedBlock { header: SealedHeader::new(header, hash), body });
            }
        }
    }
    Err(PayloadError::InvalidBlockHash { declared: v1.block_hash })
}

fn base_fee_to_u64(base_fee: U256) -> u64 {
    base_fee.try_into().unwrap_or(u64::MAX)
}

fn alloy_consensus_withdrawals_root(withdrawals: &[Withdrawal]) -> B256 {
    alloy_consensus::proofs::calculate_withdrawals_root(withdrawals)
}

/// Converts a locally built block back into the V3 payload shape.
pub fn block_into_payload(block: &SealedBlock) -> ExecutionPayloadV3 {
    let header = &block.header;
    let transactions = block
        .body
        .transactions
        .iter()
        .map(|tx| Bytes::from(tx.encoded_2718()))
        .collect();

    ExecutionPayloadV3 {
        payload_inner: ExecutionPayloadV2 {
            payload_inner: ExecutionPayloadV1 {
                parent_hash: header.parent_hash,
                fee_recipient: header.beneficiary,
                state_root: header.state_root,
                receipts_root: header.receipts_root,
                logs_bloom: header.logs_bloom,
                prev_randao: header.mix_hash,
                block_number: header.number,
                gas_limit: header.gas_limit,
                gas_used: header.gas_used,
                timestamp: header.timestamp,
                extra_data: header.extra_data.clone(),
                base_fee_per_gas: U256::from(header.base_fee_per_gas.unwrap_or_default()),
                block_hash: block.hash(),
                transactions,
            },
            withdrawals: block.body.withdrawals.clone().unwrap_or_default(),
        },
        blob_gas_used: header.blob_gas_used.unwrap_or_default(),
        excess_blob_gas: header.excess_blob_gas.unwrap_or_default(),
    }
}

/// Collects the blob versioned hashes of a body, in transaction order.
pub fn body_versioned_hashes(body: &BlockBody) -> Vec<B256> {
    body.transactions
        .iter()
        .flat_map(|tx| tx.blob_versioned_hashes().unwrap_or_default().iter().copied())
        .collect()
}

const DEPOSIT_REQUEST_TYPE: u8 = 0x00;
const WITHDRAWAL_REQUEST_TYPE: u8 = 0x01;
const CONSOLIDATION_REQUEST_TYPE: u8 = 0x02;

const DEPOSIT_REQUEST_SIZE: usize = 192;
const WITHDRAWAL_REQUEST_SIZE: usize = 76;
const CONSOLIDATION_REQUEST_SIZE: usize = 116;

/// Validates the EIP-7685 execution-requests array: strictly ascending
/// known types, non-empty payloads, and per-type element sizes (which pins
/// the per-type request counts the payload claims).
pub fn validate_execution_requests(requests: &[Bytes]) -> Result<(), PayloadError> {
    let mut last_type: Option<u8> = None;
    for request in requests {
        let Some((&request_type, data)) = request.split_first() else {
            return Err(PayloadError::InvalidExecutionRequests("empty request entry".into()));
        };
        if data.is_empty() {
            return Err(PayloadError::InvalidExecutionRequests(format!(
                "request type {request_type:#04x} has no payload"
            )));
        }
        if let Some(last) = last_type {
            if request_type <= last {
                return Err(PayloadError::InvalidExecutionRequests(
                    "request types not strictly ascending".into(),
                ));
            }
        }
        last_type = Some(request_type);

        let element_size = match request_type {
            DEPOSIT_REQUEST_TYPE => DEPOSIT_REQUEST_SIZE,
            WITHDRAWAL_REQUEST_TYPE => WITHDRAWAL_REQUEST_SIZE,
            CONSOLIDATION_REQUEST_TYPE => CONSOLIDATION_REQUEST_SIZE,
            other => {
                return Err(PayloadError::InvalidExecutionRequests(format!(
                    "unknown request type {other:#04x}"
                )))
            }
        };
        if data.len() % element_size != 0 {
            return Err(PayloadError::InvalidExecutionRequests(format!(
                "request type {request_type:#04x} payload is not a multiple of {element_size}"
            )));
        }
    }
    Ok(())
}

/// EIP-7685 commitment: `sha256(sha256(r_0) ++ sha256(r_1) ++ …)` over the
/// type-prefixed request entries.
pub fn execution_requests_hash(requests: &[Bytes]) -> B256 {
    let mut outer = Sha256::new();
    for request in requests {
        outer.update(Sha256::digest(request));
    }
    B256::from_slice(&outer.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_must_ascend_and_fit_their_type() {
        let deposit = Bytes::from([&[DEPOSIT_REQUEST_TYPE][..], &[0u8; 192][..]].concat());
        let withdrawal =
            Bytes::from([&[WITHDRAWAL_REQUEST_TYPE][..], &[0u8; 76][..]].concat());
        validate_execution_requests(&[deposit.clone(), withdrawal.clone()]).unwrap();

        // out of order
        assert!(validate_execution_requests(&[withdrawal.clone(), deposit.clone()]).is_err());
        // duplicate type
        assert!(validate_execution_requests(&[deposit.clone(), deposit]).is_err());
        // size mismatch
        let bad = Bytes::from([&[WITHDRAWAL_REQUEST_TYPE][..], &[0u8; 75][..]].concat());
        assert!(validate_execution_requests(&[bad]).is_err());
        // unknown type
        let unknown = Bytes::from(vec![0x07, 0x00]);
        assert!(validate_execution_requests(&[unknown]).is_err());
    }

    #[test]
    fn requests_hash_matches_the_empty_commitment() {
        // sha256 of empty input, the well-known empty requests hash
        assert_eq!(
            execution_requests_hash(&[]),
            alloy_primitives::b256!(
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            )
        );
    }

    #[test]
    fn payload_roundtrip_preserves_the_block_hash() {
        let block = SealedBlock {
            header: SealedHeader::seal_slow(Header {
                difficulty: DIFF_INTURN,
                number: 7,
                gas_limit: 30_000_000,
                base_fee_per_gas: Some(1_000_000_000),
                withdrawals_root: Some(alloy_consensus_withdrawals_root(&[])),
                blob_gas_used: Some(0),
                excess_blob_gas: Some(0),
                parent_beacon_block_root: Some(B256::ZERO),
                transactions_root: BlockBody::default().calculate_tx_root(),
                nonce: NONCE_DROP,
                ommers_hash: EMPTY_OMMER_ROOT_HASH,
                ..Default::default()
            }),
            body: BlockBody { transactions: vec![], withdrawals: Some(vec![]) },
        };

        let payload = block_into_payload(&block);
        let rebuilt = try_payload_into_block(&payload, B256::ZERO, None).unwrap();
        assert_eq!(rebuilt.hash(), block.hash());
        assert_eq!(rebuilt.header.difficulty, DIFF_INTURN);
    }
}
