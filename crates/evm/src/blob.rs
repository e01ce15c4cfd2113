//! EIP-4844 blob accounting checks, with the EIP-7691 schedule once
//! Pectra is active.

use alloy_eips::eip4844::VERSIONED_HASH_VERSION_KZG;
use aura_chainspec::ChainSpec;
use aura_primitives::{constants::GAS_PER_BLOB, Block, Header, B256};

/// Blob validation failure, phrased for Engine-API error surfaces.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum BlobError {
    /// The payload carries more blobs than the active schedule allows.
    #[error("too many blobs: have {have}, max {max}")]
    TooManyBlobs {
        /// Blobs in the payload.
        have: u64,
        /// Maximum under the active schedule.
        max: u64,
    },

    /// Declared blob gas does not match `blobs * GAS_PER_BLOB`.
    #[error("blob gas mismatch: header {declared}, computed {computed}")]
    BlobGasMismatch {
        /// Value in the header.
        declared: u64,
        /// Value computed from the body.
        computed: u64,
    },

    /// Blob fields present although blobs are not active.
    #[error("blob gas fields are not expected before cancun")]
    UnexpectedBlobGasFields,

    /// Blob fields missing although blobs are active.
    #[error("blob gas fields are missing")]
    MissingBlobGasFields,

    /// The excess blob gas does not follow from the parent.
    #[error("invalid excess blob gas: header {declared}, expected {expected}")]
    ExcessBlobGasMismatch {
        /// Value in the header.
        declared: u64,
        /// Value derived from the parent.
        expected: u64,
    },

    /// A versioned hash without the 0x01 KZG version prefix.
    #[error("invalid blob versioned hash {0}")]
    InvalidVersionedHash(B256),
}

/// Validates the blob gas fields of `header` against its parent and the
/// schedule in force at the header timestamp.
pub fn validate_blob_header(
    chain_spec: &ChainSpec,
    parent: &Header,
    header: &Header,
) -> Result<(), BlobError> {
    let Some(params) = chain_spec.blob_params_at_timestamp(header.timestamp) else {
        if header.blob_gas_used.is_some() || header.excess_blob_gas.is_some() {
            return Err(BlobError::UnexpectedBlobGasFields);
        }
        return Ok(());
    };

    let (Some(blob_gas_used), Some(excess_blob_gas)) =
        (header.blob_gas_used, header.excess_blob_gas)
    else {
        return Err(BlobError::MissingBlobGasFields);
    };

    if blob_gas_used % GAS_PER_BLOB != 0 {
        return Err(BlobError::BlobGasMismatch {
            declared: blob_gas_used,
            computed: blob_gas_used / GAS_PER_BLOB * GAS_PER_BLOB,
        });
    }
    let max_blob_gas = params.max_blobs_per_block * GAS_PER_BLOB;
    if blob_gas_used > max_blob_gas {
        return Err(BlobError::TooManyBlobs {
            have: blob_gas_used / GAS_PER_BLOB,
            max: params.max_blobs_per_block,
        });
    }

    let expected = chain_spec
        .next_block_excess_blob_gas(parent, header.timestamp)
        .unwrap_or_default();
    if excess_blob_gas != expected {
        return Err(BlobError::ExcessBlobGasMismatch { declared: excess_blob_gas, expected });
    }
    Ok(())
}

/// Validates the blob content of a block body against its header: blob
/// count under the schedule cap, declared blob gas equal to the computed
/// sum, and well-formed versioned hashes.
pub fn validate_blob_transaction(chain_spec: &ChainSpec, block: &Block) -> Result<(), BlobError> {
    let Some(params) = chain_spec.blob_params_at_timestamp(block.header.timestamp) else {
        return Ok(());
    };

    let blob_count = block.body.blob_count();
    if blob_count > params.max_blobs_per_block {
        return Err(BlobError::TooManyBlobs { have: blob_count, max: params.max_blobs_per_block });
    }

    let computed = block.body.blob_gas_used();
    let declared = block.header.blob_gas_used.ok_or(BlobError::MissingBlobGasFields)?;
    if declared != computed {
        return Err(BlobError::BlobGasMismatch { declared, computed });
    }

    for tx in &block.body.transactions {
        for hash in tx.blob_versioned_hashes().unwrap_or_default() {
            if hash.as_slice()[0] != VERSIONED_HASH_VERSION_KZG {
                return Err(BlobError::InvalidVersionedHash(*hash));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_chainspec::MAINNET;
    use aura_primitives::BlockBody;

    fn pectra_header(blob_gas_used: u64) -> Header {
        Header {
            timestamp: MAINNET.genesis.timestamp,
            blob_gas_used: Some(blob_gas_used),
            excess_blob_gas: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn nine_blobs_fit_under_pectra_ten_do_not() {
        let block =
            Block { header: pectra_header(9 * GAS_PER_BLOB), body: BlockBody::default() };
        // the body is empty so declared-vs-computed fails, but the count
        // check passes; probe the header-side cap directly
        let parent = Header { timestamp: MAINNET.genesis.timestamp, blob_gas_used: Some(0), excess_blob_gas: Some(0), ..Default::default() };
        assert_eq!(validate_blob_header(&MAINNET, &parent, &block.header), Ok(()));

        let over = pectra_header(10 * GAS_PER_BLOB);
        assert_eq!(
            validate_blob_header(&MAINNET, &parent, &over),
            Err(BlobError::TooManyBlobs { have: 10, max: 9 })
        );
    }

    #[test]
    fn declared_blob_gas_must_match_body() {
        let block = Block { header: pectra_header(GAS_PER_BLOB), body: BlockBody::default() };
        assert_eq!(
            validate_blob_transaction(&MAINNET, &block),
            Err(BlobError::BlobGasMismatch { declared: GAS_PER_BLOB, computed: 0 })
        );
    }

    #[test]
    fn misaligned_blob_gas_is_rejected() {
        let parent = pectra_header(0);
        let header = pectra_header(GAS_PER_BLOB + 1);
        assert!(matches!(
            validate_blob_header(&MAINNET, &parent, &header),
            Err(BlobError::BlobGasMismatch { .. })
        ));
    }
}
