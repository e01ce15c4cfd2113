//! Value encodings shared by the chain buckets.

use crate::{error::DatabaseError, tables::{Decode, Encode}};
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::Address;
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};

/// [`crate::tables::BlockBody`] value: the transactions of the block live in
/// [`crate::tables::BlockTx`] as a contiguous id range.
#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct StoredBlockBody {
    /// Global id of the first transaction of the block.
    pub base_tx_id: u64,
    /// Number of transactions in the block.
    pub tx_count: u64,
    /// Whether the block carries a (possibly empty) withdrawals list.
    pub has_withdrawals: bool,
    /// Consensus-layer withdrawals.
    pub withdrawals: Vec<Withdrawal>,
}

impl StoredBlockBody {
    /// Encodes for storage.
    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes a stored body.
    pub fn decode_value(mut data: &[u8]) -> Result<Self, DatabaseError> {
        Self::decode(&mut data).map_err(|e| DatabaseError::decode("BlockBody", e))
    }
}

/// [`crate::tables::TxLookup`] value: where a transaction landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMeta {
    /// Canonical block height.
    pub block_number: u64,
    /// Index within the block.
    pub tx_index: u32,
}

impl Encode for TxMeta {
    type Encoded = [u8; 12];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.block_number.to_be_bytes());
        out[8..].copy_from_slice(&self.tx_index.to_be_bytes());
        out
    }
}

impl Decode for TxMeta {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 12 {
            return Err(DatabaseError::decode("TxMeta", "expected 12 bytes"));
        }
        Ok(Self {
            block_number: u64::from_be_bytes(data[..8].try_into().unwrap()),
            tx_index: u32::from_be_bytes(data[8..].try_into().unwrap()),
        })
    }
}

/// One entry of the account change-set: the pre-image an account had before
/// the block that wrote the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBeforeChange {
    /// Mutated account.
    pub address: Address,
    /// Storage encoding of the account before the block; empty when the
    /// account did not exist.
    pub before: Vec<u8>,
}

impl AccountBeforeChange {
    /// Dup-value encoding: `address || pre_image`.
    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.before.len());
        out.extend_from_slice(self.address.as_slice());
        out.extend_from_slice(&self.before);
        out
    }

    /// Decodes a dup value.
    pub fn decode_value(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() < 20 {
            return Err(DatabaseError::decode("AccountChangeSet", "value shorter than address"));
        }
        Ok(Self { address: Address::from_slice(&data[..20]), before: data[20..].to_vec() })
    }
}

/// One entry of the storage change-set: the pre-value a slot had before the
/// block that wrote the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageBeforeChange {
    /// Mutated slot.
    pub slot: alloy_primitives::B256,
    /// Zero-trimmed big-endian pre-value; empty when the slot was unset.
    pub before: Vec<u8>,
}

impl StorageBeforeChange {
    /// Dup-value encoding: `slot || pre_value`.
    pub fn encode_value(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.before.len());
        out.extend_from_slice(self.slot.as_slice());
        out.extend_from_slice(&self.before);
        out
    }

    /// Decodes a dup value.
    pub fn decode_value(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() < 32 {
            return Err(DatabaseError::decode("StorageChangeSet", "value shorter than slot"));
        }
        Ok(Self {
            slot: alloy_primitives::B256::from_slice(&data[..32]),
            before: data[32..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{Decode as _, Encode as _};
    use alloy_primitives::B256;

    #[test]
    fn stored_body_roundtrip() {
        let body = StoredBlockBody {
            base_tx_id: 77,
            tx_count: 3,
            has_withdrawals: true,
            withdrawals: vec![Withdrawal {
                index: 1,
                validator_index: 2,
                address: Address::new([9u8; 20]),
                amount: 1_000_000,
            }],
        };
        assert_eq!(StoredBlockBody::decode_value(&body.encode_value()).unwrap(), body);
    }

    #[test]
    fn tx_meta_roundtrip() {
        let meta = TxMeta { block_number: 123_456, tx_index: 9 };
        assert_eq!(TxMeta::decode(meta.encode().as_ref()).unwrap(), meta);
    }

    #[test]
    fn change_set_values_roundtrip() {
        let account = AccountBeforeChange { address: Address::new([1u8; 20]), before: vec![] };
        assert_eq!(
            AccountBeforeChange::decode_value(&account.encode_value()).unwrap(),
            account
        );

        let storage =
            StorageBeforeChange { slot: B256::new([2u8; 32]), before: vec![0xff, 0x01] };
        assert_eq!(
            StorageBeforeChange::decode_value(&storage.encode_value()).unwrap(),
            storage
        );
    }
}
