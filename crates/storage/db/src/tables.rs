//! The bucket catalog and its key/value codecs.
//!
//! Access discipline: plain-state buckets are written only by the state
//! layer, chain buckets by the chain writer, consensus buckets by the
//! consensus engine. Keys sort byte-wise, so all integers encode
//! big-endian.

use crate::DatabaseError;
use alloy_primitives::{Address, B256, U256};
use aura_primitives::StateAccount;
use bytes::Bytes;

/// A typed bucket.
pub trait Table: Send + Sync + 'static {
    /// Bucket name inside the store.
    const NAME: &'static str;
    /// Whether the bucket keeps sorted duplicate values per key.
    const DUP_SORT: bool = false;

    /// Key type.
    type Key: Encode + Decode + Ord + Clone;
    /// Value type.
    type Value: Encode + Decode;
}

/// Byte-level key/value encoding.
pub trait Encode: Sized {
    /// Encoded representation.
    type Encoded: AsRef<[u8]> + Send;

    /// Encodes the value.
    fn encode(self) -> Self::Encoded;
}

/// Byte-level key/value decoding.
pub trait Decode: Sized {
    /// Decodes from stored bytes.
    fn decode(data: &[u8]) -> Result<Self, DatabaseError>;
}

// --- scalar codecs ---------------------------------------------------------

impl Encode for u64 {
    type Encoded = [u8; 8];
    fn encode(self) -> Self::Encoded {
        self.to_be_bytes()
    }
}

impl Decode for u64 {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| DatabaseError::decode("u64", "expected 8 bytes"))?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl Encode for u16 {
    type Encoded = [u8; 2];
    fn encode(self) -> Self::Encoded {
        self.to_be_bytes()
    }
}

impl Decode for u16 {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        let bytes: [u8; 2] = data
            .try_into()
            .map_err(|_| DatabaseError::decode("u16", "expected 2 bytes"))?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl Encode for Address {
    type Encoded = [u8; 20];
    fn encode(self) -> Self::Encoded {
        self.0 .0
    }
}

impl Decode for Address {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 20 {
            return Err(DatabaseError::decode("Address", "expected 20 bytes"));
        }
        Ok(Self::from_slice(data))
    }
}

impl Encode for B256 {
    type Encoded = [u8; 32];
    fn encode(self) -> Self::Encoded {
        self.0
    }
}

impl Decode for B256 {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 32 {
            return Err(DatabaseError::decode("B256", "expected 32 bytes"));
        }
        Ok(Self::from_slice(data))
    }
}

// Stored as a zero-trimmed big-endian payload.
impl Encode for U256 {
    type Encoded = Vec<u8>;
    fn encode(self) -> Self::Encoded {
        let be = self.to_be_bytes::<32>();
        let start = be.iter().position(|b| *b != 0).unwrap_or(32);
        be[start..].to_vec()
    }
}

impl Decode for U256 {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() > 32 {
            return Err(DatabaseError::decode("U256", "longer than 32 bytes"));
        }
        Ok(Self::from_be_slice(data))
    }
}

impl Encode for Vec<u8> {
    type Encoded = Self;
    fn encode(self) -> Self::Encoded {
        self
    }
}

impl Decode for Vec<u8> {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        Ok(data.to_vec())
    }
}

impl Encode for Bytes {
    type Encoded = Self;
    fn encode(self) -> Self::Encoded {
        self
    }
}

impl Decode for Bytes {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        Ok(Self::copy_from_slice(data))
    }
}

impl Encode for String {
    type Encoded = Vec<u8>;
    fn encode(self) -> Self::Encoded {
        self.into_bytes()
    }
}

impl Decode for String {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        Self::from_utf8(data.to_vec()).map_err(|e| DatabaseError::decode("String", e))
    }
}

impl Encode for StateAccount {
    type Encoded = Vec<u8>;
    fn encode(self) -> Self::Encoded {
        self.encode_for_storage()
    }
}

impl Decode for StateAccount {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        Self::decode_for_storage(data).map_err(|e| DatabaseError::decode("StateAccount", e))
    }
}

// --- composite keys --------------------------------------------------------

/// `block_number || hash` (40 bytes), the key of header-family buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HeaderKey {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
}

impl Encode for HeaderKey {
    type Encoded = [u8; 40];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 40];
        out[..8].copy_from_slice(&self.number.to_be_bytes());
        out[8..].copy_from_slice(self.hash.as_slice());
        out
    }
}

impl Decode for HeaderKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 40 {
            return Err(DatabaseError::decode("HeaderKey", "expected 40 bytes"));
        }
        Ok(Self {
            number: u64::from_be_bytes(data[..8].try_into().unwrap()),
            hash: B256::from_slice(&data[8..]),
        })
    }
}

/// `address || incarnation || slot` (54 bytes), the plain storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlainStorageKey {
    /// Account address.
    pub address: Address,
    /// Storage generation of the account.
    pub incarnation: u16,
    /// Slot hash.
    pub slot: B256,
}

impl Encode for PlainStorageKey {
    type Encoded = [u8; 54];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 54];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..22].copy_from_slice(&self.incarnation.to_be_bytes());
        out[22..].copy_from_slice(self.slot.as_slice());
        out
    }
}

impl Decode for PlainStorageKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 54 {
            return Err(DatabaseError::decode("PlainStorageKey", "expected 54 bytes"));
        }
        Ok(Self {
            address: Address::from_slice(&data[..20]),
            incarnation: u16::from_be_bytes(data[20..22].try_into().unwrap()),
            slot: B256::from_slice(&data[22..]),
        })
    }
}

/// `address || incarnation` (22 bytes), linking an account generation to its
/// code hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContractCodeKey {
    /// Account address.
    pub address: Address,
    /// Storage generation.
    pub incarnation: u16,
}

impl Encode for ContractCodeKey {
    type Encoded = [u8; 22];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 22];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..].copy_from_slice(&self.incarnation.to_be_bytes());
        out
    }
}

impl Decode for ContractCodeKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 22 {
            return Err(DatabaseError::decode("ContractCodeKey", "expected 22 bytes"));
        }
        Ok(Self {
            address: Address::from_slice(&data[..20]),
            incarnation: u16::from_be_bytes(data[20..].try_into().unwrap()),
        })
    }
}

/// `block || address || incarnation` (30 bytes), the storage change-set key.
/// Dup values under it carry `slot || previous_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorageChangeSetKey {
    /// Block the change happened in.
    pub block_number: u64,
    /// Mutated account.
    pub address: Address,
    /// Storage generation at mutation time.
    pub incarnation: u16,
}

impl Encode for StorageChangeSetKey {
    type Encoded = [u8; 30];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 30];
        out[..8].copy_from_slice(&self.block_number.to_be_bytes());
        out[8..28].copy_from_slice(self.address.as_slice());
        out[28..].copy_from_slice(&self.incarnation.to_be_bytes());
        out
    }
}

impl Decode for StorageChangeSetKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 30 {
            return Err(DatabaseError::decode("StorageChangeSetKey", "expected 30 bytes"));
        }
        Ok(Self {
            block_number: u64::from_be_bytes(data[..8].try_into().unwrap()),
            address: Address::from_slice(&data[8..28]),
            incarnation: u16::from_be_bytes(data[28..].try_into().unwrap()),
        })
    }
}

/// `address || shard_upper_bound` (28 bytes), the account history shard key.
///
/// The open shard carries `u64::MAX` so that a range seek from any block
/// number always lands on the right shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccountHistoryKey {
    /// Indexed account.
    pub address: Address,
    /// Highest block number contained in the shard.
    pub highest_block: u64,
}

impl Encode for AccountHistoryKey {
    type Encoded = [u8; 28];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 28];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..].copy_from_slice(&self.highest_block.to_be_bytes());
        out
    }
}

impl Decode for AccountHistoryKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 28 {
            return Err(DatabaseError::decode("AccountHistoryKey", "expected 28 bytes"));
        }
        Ok(Self {
            address: Address::from_slice(&data[..20]),
            highest_block: u64::from_be_bytes(data[20..].try_into().unwrap()),
        })
    }
}

/// `address || slot || shard_upper_bound` (60 bytes), the storage history
/// shard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StorageHistoryKey {
    /// Indexed account.
    pub address: Address,
    /// Indexed slot.
    pub slot: B256,
    /// Highest block number contained in the shard.
    pub highest_block: u64,
}

impl Encode for StorageHistoryKey {
    type Encoded = [u8; 60];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 60];
        out[..20].copy_from_slice(self.address.as_slice());
        out[20..52].copy_from_slice(self.slot.as_slice());
        out[52..].copy_from_slice(&self.highest_block.to_be_bytes());
        out
    }
}

impl Decode for StorageHistoryKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 60 {
            return Err(DatabaseError::decode("StorageHistoryKey", "expected 60 bytes"));
        }
        Ok(Self {
            address: Address::from_slice(&data[..20]),
            slot: B256::from_slice(&data[20..52]),
            highest_block: u64::from_be_bytes(data[52..].try_into().unwrap()),
        })
    }
}

/// `block || tx_index` (12 bytes), the log bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogKey {
    /// Block the logs were emitted in.
    pub block_number: u64,
    /// Transaction index within the block.
    pub tx_index: u32,
}

impl Encode for LogKey {
    type Encoded = [u8; 12];
    fn encode(self) -> Self::Encoded {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.block_number.to_be_bytes());
        out[8..].copy_from_slice(&self.tx_index.to_be_bytes());
        out
    }
}

impl Decode for LogKey {
    fn decode(data: &[u8]) -> Result<Self, DatabaseError> {
        if data.len() != 12 {
            return Err(DatabaseError::decode("LogKey", "expected 12 bytes"));
        }
        Ok(Self {
            block_number: u64::from_be_bytes(data[..8].try_into().unwrap()),
            tx_index: u32::from_be_bytes(data[8..].try_into().unwrap()),
        })
    }
}

// --- catalog ---------------------------------------------------------------

macro_rules! table {
    ($(#[$docs:meta])* $name:ident, Key = $key:ty, Value = $value:ty) => {
        table!($(#[$docs])* $name, Key = $key, Value = $value, DupSort = false);
    };
    ($(#[$docs:meta])* $name:ident, Key = $key:ty, Value = $value:ty, DupSort = $dup:expr) => {
        $(#[$docs])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl Table for $name {
            const NAME: &'static str = stringify!($name);
            const DUP_SORT: bool = $dup;
            type Key = $key;
            type Value = $value;
        }
    };
}

table!(
    /// Plain account state: address to account record. Written only by the
    /// state layer.
    PlainAccount, Key = Address, Value = StateAccount
);
table!(
    /// Plain contract storage, keyed by `(address, incarnation, slot)`.
    PlainStorage, Key = PlainStorageKey, Value = U256
);
table!(
    /// Contract code, content-addressed by keccak256.
    Code, Key = B256, Value = Bytes
);
table!(
    /// `(address, incarnation)` to code hash.
    PlainContractCode, Key = ContractCodeKey, Value = B256
);
table!(
    /// Latest incarnation ever used per address; survives account deletion.
    IncarnationMap, Key = Address, Value = u16
);
table!(
    /// Per-block account pre-images: dup values of `address || pre_image`.
    AccountChangeSet, Key = u64, Value = Vec<u8>, DupSort = true
);
table!(
    /// Sharded bitmaps of blocks where an account changed.
    AccountsHistory, Key = AccountHistoryKey, Value = Vec<u8>
);
table!(
    /// Per-block storage pre-images: dup values of `slot || pre_value`.
    StorageChangeSet, Key = StorageChangeSetKey, Value = Vec<u8>, DupSort = true
);
table!(
    /// Sharded bitmaps of blocks where a storage slot changed.
    StorageHistory, Key = StorageHistoryKey, Value = Vec<u8>
);
table!(
    /// Block headers, RLP encoded.
    Headers, Key = HeaderKey, Value = Vec<u8>
);
table!(
    /// Header hash to block number.
    HeaderNumber, Key = B256, Value = u64
);
table!(
    /// Total difficulty per header.
    HeaderTD, Key = HeaderKey, Value = U256
);
table!(
    /// Canonical chain: block number to hash. Exactly one entry per
    /// committed height.
    HeaderCanonical, Key = u64, Value = B256
);
table!(
    /// Hash of the latest full block, under a fixed key.
    HeadBlockKey, Key = String, Value = B256
);
table!(
    /// Hash of the latest known header, under a fixed key.
    HeadHeaderKey, Key = String, Value = B256
);
table!(
    /// Block bodies: base tx id, count and withdrawals.
    BlockBody, Key = HeaderKey, Value = Vec<u8>
);
table!(
    /// Transactions by global tx id, EIP-2718 encoded.
    BlockTx, Key = u64, Value = Vec<u8>
);
table!(
    /// Transaction hash to `(block_number, tx_index)`.
    TxLookup, Key = B256, Value = Vec<u8>
);
table!(
    /// Recovered senders of a block, 20 bytes each, concatenated.
    Senders, Key = HeaderKey, Value = Vec<u8>
);
table!(
    /// Receipts per block (status/gas only; logs live in [`Log`]).
    Receipts, Key = u64, Value = Vec<u8>
);
table!(
    /// Logs per `(block, tx_index)`, RLP encoded.
    Log, Key = LogKey, Value = Vec<u8>
);
table!(
    /// Consensus snapshots by block hash, JSON encoded.
    SignersDB, Key = B256, Value = Vec<u8>
);
table!(
    /// Index of persisted snapshots: block number to snapshot block hash.
    PoaSnapshot, Key = u64, Value = B256
);
table!(
    /// Node-level metadata (schema version, genesis hash).
    DatabaseInfo, Key = String, Value = Vec<u8>
);
table!(
    /// The chain config the store was initialized with, JSON encoded.
    ChainConfig, Key = String, Value = Vec<u8>
);
table!(
    /// Named monotonic counters.
    Sequence, Key = String, Value = u64
);

/// Fixed key of the single-entry head buckets.
pub const HEAD_KEY: &str = "head";

/// All buckets with their dup-sort flag, in creation order.
pub const TABLES: [(&str, bool); 26] = [
    (PlainAccount::NAME, false),
    (PlainStorage::NAME, false),
    (Code::NAME, false),
    (PlainContractCode::NAME, false),
    (IncarnationMap::NAME, false),
    (AccountChangeSet::NAME, true),
    (AccountsHistory::NAME, false),
    (StorageChangeSet::NAME, true),
    (StorageHistory::NAME, false),
    (Headers::NAME, false),
    (HeaderNumber::NAME, false),
    (HeaderTD::NAME, false),
    (HeaderCanonical::NAME, false),
    (HeadBlockKey::NAME, false),
    (HeadHeaderKey::NAME, false),
    (BlockBody::NAME, false),
    (BlockTx::NAME, false),
    (TxLookup::NAME, false),
    (Senders::NAME, false),
    (Receipts::NAME, false),
    (Log::NAME, false),
    (SignersDB::NAME, false),
    (PoaSnapshot::NAME, false),
    (DatabaseInfo::NAME, false),
    (ChainConfig::NAME, false),
    (Sequence::NAME, false),
];

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn composite_keys_roundtrip() {
        let header_key = HeaderKey { number: 42, hash: b256!("00000000000000000000000000000000000000000000000000000000deadbeef") };
        assert_eq!(HeaderKey::decode(header_key.encode().as_ref()).unwrap(), header_key);

        let storage_key = PlainStorageKey {
            address: Address::new([7u8; 20]),
            incarnation: 2,
            slot: B256::new([9u8; 32]),
        };
        assert_eq!(PlainStorageKey::decode(storage_key.encode().as_ref()).unwrap(), storage_key);

        let shard = StorageHistoryKey {
            address: Address::new([1u8; 20]),
            slot: B256::new([2u8; 32]),
            highest_block: u64::MAX,
        };
        assert_eq!(StorageHistoryKey::decode(shard.encode().as_ref()).unwrap(), shard);
    }

    #[test]
    fn block_numbers_sort_bytewise() {
        // big-endian keys must sort like their integers
        let smaller = 255u64.encode();
        let bigger = 256u64.encode();
        assert!(smaller.as_ref() < bigger.as_ref());
    }

    #[test]
    fn u256_trims_leading_zeros() {
        let value = U256::from(0xff00u64);
        let encoded = value.encode();
        assert_eq!(encoded.len(), 2);
        assert_eq!(U256::decode(&encoded).unwrap(), value);
        assert!(U256::ZERO.encode().is_empty());
    }

    #[test]
    fn catalog_has_no_duplicate_names() {
        let mut names: Vec<_> = TABLES.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TABLES.len());
    }
}
