//! Sharded history bitmaps.
//!
//! For every key that ever changed, a roaring bitmap records the block
//! numbers of its changes. Bitmaps are sharded by block-number range: the
//! open shard carries `u64::MAX` as its key suffix; once its serialized
//! size crosses the chunk limit it is re-keyed under its highest contained
//! block and a fresh open shard starts with the next change.

use crate::error::StateError;
use aura_db::{
    tables,
    tables::{AccountHistoryKey, StorageHistoryKey},
    TxMut,
};
use aura_primitives::{Address, B256};
use roaring::RoaringTreemap;

/// Serialized shard size that closes a shard, bytes.
pub const DEFAULT_SHARD_CHUNK_SIZE: usize = 64 * 1024;

/// Maintains the account and storage history bitmaps.
#[derive(Debug, Clone, Copy)]
pub struct HistoryIndexer {
    chunk_size: usize,
}

impl Default for HistoryIndexer {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_SHARD_CHUNK_SIZE }
    }
}

impl HistoryIndexer {
    /// Indexer closing shards at `chunk_size` serialized bytes.
    pub const fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Marks `block_number` as a change-block of `address`.
    pub fn index_account_change(
        &self,
        tx: &TxMut<'_>,
        address: Address,
        block_number: u64,
    ) -> Result<(), StateError> {
        let open_key = AccountHistoryKey { address, highest_block: u64::MAX };
        let mut bitmap = match tx.get::<tables::AccountsHistory>(open_key)? {
            Some(raw) => deserialize_bitmap(&raw)?,
            None => RoaringTreemap::new(),
        };
        bitmap.insert(block_number);

        if bitmap.serialized_size() > self.chunk_size {
            let highest = bitmap.max().expect("bitmap with inserted bit has a max");
            tx.put::<tables::AccountsHistory>(
                AccountHistoryKey { address, highest_block: highest },
                serialize_bitmap(&bitmap),
            )?;
            tx.delete::<tables::AccountsHistory>(open_key, None)?;
        } else {
            tx.put::<tables::AccountsHistory>(open_key, serialize_bitmap(&bitmap))?;
        }
        Ok(())
    }

    /// Marks `block_number` as a change-block of `(address, slot)`.
    pub fn index_storage_change(
        &self,
        tx: &TxMut<'_>,
        address: Address,
        slot: B256,
        block_number: u64,
    ) -> Result<(), StateError> {
        let open_key = StorageHistoryKey { address, slot, highest_block: u64::MAX };
        let mut bitmap = match tx.get::<tables::StorageHistory>(open_key)? {
            Some(raw) => deserialize_bitmap(&raw)?,
            None => RoaringTreemap::new(),
        };
        bitmap.insert(block_number);

        if bitmap.serialized_size() > self.chunk_size {
            let highest = bitmap.max().expect("bitmap with inserted bit has a max");
            tx.put::<tables::StorageHistory>(
                StorageHistoryKey { address, slot, highest_block: highest },
                serialize_bitmap(&bitmap),
            )?;
            tx.delete::<tables::StorageHistory>(open_key, None)?;
        } else {
            tx.put::<tables::StorageHistory>(open_key, serialize_bitmap(&bitmap))?;
        }
        Ok(())
    }
}

pub(crate) fn serialize_bitmap(bitmap: &RoaringTreemap) -> Vec<u8> {
    let mut out = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut out).expect("serializing into a Vec cannot fail");
    out
}

pub(crate) fn deserialize_bitmap(raw: &[u8]) -> Result<RoaringTreemap, StateError> {
    RoaringTreemap::deserialize_from(raw).map_err(StateError::corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_db::test_utils::create_test_db;

    #[test]
    fn open_shard_accumulates_bits() {
        let (env, _dir) = create_test_db();
        let indexer = HistoryIndexer::default();
        let address = Address::new([1u8; 20]);

        let tx = env.tx_mut().unwrap();
        for block in [1u64, 5, 9] {
            indexer.index_account_change(&tx, address, block).unwrap();
        }
        tx.commit().unwrap();

        let raw = env
            .view(|tx| {
                tx.get::<tables::AccountsHistory>(AccountHistoryKey {
                    address,
                    highest_block: u64::MAX,
                })
            })
            .unwrap()
            .expect("open shard exists");
        let bitmap = deserialize_bitmap(&raw).unwrap();
        assert_eq!(bitmap.iter().collect::<Vec<_>>(), vec![1, 5, 9]);
    }

    #[test]
    fn oversized_shards_close_under_their_highest_block() {
        let (env, _dir) = create_test_db();
        // tiny chunk so a handful of sparse bits overflow it
        let indexer = HistoryIndexer::with_chunk_size(64);
        let address = Address::new([2u8; 20]);

        let tx = env.tx_mut().unwrap();
        let mut inserted = Vec::new();
        // sparse bits across the u32-container boundary blow up the
        // serialized size quickly
        for i in 0..64u64 {
            let block = i * (u32::MAX as u64 + 1);
            inserted.push(block);
            indexer.index_account_change(&tx, address, block).unwrap();
        }
        tx.commit().unwrap();

        let tx = env.tx().unwrap();
        let mut cursor = tx.cursor::<tables::AccountsHistory>().unwrap();
        let mut shards = Vec::new();
        let mut entry = cursor.seek_raw(address.as_slice()).unwrap();
        while let Some((key, raw)) = entry {
            if key.address != address {
                break;
            }
            shards.push((key, deserialize_bitmap(&raw).unwrap()));
            entry = cursor.next().unwrap();
        }

        assert!(shards.len() > 1, "the chunk limit must have closed at least one shard");
        let mut all_bits = Vec::new();
        for (key, bitmap) in &shards {
            if key.highest_block != u64::MAX {
                assert_eq!(key.highest_block, bitmap.max().unwrap());
            }
            all_bits.extend(bitmap.iter());
        }
        all_bits.sort_unstable();
        assert_eq!(all_bits, inserted, "union of shards covers every change");
    }
}
