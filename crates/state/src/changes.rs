//! Change-set lookups: the pre-image a key had before a given block.

use crate::error::StateError;
use aura_db::{
    models::{AccountBeforeChange, StorageBeforeChange},
    tables,
    tables::StorageChangeSetKey,
    Tx,
};
use aura_primitives::{Address, B256};
use libmdbx::TransactionKind;

/// The account pre-image recorded by the change-set of `block_number`, or
/// `None` when the account was not touched by that block. An empty byte
/// string means the account did not exist before the block.
pub fn account_pre_image<K: TransactionKind>(
    tx: &Tx<'_, K>,
    block_number: u64,
    address: Address,
) -> Result<Option<Vec<u8>>, StateError> {
    let mut cursor = tx.cursor::<tables::AccountChangeSet>()?;
    let Some(raw) = cursor.seek_by_key_subkey(block_number, address.as_slice())? else {
        return Ok(None);
    };
    let entry = AccountBeforeChange::decode_value(&raw)?;
    if entry.address != address {
        return Ok(None);
    }
    Ok(Some(entry.before))
}

/// The storage pre-value recorded by the change-set of `block_number` for
/// `(address, incarnation, slot)`. An empty byte string means the slot was
/// unset before the block.
pub fn storage_pre_value<K: TransactionKind>(
    tx: &Tx<'_, K>,
    block_number: u64,
    address: Address,
    incarnation: u16,
    slot: B256,
) -> Result<Option<Vec<u8>>, StateError> {
    let mut cursor = tx.cursor::<tables::StorageChangeSet>()?;
    let key = StorageChangeSetKey { block_number, address, incarnation };
    let Some(raw) = cursor.seek_by_key_subkey(key, slot.as_slice())? else {
        return Ok(None);
    };
    let entry = StorageBeforeChange::decode_value(&raw)?;
    if entry.slot != slot {
        return Ok(None);
    }
    Ok(Some(entry.before))
}
