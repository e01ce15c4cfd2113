use crate::{
    changes,
    error::StateError,
    history_index::deserialize_bitmap,
    reader::{PlainStateReader, StateReader},
};
use aura_db::{
    tables,
    tables::{AccountHistoryKey, StorageHistoryKey},
    Tx,
};
use aura_primitives::{Address, Bytes, StateAccount, B256, U256};
use libmdbx::TransactionKind;

/// Point-in-time reads backed by the history bitmaps and change-sets.
///
/// A reader anchored at block `N` yields state as visible at the *end of
/// block `N - 1`*: for a key, the smallest indexed change-block `M >= N` is
/// located and the pre-image recorded by block `M`'s change-set returned;
/// if no such `M` exists the key is unchanged since, and the plain bucket
/// answers.
#[derive(Debug)]
pub struct HistoryStateReader<'tx, K: TransactionKind> {
    tx: &'tx Tx<'tx, K>,
    plain: PlainStateReader<'tx, K>,
    block_number: u64,
}

impl<'tx, K: TransactionKind> HistoryStateReader<'tx, K> {
    /// Reader anchored at `block_number` (state at end of `block_number - 1`).
    pub const fn new(tx: &'tx Tx<'tx, K>, block_number: u64) -> Self {
        Self { tx, plain: PlainStateReader::new(tx), block_number }
    }

    /// Reader yielding state as of the end of `block_number`, the anchor
    /// RPC block tags resolve to.
    pub const fn at_end_of(tx: &'tx Tx<'tx, K>, block_number: u64) -> Self {
        Self::new(tx, block_number + 1)
    }

    /// The anchor block.
    pub const fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Smallest indexed block `M >= N` where the account changed.
    fn next_account_change(&self, address: Address) -> Result<Option<u64>, StateError> {
        let mut cursor = self.tx.cursor::<tables::AccountsHistory>()?;
        let seek = AccountHistoryKey { address, highest_block: self.block_number };
        let Some((key, raw)) = cursor.seek(seek)? else {
            return Ok(None);
        };
        if key.address != address {
            return Ok(None);
        }
        let bitmap = deserialize_bitmap(&raw)?;
        Ok(bitmap.iter().find(|&block| block >= self.block_number))
    }

    /// Smallest indexed block `M >= N` where the storage slot changed.
    fn next_storage_change(
        &self,
        address: Address,
        slot: B256,
    ) -> Result<Option<u64>, StateError> {
        let mut cursor = self.tx.cursor::<tables::StorageHistory>()?;
        let seek = StorageHistoryKey { address, slot, highest_block: self.block_number };
        let Some((key, raw)) = cursor.seek(seek)? else {
            return Ok(None);
        };
        if key.address != address || key.slot != slot {
            return Ok(None);
        }
        let bitmap = deserialize_bitmap(&raw)?;
        Ok(bitmap.iter().find(|&block| block >= self.block_number))
    }
}

impl<'tx, K: TransactionKind> StateReader for HistoryStateReader<'tx, K> {
    fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError> {
        let Some(change_block) = self.next_account_change(address)? else {
            return self.plain.read_account(address);
        };
        let pre = changes::account_pre_image(self.tx, change_block, address)?
            .ok_or(StateError::ChangeSetGap { block_number: change_block })?;
        if pre.is_empty() {
            // the account came into existence at `change_block`
            return Ok(None);
        }
        let account = StateAccount::decode_for_storage(&pre).map_err(StateError::corrupt)?;
        Ok(Some(account))
    }

    fn read_storage(
        &self,
        address: Address,
        incarnation: u16,
        slot: B256,
    ) -> Result<Option<U256>, StateError> {
        let Some(change_block) = self.next_storage_change(address, slot)? else {
            return self.plain.read_storage(address, incarnation, slot);
        };
        // a miss here means the slot only ever changed under a different
        // incarnation; at this anchor it was unset
        let Some(pre) =
            changes::storage_pre_value(self.tx, change_block, address, incarnation, slot)?
        else {
            return Ok(None);
        };
        if pre.is_empty() {
            return Ok(None);
        }
        Ok(Some(U256::from_be_slice(&pre)))
    }

    fn read_code(
        &self,
        address: Address,
        incarnation: u16,
        code_hash: B256,
    ) -> Result<Option<Bytes>, StateError> {
        self.plain.read_code(address, incarnation, code_hash)
    }

    fn read_incarnation(&self, address: Address) -> Result<u16, StateError> {
        Ok(self.read_account(address)?.map(|account| account.incarnation).unwrap_or_default())
    }
}
