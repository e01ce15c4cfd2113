use crate::{error::StateError, history_index::HistoryIndexer};
use aura_db::{
    models::{AccountBeforeChange, StorageBeforeChange},
    tables,
    tables::{ContractCodeKey, PlainStorageKey, StorageChangeSetKey},
    TxMut,
};
use aura_primitives::{keccak256, Address, Bytes, StateAccount, B256, U256};
use tracing::trace;

/// Sink for the dirty state of one block.
pub trait StateWriter {
    /// Replaces the account record. `initial` is the pre-block image (for
    /// the change-set); `account` the post-block image, `None` when the
    /// account no longer exists.
    fn update_account(
        &mut self,
        address: Address,
        initial: Option<StateAccount>,
        account: Option<StateAccount>,
    ) -> Result<(), StateError>;

    /// Stores freshly deployed code and links it to the account
    /// generation.
    fn update_code(
        &mut self,
        address: Address,
        incarnation: u16,
        code_hash: B256,
        code: &Bytes,
    ) -> Result<(), StateError>;

    /// Replaces a storage slot. `initial` is the pre-block value (for the
    /// change-set); zero `value` deletes the slot.
    fn write_storage(
        &mut self,
        address: Address,
        incarnation: u16,
        slot: B256,
        initial: U256,
        value: U256,
    ) -> Result<(), StateError>;

    /// Flushes change-sets and history indexes, returning the state root
    /// after this block.
    fn commit(&mut self) -> Result<B256, StateError>;
}

/// Accumulates the trie-less state commitment: the parent root folded with
/// the keccak of the sorted dirty set.
#[derive(Debug, Default)]
struct RootAccumulator {
    parent_root: B256,
    digest: Vec<u8>,
}

impl RootAccumulator {
    fn new(parent_root: B256) -> Self {
        Self { parent_root, digest: Vec::new() }
    }

    fn account_change(&mut self, address: Address, account: Option<&StateAccount>) {
        self.digest.extend_from_slice(address.as_slice());
        if let Some(account) = account {
            self.digest.extend_from_slice(&account.encode_for_storage());
        }
    }

    fn storage_change(&mut self, address: Address, incarnation: u16, slot: B256, value: U256) {
        self.digest.extend_from_slice(address.as_slice());
        self.digest.extend_from_slice(&incarnation.to_be_bytes());
        self.digest.extend_from_slice(slot.as_slice());
        self.digest.extend_from_slice(&value.to_be_bytes::<32>());
    }

    fn finish(&self) -> B256 {
        if self.digest.is_empty() {
            return self.parent_root;
        }
        let change_hash = keccak256(&self.digest);
        let mut root_input = [0u8; 64];
        root_input[..32].copy_from_slice(self.parent_root.as_slice());
        root_input[32..].copy_from_slice(change_hash.as_slice());
        keccak256(root_input)
    }
}

/// Computes the post-block state root without persisting anything. Used by
/// the payload builder, which must predict the root a later import of the
/// same block will produce.
#[derive(Debug)]
pub struct CommitmentWriter {
    acc: RootAccumulator,
}

impl CommitmentWriter {
    /// Commitment over `parent_root`.
    pub fn new(parent_root: B256) -> Self {
        Self { acc: RootAccumulator::new(parent_root) }
    }
}

impl StateWriter for CommitmentWriter {
    fn update_account(
        &mut self,
        address: Address,
        _initial: Option<StateAccount>,
        account: Option<StateAccount>,
    ) -> Result<(), StateError> {
        self.acc.account_change(address, account.as_ref());
        Ok(())
    }

    fn update_code(
        &mut self,
        _address: Address,
        _incarnation: u16,
        _code_hash: B256,
        _code: &Bytes,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn write_storage(
        &mut self,
        address: Address,
        incarnation: u16,
        slot: B256,
        _initial: U256,
        value: U256,
    ) -> Result<(), StateError> {
        self.acc.storage_change(address, incarnation, slot, value);
        Ok(())
    }

    fn commit(&mut self) -> Result<B256, StateError> {
        Ok(self.acc.finish())
    }
}

/// Drops every write; backs `eth_call` and gas-estimation simulations.
#[derive(Debug, Default)]
pub struct NoopWriter;

impl StateWriter for NoopWriter {
    fn update_account(
        &mut self,
        _address: Address,
        _initial: Option<StateAccount>,
        _account: Option<StateAccount>,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn update_code(
        &mut self,
        _address: Address,
        _incarnation: u16,
        _code_hash: B256,
        _code: &Bytes,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn write_storage(
        &mut self,
        _address: Address,
        _incarnation: u16,
        _slot: B256,
        _initial: U256,
        _value: U256,
    ) -> Result<(), StateError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<B256, StateError> {
        Ok(B256::ZERO)
    }
}

/// Writes dirty state into the plain buckets while recording per-block
/// pre-image change-sets and updating the history bitmaps.
///
/// Callers must feed accounts and slots in ascending key order (the
/// intra-block state does); change-set dup values are appended sorted.
pub struct PlainStateWriter<'a, 'env> {
    tx: &'a TxMut<'env>,
    block_number: u64,
    indexer: HistoryIndexer,
    account_changes: Vec<AccountBeforeChange>,
    storage_changes: Vec<(StorageChangeSetKey, StorageBeforeChange)>,
    acc: RootAccumulator,
}

impl<'a, 'env> std::fmt::Debug for PlainStateWriter<'a, 'env> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainStateWriter")
            .field("block_number", &self.block_number)
            .field("accounts", &self.account_changes.len())
            .field("slots", &self.storage_changes.len())
            .finish()
    }
}

impl<'a, 'env> PlainStateWriter<'a, 'env> {
    /// Writer for `block_number`, folding the commitment over
    /// `parent_root`.
    pub fn new(tx: &'a TxMut<'env>, block_number: u64, parent_root: B256) -> Self {
        Self {
            tx,
            block_number,
            indexer: HistoryIndexer::default(),
            account_changes: Vec::new(),
            storage_changes: Vec::new(),
            acc: RootAccumulator::new(parent_root),
        }
    }

    /// Overrides the shard chunk size of the history indexer.
    pub fn with_indexer(mut self, indexer: HistoryIndexer) -> Self {
        self.indexer = indexer;
        self
    }
}

impl<'a, 'env> StateWriter for PlainStateWriter<'a, 'env> {
    fn update_account(
        &mut self,
        address: Address,
        initial: Option<StateAccount>,
        account: Option<StateAccount>,
    ) -> Result<(), StateError> {
        let before = initial.map(|acc| acc.encode_for_storage()).unwrap_or_default();
        self.account_changes.push(AccountBeforeChange { address, before });
        self.acc.account_change(address, account.as_ref());

        match account {
            Some(account) => {
                if account.incarnation > 0 {
                    self.tx.put::<tables::IncarnationMap>(address, account.incarnation)?;
                }
                self.tx.put::<tables::PlainAccount>(address, account)?;
            }
            None => {
                // remember the incarnation across deletion so a later
                // re-creation keeps bumping monotonically
                if let Some(initial) = initial {
                    if initial.incarnation > 0 {
                        self.tx.put::<tables::IncarnationMap>(address, initial.incarnation)?;
                    }
                }
                self.tx.delete::<tables::PlainAccount>(address, None)?;
            }
        }
        Ok(())
    }

    fn update_code(
        &mut self,
        address: Address,
        incarnation: u16,
        code_hash: B256,
        code: &Bytes,
    ) -> Result<(), StateError> {
        self.tx.put::<tables::Code>(code_hash, code.clone())?;
        self.tx
            .put::<tables::PlainContractCode>(ContractCodeKey { address, incarnation }, code_hash)?;
        Ok(())
    }

    fn write_storage(
        &mut self,
        address: Address,
        incarnation: u16,
        slot: B256,
        initial: U256,
        value: U256,
    ) -> Result<(), StateError> {
        let before = if initial.is_zero() {
            Vec::new()
        } else {
            let be = initial.to_be_bytes::<32>();
            let start = be.iter().position(|b| *b != 0).unwrap_or(32);
            be[start..].to_vec()
        };
        self.storage_changes.push((
            StorageChangeSetKey { block_number: self.block_number, address, incarnation },
            StorageBeforeChange { slot, before },
        ));
        self.acc.storage_change(address, incarnation, slot, value);

        let key = PlainStorageKey { address, incarnation, slot };
        if value.is_zero() {
            self.tx.delete::<tables::PlainStorage>(key, None)?;
        } else {
            self.tx.put::<tables::PlainStorage>(key, value)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<B256, StateError> {
        // change-sets: one dup row per mutated key, pre-images only
        {
            let mut cursor = self.tx.cursor::<tables::AccountChangeSet>()?;
            for change in &self.account_changes {
                cursor.append_dup(self.block_number, change.encode_value())?;
            }
        }
        {
            let mut cursor = self.tx.cursor::<tables::StorageChangeSet>()?;
            for (key, change) in &self.storage_changes {
                cursor.append_dup(*key, change.encode_value())?;
            }
        }

        // history bitmaps
        for change in &self.account_changes {
            self.indexer.index_account_change(self.tx, change.address, self.block_number)?;
        }
        for (key, change) in &self.storage_changes {
            self.indexer.index_storage_change(
                self.tx,
                key.address,
                change.slot,
                self.block_number,
            )?;
        }

        trace!(
            target: "state",
            block = self.block_number,
            accounts = self.account_changes.len(),
            slots = self.storage_changes.len(),
            "state flushed"
        );

        Ok(self.acc.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_db::test_utils::create_test_db;

    #[test]
    fn writer_records_pre_images_and_updates_plain_state() {
        let (env, _dir) = create_test_db();
        let address = Address::new([1u8; 20]);
        let slot = B256::with_last_byte(9);

        let tx = env.tx_mut().unwrap();
        let mut writer = PlainStateWriter::new(&tx, 7, B256::ZERO);
        let post = StateAccount { nonce: 1, balance: U256::from(5u64), ..Default::default() };
        writer.update_account(address, None, Some(post)).unwrap();
        writer.write_storage(address, 0, slot, U256::ZERO, U256::from(3u64)).unwrap();
        let root = writer.commit().unwrap();
        assert_ne!(root, B256::ZERO);
        tx.commit().unwrap();

        // plain buckets updated
        let stored = env.view(|tx| tx.get::<tables::PlainAccount>(address)).unwrap();
        assert_eq!(stored, Some(post));
        let value = env
            .view(|tx| {
                tx.get::<tables::PlainStorage>(PlainStorageKey { address, incarnation: 0, slot })
            })
            .unwrap();
        assert_eq!(value, Some(U256::from(3u64)));

        // change-set carries the (absent) pre-images
        let tx = env.tx().unwrap();
        let pre = crate::changes::account_pre_image(&tx, 7, address).unwrap();
        assert_eq!(pre, Some(Vec::new()));
        let pre = crate::changes::storage_pre_value(&tx, 7, address, 0, slot).unwrap();
        assert_eq!(pre, Some(Vec::new()));
    }

    #[test]
    fn empty_block_keeps_parent_root() {
        let (env, _dir) = create_test_db();
        let parent = B256::new([0x11; 32]);
        let tx = env.tx_mut().unwrap();
        let mut writer = PlainStateWriter::new(&tx, 1, parent);
        assert_eq!(writer.commit().unwrap(), parent);
    }

    #[test]
    fn state_root_is_deterministic_and_change_sensitive() {
        let (env, _dir) = create_test_db();
        let address = Address::new([2u8; 20]);
        let post = StateAccount { nonce: 2, ..Default::default() };

        let root_a = {
            let tx = env.tx_mut().unwrap();
            let mut writer = PlainStateWriter::new(&tx, 1, B256::ZERO);
            writer.update_account(address, None, Some(post)).unwrap();
            writer.commit().unwrap()
        };
        let root_b = {
            let tx = env.tx_mut().unwrap();
            let mut writer = PlainStateWriter::new(&tx, 1, B256::ZERO);
            writer.update_account(address, None, Some(post)).unwrap();
            writer.commit().unwrap()
        };
        assert_eq!(root_a, root_b);

        let root_c = {
            let tx = env.tx_mut().unwrap();
            let mut writer = PlainStateWriter::new(&tx, 1, B256::ZERO);
            writer
                .update_account(address, None, Some(StateAccount { nonce: 3, ..Default::default() }))
                .unwrap();
            writer.commit().unwrap()
        };
        assert_ne!(root_a, root_c);
    }
}
