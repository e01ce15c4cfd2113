use crate::{
    error::StateError,
    journal::JournalEntry,
    object::StateObject,
    reader::StateReader,
    writer::StateWriter,
};
use aura_primitives::{keccak256, Address, Bytes, StateAccount, B256, U256};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Journaled, transactional overlay atop a [`StateReader`].
///
/// One instance executes one block (or one RPC simulation) on one thread.
/// Every mutation is journaled; [`Self::snapshot`] marks a journal length
/// and [`Self::revert_to_snapshot`] unwinds back to it. Per-transaction
/// structures (access list, transient storage, refund counter, touch set)
/// reset at [`Self::finalize`]; accumulated dirty state flushes once per
/// block via [`Self::commit_block`].
pub struct IntraBlockState<'r> {
    reader: &'r dyn StateReader,
    objects: HashMap<Address, StateObject>,
    journal: Vec<JournalEntry>,
    access_addresses: HashSet<Address>,
    access_slots: HashSet<(Address, B256)>,
    transient: HashMap<(Address, B256), U256>,
    refund: u64,
    /// Change-set pre-images of objects displaced by contract re-creation
    /// within the block: `(address, incarnation, slot, origin, latest)`.
    displaced_changes: Vec<(Address, u16, B256, U256, U256)>,
}

impl<'r> std::fmt::Debug for IntraBlockState<'r> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraBlockState")
            .field("objects", &self.objects.len())
            .field("journal", &self.journal.len())
            .field("refund", &self.refund)
            .finish()
    }
}

impl<'r> IntraBlockState<'r> {
    /// Fresh overlay anchored on `reader`.
    pub fn new(reader: &'r dyn StateReader) -> Self {
        Self {
            reader,
            objects: HashMap::new(),
            journal: Vec::new(),
            access_addresses: HashSet::new(),
            access_slots: HashSet::new(),
            transient: HashMap::new(),
            refund: 0,
            displaced_changes: Vec::new(),
        }
    }

    fn ensure_loaded(&mut self, address: Address) -> Result<&mut StateObject, StateError> {
        if !self.objects.contains_key(&address) {
            let initial = self.reader.read_account(address)?;
            self.objects.insert(address, StateObject::loaded(initial));
        }
        Ok(self.objects.get_mut(&address).expect("inserted above"))
    }

    /// Loads and, if the account does not currently exist, brings a fresh
    /// object into existence (journaled).
    fn ensure_created(&mut self, address: Address) -> Result<&mut StateObject, StateError> {
        self.ensure_loaded(address)?;
        let exists = self.objects[&address].exists;
        if !exists {
            let prev = self.objects.remove(&address);
            let initial = prev.as_ref().and_then(|obj| obj.initial);
            // EIP-161 touches survive object replacement, exactly as in
            // `create_account`
            let touched = prev.as_ref().map(|obj| obj.touched).unwrap_or_default();
            let fresh = StateObject {
                initial,
                account: StateAccount::default(),
                exists: true,
                newly_created: true,
                touched,
                ..Default::default()
            };
            self.objects.insert(address, fresh);
            self.journal.push(JournalEntry::CreateObject {
                address,
                prev: prev.map(Box::new),
            });
        }
        Ok(self.objects.get_mut(&address).expect("inserted above"))
    }

    // --- account queries ---------------------------------------------------

    /// Whether the account exists in the overlay.
    pub fn exist(&mut self, address: Address) -> Result<bool, StateError> {
        Ok(self.ensure_loaded(address)?.exists)
    }

    /// EIP-161 emptiness: exists with zero nonce, zero balance, no code.
    pub fn empty(&mut self, address: Address) -> Result<bool, StateError> {
        let obj = self.ensure_loaded(address)?;
        Ok(!obj.exists || obj.is_empty())
    }

    /// Current balance; zero for non-existent accounts.
    pub fn get_balance(&mut self, address: Address) -> Result<U256, StateError> {
        let obj = self.ensure_loaded(address)?;
        Ok(if obj.exists { obj.account.balance } else { U256::ZERO })
    }

    /// Credits `amount`, creating the account if needed. Zero-amount
    /// credits still count as an EIP-161 touch.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.touch(address)?;
        let obj = self.ensure_created(address)?;
        let prev = obj.account.balance;
        obj.account.balance = prev + amount;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Debits `amount`. Callers check for sufficiency beforehand.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        self.touch(address)?;
        let obj = self.ensure_created(address)?;
        let prev = obj.account.balance;
        obj.account.balance = prev.saturating_sub(amount);
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Overwrites the balance. Used by state overrides in simulations.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StateError> {
        let obj = self.ensure_created(address)?;
        let prev = obj.account.balance;
        obj.account.balance = balance;
        self.journal.push(JournalEntry::BalanceChange { address, prev });
        Ok(())
    }

    /// Current nonce; zero for non-existent accounts.
    pub fn get_nonce(&mut self, address: Address) -> Result<u64, StateError> {
        let obj = self.ensure_loaded(address)?;
        Ok(if obj.exists { obj.account.nonce } else { 0 })
    }

    /// Sets the nonce.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StateError> {
        let obj = self.ensure_created(address)?;
        let prev = obj.account.nonce;
        obj.account.nonce = nonce;
        self.journal.push(JournalEntry::NonceChange { address, prev });
        Ok(())
    }

    /// Current incarnation of the account object.
    pub fn get_incarnation(&mut self, address: Address) -> Result<u16, StateError> {
        Ok(self.ensure_loaded(address)?.account.incarnation)
    }

    // --- code --------------------------------------------------------------

    /// Code hash; the empty-code hash for non-existent accounts.
    pub fn get_code_hash(&mut self, address: Address) -> Result<B256, StateError> {
        let obj = self.ensure_loaded(address)?;
        Ok(if obj.exists {
            obj.account.code_hash
        } else {
            aura_primitives::constants::KECCAK_EMPTY
        })
    }

    /// Contract code, loading it through the reader on first access.
    pub fn get_code(&mut self, address: Address) -> Result<Option<Bytes>, StateError> {
        let obj = self.ensure_loaded(address)?;
        if !obj.exists || !obj.account.has_code() {
            return Ok(None);
        }
        if obj.code.is_none() {
            let (incarnation, code_hash) = (obj.account.incarnation, obj.account.code_hash);
            let code = self.reader.read_code(address, incarnation, code_hash)?;
            self.objects.get_mut(&address).expect("loaded above").code = code;
        }
        Ok(self.objects[&address].code.clone())
    }

    /// Code size without cloning the code out of the overlay.
    pub fn get_code_size(&mut self, address: Address) -> Result<usize, StateError> {
        Ok(self.get_code(address)?.map(|code| code.len()).unwrap_or_default())
    }

    /// Assigns code to the account, hashing it.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let code_hash = keccak256(&code);
        let obj = self.ensure_created(address)?;
        let prev_hash = obj.account.code_hash;
        let prev_code = obj.code.take();
        obj.account.code_hash = code_hash;
        obj.code = Some(code);
        obj.code_written = true;
        self.journal.push(JournalEntry::CodeChange { address, prev_hash, prev_code });
        Ok(())
    }

    // --- storage -----------------------------------------------------------

    fn load_slot(&mut self, address: Address, key: B256) -> Result<U256, StateError> {
        let obj = self.ensure_loaded(address)?;
        if let Some(value) = obj.cached_slot(&key) {
            return Ok(value);
        }
        let value = if obj.wiped_storage || !obj.exists {
            U256::ZERO
        } else {
            let incarnation = obj.account.incarnation;
            self.reader.read_storage(address, incarnation, key)?.unwrap_or_default()
        };
        let obj = self.objects.get_mut(&address).expect("loaded above");
        obj.storage_origin.entry(key).or_insert(value);
        obj.storage_committed.entry(key).or_insert(value);
        Ok(value)
    }

    /// Current slot value: dirty writes first, then the committed view,
    /// then the anchor reader.
    pub fn get_state(&mut self, address: Address, key: B256) -> Result<U256, StateError> {
        let obj = self.ensure_loaded(address)?;
        if !obj.exists {
            return Ok(U256::ZERO);
        }
        if let Some(value) = obj.storage_dirty.get(&key) {
            return Ok(*value);
        }
        self.load_slot(address, key)
    }

    /// Slot value as of the start of the current transaction, bypassing
    /// dirty writes.
    pub fn get_committed_state(&mut self, address: Address, key: B256) -> Result<U256, StateError> {
        let obj = self.ensure_loaded(address)?;
        if !obj.exists {
            return Ok(U256::ZERO);
        }
        if let Some(value) = obj.storage_committed.get(&key) {
            return Ok(*value);
        }
        self.load_slot(address, key)
    }

    /// Writes a slot (journaled; materialized at commit).
    pub fn set_state(&mut self, address: Address, key: B256, value: U256) -> Result<(), StateError> {
        // make sure the pre-images are cached before the first write
        self.load_slot(address, key)?;
        let obj = self.objects.get_mut(&address).expect("loaded above");
        let prev = obj.storage_dirty.insert(key, value);
        self.journal.push(JournalEntry::StorageChange { address, key, prev });
        Ok(())
    }

    // --- transient storage (EIP-1153) --------------------------------------

    /// Transient slot value; zero when never written this transaction.
    pub fn get_transient_state(&self, address: Address, key: B256) -> U256 {
        self.transient.get(&(address, key)).copied().unwrap_or_default()
    }

    /// Writes a transient slot (journaled; cleared at end of transaction).
    pub fn set_transient_state(&mut self, address: Address, key: B256, value: U256) {
        let prev = self.transient.insert((address, key), value).unwrap_or_default();
        self.journal.push(JournalEntry::TransientStorageChange { address, key, prev });
    }

    // --- refund counter ----------------------------------------------------

    /// Adds to the refund counter.
    pub fn add_refund(&mut self, gas: u64) {
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund += gas;
    }

    /// Subtracts from the refund counter.
    pub fn sub_refund(&mut self, gas: u64) {
        debug_assert!(gas <= self.refund, "refund counter underflow");
        self.journal.push(JournalEntry::RefundChange { prev: self.refund });
        self.refund = self.refund.saturating_sub(gas);
    }

    /// Current refund counter.
    pub const fn get_refund(&self) -> u64 {
        self.refund
    }

    // --- self destruct -----------------------------------------------------

    /// Marks the account self-destructed and zeroes its balance in the
    /// overlay. Deletion is materialized at [`Self::finalize`].
    pub fn self_destruct(&mut self, address: Address) -> Result<bool, StateError> {
        let obj = self.ensure_loaded(address)?;
        if !obj.exists {
            return Ok(false);
        }
        let prev_flag = obj.suicided;
        let prev_balance = obj.account.balance;
        obj.suicided = true;
        obj.touched = true;
        obj.account.balance = U256::ZERO;
        self.journal.push(JournalEntry::SelfDestruct { address, prev_flag, prev_balance });
        Ok(!prev_flag)
    }

    /// Whether the account was marked this transaction.
    pub fn has_self_destructed(&self, address: Address) -> bool {
        self.objects.get(&address).is_some_and(|obj| obj.suicided)
    }

    /// Whether the account object was created during this transaction
    /// (EIP-6780 gate).
    pub fn created_in_transaction(&self, address: Address) -> bool {
        self.objects.get(&address).is_some_and(|obj| obj.newly_created)
    }

    // --- account creation --------------------------------------------------

    /// Creates the account object.
    ///
    /// With `contract_creation` the incarnation is bumped past the highest
    /// one ever used at the address and the storage view is wiped, so
    /// prior-incarnation slots cannot leak in. A nonzero balance at the
    /// address is preserved.
    pub fn create_account(
        &mut self,
        address: Address,
        contract_creation: bool,
    ) -> Result<(), StateError> {
        self.ensure_loaded(address)?;
        let prev = self.objects.remove(&address).expect("loaded above");

        let mut account = StateAccount::default();
        account.balance = if prev.exists { prev.account.balance } else { U256::ZERO };
        if contract_creation {
            let prior = self.reader.read_incarnation(address)?.max(prev.account.incarnation);
            account.incarnation = prior + 1;
        } else {
            account.incarnation = prev.account.incarnation;
        }

        // keep displaced pre-images so the block change-set stays complete
        if prev.exists {
            let mut slots: Vec<_> = prev.storage_origin.iter().collect();
            slots.sort_by_key(|(slot, _)| **slot);
            for (slot, origin) in slots {
                let latest = prev
                    .storage_dirty
                    .get(slot)
                    .or_else(|| prev.storage_committed.get(slot))
                    .copied()
                    .unwrap_or(*origin);
                if latest != *origin {
                    self.displaced_changes.push((
                        address,
                        prev.account.incarnation,
                        *slot,
                        *origin,
                        latest,
                    ));
                }
            }
        }

        let fresh = StateObject {
            initial: prev.initial,
            account,
            exists: true,
            newly_created: true,
            wiped_storage: contract_creation,
            touched: prev.touched,
            ..Default::default()
        };
        self.objects.insert(address, fresh);
        self.journal.push(JournalEntry::CreateObject { address, prev: Some(Box::new(prev)) });
        Ok(())
    }

    // --- EIP-161 touches ----------------------------------------------------

    /// Marks the account touched for end-of-transaction empty-account
    /// deletion.
    pub fn touch(&mut self, address: Address) -> Result<(), StateError> {
        let obj = self.ensure_loaded(address)?;
        if !obj.touched {
            obj.touched = true;
            self.journal.push(JournalEntry::TouchChange { address });
        }
        Ok(())
    }

    // --- access list (EIP-2929/2930) ----------------------------------------

    /// Resets the per-transaction access list and warms the given entries.
    pub fn prepare_access_list(
        &mut self,
        sender: Address,
        recipient: Option<Address>,
        precompiles: impl IntoIterator<Item = Address>,
        entries: impl IntoIterator<Item = (Address, Vec<B256>)>,
    ) {
        self.access_addresses.clear();
        self.access_slots.clear();
        self.access_addresses.insert(sender);
        if let Some(recipient) = recipient {
            self.access_addresses.insert(recipient);
        }
        for precompile in precompiles {
            self.access_addresses.insert(precompile);
        }
        for (address, slots) in entries {
            self.access_addresses.insert(address);
            for slot in slots {
                self.access_slots.insert((address, slot));
            }
        }
    }

    /// Warms an address; returns whether it was already warm.
    pub fn add_address_to_access_list(&mut self, address: Address) -> bool {
        let inserted = self.access_addresses.insert(address);
        if inserted {
            self.journal.push(JournalEntry::AddAccessListAddress { address });
        }
        !inserted
    }

    /// Warms a slot (and its address); returns `(address_was_warm,
    /// slot_was_warm)`.
    pub fn add_slot_to_access_list(&mut self, address: Address, slot: B256) -> (bool, bool) {
        let address_was_warm = !self.access_addresses.insert(address);
        if !address_was_warm {
            self.journal.push(JournalEntry::AddAccessListAddress { address });
        }
        let slot_was_warm = !self.access_slots.insert((address, slot));
        if !slot_was_warm {
            self.journal.push(JournalEntry::AddAccessListSlot { address, slot });
        }
        (address_was_warm, slot_was_warm)
    }

    /// The current warm set, addresses sorted, slots grouped per address.
    /// Backs `eth_createAccessList`.
    pub fn access_list_content(&self) -> Vec<(Address, Vec<B256>)> {
        let mut out: std::collections::BTreeMap<Address, Vec<B256>> =
            self.access_addresses.iter().map(|address| (*address, Vec::new())).collect();
        for (address, slot) in &self.access_slots {
            out.entry(*address).or_default().push(*slot);
        }
        for slots in out.values_mut() {
            slots.sort_unstable();
        }
        out.into_iter().collect()
    }

    /// O(1) address warmth query.
    pub fn address_in_access_list(&self, address: Address) -> bool {
        self.access_addresses.contains(&address)
    }

    /// O(1) slot warmth query.
    pub fn slot_in_access_list(&self, address: Address, slot: B256) -> bool {
        self.access_slots.contains(&(address, slot))
    }

    // --- snapshots ----------------------------------------------------------

    /// Marks the current journal position.
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Unwinds every mutation journaled after `id`.
    pub fn revert_to_snapshot(&mut self, id: usize) {
        while self.journal.len() > id {
            let entry = self.journal.pop().expect("length checked");
            self.undo(entry);
        }
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::CreateObject { address, prev } => {
                match prev {
                    Some(prev) => {
                        // a displacement may have stashed change-set rows
                        while self
                            .displaced_changes
                            .last()
                            .is_some_and(|(a, inc, ..)| *a == address && *inc == prev.account.incarnation)
                        {
                            self.displaced_changes.pop();
                        }
                        self.objects.insert(address, *prev);
                    }
                    None => {
                        self.objects.remove(&address);
                    }
                }
            }
            JournalEntry::BalanceChange { address, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account.balance = prev;
                }
            }
            JournalEntry::NonceChange { address, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account.nonce = prev;
                }
            }
            JournalEntry::StorageChange { address, key, prev } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    match prev {
                        Some(value) => {
                            obj.storage_dirty.insert(key, value);
                        }
                        None => {
                            obj.storage_dirty.remove(&key);
                        }
                    }
                }
            }
            JournalEntry::CodeChange { address, prev_hash, prev_code } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.account.code_hash = prev_hash;
                    obj.code_written = prev_code.is_some() &&
                        obj.initial.map_or(true, |initial| initial.code_hash != prev_hash);
                    obj.code = prev_code;
                }
            }
            JournalEntry::SelfDestruct { address, prev_flag, prev_balance } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.suicided = prev_flag;
                    obj.account.balance = prev_balance;
                }
            }
            JournalEntry::RefundChange { prev } => self.refund = prev,
            JournalEntry::AddAccessListAddress { address } => {
                self.access_addresses.remove(&address);
            }
            JournalEntry::AddAccessListSlot { address, slot } => {
                self.access_slots.remove(&(address, slot));
            }
            JournalEntry::TouchChange { address } => {
                if let Some(obj) = self.objects.get_mut(&address) {
                    obj.touched = false;
                }
            }
            JournalEntry::TransientStorageChange { address, key, prev } => {
                self.transient.insert((address, key), prev);
            }
        }
    }

    // --- transaction & block boundaries -------------------------------------

    /// Ends the current transaction: materializes self-destructs, deletes
    /// touched empty accounts when `delete_empty` (post-Spurious-Dragon),
    /// folds dirty storage into the committed view and resets all
    /// per-transaction structures.
    pub fn finalize(&mut self, delete_empty: bool) {
        for (address, obj) in &mut self.objects {
            if obj.suicided {
                obj.exists = false;
                trace!(target: "state", %address, "destroyed account materialized");
            } else if delete_empty && obj.touched && obj.exists && obj.is_empty() {
                obj.exists = false;
                trace!(target: "state", %address, "empty touched account deleted");
            }
            obj.merge_dirty();
            obj.suicided = false;
            obj.touched = false;
            obj.newly_created = false;
        }
        self.journal.clear();
        self.transient.clear();
        self.refund = 0;
    }

    /// Flushes the block's accumulated changes through `writer` and
    /// returns the resulting state root.
    ///
    /// Deterministic: accounts and slots are visited in sorted order.
    pub fn commit_block(&mut self, writer: &mut dyn StateWriter) -> Result<B256, StateError> {
        let mut addresses: Vec<Address> = self.objects.keys().copied().collect();
        addresses.sort_unstable();

        // pre-images of objects displaced by same-block re-creation
        let displaced = std::mem::take(&mut self.displaced_changes);

        for address in addresses {
            let obj = self.objects.get_mut(&address).expect("key from map");
            obj.merge_dirty();
            let obj = &self.objects[&address];

            let final_account = obj.exists.then_some(obj.account);
            let account_changed = obj.initial != final_account;

            if account_changed {
                writer.update_account(address, obj.initial, final_account)?;
            }
            if obj.code_written && obj.exists {
                if let Some(code) = &obj.code {
                    writer.update_code(
                        address,
                        obj.account.incarnation,
                        obj.account.code_hash,
                        code,
                    )?;
                }
            }

            let mut slots: Vec<(B256, U256)> =
                obj.storage_origin.iter().map(|(slot, origin)| (*slot, *origin)).collect();
            slots.sort_unstable_by_key(|(slot, _)| *slot);
            for (slot, origin) in slots {
                let latest = obj.storage_committed.get(&slot).copied().unwrap_or(origin);
                if latest != origin {
                    writer.write_storage(address, obj.account.incarnation, slot, origin, latest)?;
                }
            }

            for (displaced_address, incarnation, slot, origin, latest) in
                displaced.iter().filter(|(a, ..)| *a == address)
            {
                writer.write_storage(*displaced_address, *incarnation, *slot, *origin, *latest)?;
            }
        }

        writer.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::NoopWriter;
    use std::{cell::RefCell, collections::HashMap};

    /// Reader over plain maps, standing in for the KV-backed readers.
    #[derive(Default)]
    struct MockReader {
        accounts: HashMap<Address, StateAccount>,
        storage: HashMap<(Address, u16, B256), U256>,
        code: HashMap<B256, Bytes>,
        reads: RefCell<usize>,
    }

    impl StateReader for MockReader {
        fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError> {
            Ok(self.accounts.get(&address).copied())
        }

        fn read_storage(
            &self,
            address: Address,
            incarnation: u16,
            slot: B256,
        ) -> Result<Option<U256>, StateError> {
            *self.reads.borrow_mut() += 1;
            Ok(self.storage.get(&(address, incarnation, slot)).copied())
        }

        fn read_code(
            &self,
            _address: Address,
            _incarnation: u16,
            code_hash: B256,
        ) -> Result<Option<Bytes>, StateError> {
            Ok(self.code.get(&code_hash).cloned())
        }

        fn read_incarnation(&self, address: Address) -> Result<u16, StateError> {
            Ok(self.accounts.get(&address).map(|a| a.incarnation).unwrap_or_default())
        }
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn slot(byte: u8) -> B256 {
        B256::with_last_byte(byte)
    }

    fn funded(balance: u64) -> StateAccount {
        StateAccount { balance: U256::from(balance), ..Default::default() }
    }

    #[test]
    fn reads_fall_through_dirty_then_origin_then_reader() {
        let mut reader = MockReader::default();
        reader.accounts.insert(addr(1), funded(10));
        reader.storage.insert((addr(1), 0, slot(1)), U256::from(7u64));

        let mut state = IntraBlockState::new(&reader);
        assert_eq!(state.get_state(addr(1), slot(1)).unwrap(), U256::from(7u64));
        // second read is served from the origin cache
        assert_eq!(*reader.reads.borrow(), 1);
        assert_eq!(state.get_state(addr(1), slot(1)).unwrap(), U256::from(7u64));
        assert_eq!(*reader.reads.borrow(), 1);

        state.set_state(addr(1), slot(1), U256::from(9u64)).unwrap();
        assert_eq!(state.get_state(addr(1), slot(1)).unwrap(), U256::from(9u64));
        // committed view bypasses the dirty write
        assert_eq!(state.get_committed_state(addr(1), slot(1)).unwrap(), U256::from(7u64));
    }

    #[test]
    fn snapshot_revert_restores_every_surface() {
        let mut reader = MockReader::default();
        reader.accounts.insert(addr(1), funded(100));

        let mut state = IntraBlockState::new(&reader);
        state.add_refund(10);
        state.add_address_to_access_list(addr(9));

        let id = state.snapshot();

        state.add_balance(addr(1), U256::from(5u64)).unwrap();
        state.set_nonce(addr(1), 3).unwrap();
        state.set_state(addr(1), slot(1), U256::from(1u64)).unwrap();
        state.set_transient_state(addr(1), slot(2), U256::from(2u64));
        state.set_code(addr(1), Bytes::from_static(&[0x60])).unwrap();
        state.add_refund(90);
        state.add_slot_to_access_list(addr(9), slot(3));
        state.add_address_to_access_list(addr(8));
        state.self_destruct(addr(1)).unwrap();

        state.revert_to_snapshot(id);

        assert_eq!(state.get_balance(addr(1)).unwrap(), U256::from(100u64));
        assert_eq!(state.get_nonce(addr(1)).unwrap(), 0);
        assert_eq!(state.get_state(addr(1), slot(1)).unwrap(), U256::ZERO);
        assert_eq!(state.get_transient_state(addr(1), slot(2)), U256::ZERO);
        assert_eq!(
            state.get_code_hash(addr(1)).unwrap(),
            aura_primitives::constants::KECCAK_EMPTY
        );
        assert_eq!(state.get_refund(), 10);
        assert!(state.address_in_access_list(addr(9)));
        assert!(!state.slot_in_access_list(addr(9), slot(3)));
        assert!(!state.address_in_access_list(addr(8)));
        assert!(!state.has_self_destructed(addr(1)));
    }

    #[test]
    fn transient_storage_survives_revert_boundaries_but_not_finalize() {
        let reader = MockReader::default();
        let mut state = IntraBlockState::new(&reader);

        state.set_transient_state(addr(1), slot(1), U256::from(42u64));
        assert_eq!(state.get_transient_state(addr(1), slot(1)), U256::from(42u64));

        // preserved across (non-reverted) call frames within the tx
        let id = state.snapshot();
        state.set_transient_state(addr(1), slot(1), U256::from(43u64));
        state.revert_to_snapshot(id);
        assert_eq!(state.get_transient_state(addr(1), slot(1)), U256::from(42u64));

        // cleared when the outer transaction ends
        state.finalize(true);
        assert_eq!(state.get_transient_state(addr(1), slot(1)), U256::ZERO);
    }

    #[test]
    fn self_destruct_keeps_state_until_end_of_transaction() {
        let mut reader = MockReader::default();
        let mut contract = funded(50);
        contract.incarnation = 1;
        reader.accounts.insert(addr(2), contract);
        reader.storage.insert((addr(2), 1, slot(1)), U256::from(77u64));

        let mut state = IntraBlockState::new(&reader);
        assert!(state.self_destruct(addr(2)).unwrap());
        assert!(state.has_self_destructed(addr(2)));
        assert_eq!(state.get_balance(addr(2)).unwrap(), U256::ZERO);
        // same-transaction reads still see pre-destruct storage
        assert_eq!(state.get_state(addr(2), slot(1)).unwrap(), U256::from(77u64));

        state.finalize(true);
        // next transaction: gone
        assert!(!state.exist(addr(2)).unwrap());
        assert_eq!(state.get_state(addr(2), slot(1)).unwrap(), U256::ZERO);
    }

    #[test]
    fn contract_creation_preserves_balance_and_bumps_incarnation() {
        let mut reader = MockReader::default();
        let mut existing = funded(1000);
        existing.incarnation = 2;
        reader.accounts.insert(addr(3), existing);
        reader.storage.insert((addr(3), 2, slot(1)), U256::from(5u64));

        let mut state = IntraBlockState::new(&reader);
        state.create_account(addr(3), true).unwrap();

        assert_eq!(state.get_balance(addr(3)).unwrap(), U256::from(1000u64));
        assert_eq!(state.get_incarnation(addr(3)).unwrap(), 3);
        assert!(state.created_in_transaction(addr(3)));
        // prior-incarnation slots must not leak into the new contract
        assert_eq!(state.get_state(addr(3), slot(1)).unwrap(), U256::ZERO);
        assert_eq!(*reader.reads.borrow(), 0, "wiped storage never consults the reader");
    }

    #[test]
    fn empty_touched_accounts_die_at_finalize() {
        let reader = MockReader::default();
        let mut state = IntraBlockState::new(&reader);

        // a zero-value credit creates and touches an empty account
        state.add_balance(addr(4), U256::ZERO).unwrap();
        assert!(state.exist(addr(4)).unwrap());

        state.finalize(true);
        assert!(!state.exist(addr(4)).unwrap());

        // pre-Spurious-Dragon semantics keep it
        state.add_balance(addr(5), U256::ZERO).unwrap();
        state.finalize(false);
        assert!(state.exist(addr(5)).unwrap());
    }

    #[test]
    fn commit_to_noop_writer_returns_zero_root() {
        let mut reader = MockReader::default();
        reader.accounts.insert(addr(1), funded(10));
        let mut state = IntraBlockState::new(&reader);
        state.add_balance(addr(1), U256::from(1u64)).unwrap();
        state.finalize(true);
        let mut writer = NoopWriter::default();
        assert_eq!(state.commit_block(&mut writer).unwrap(), B256::ZERO);
    }
}
