use aura_primitives::{Bytes, StateAccount, B256, U256};
use std::collections::HashMap;

/// In-memory image of one account inside the intra-block state.
#[derive(Debug, Clone, Default)]
pub struct StateObject {
    /// Account image as read from the anchor reader; `None` when the
    /// account did not exist before this block.
    pub initial: Option<StateAccount>,
    /// Current working image.
    pub account: StateAccount,
    /// Whether the account currently exists in the overlay.
    pub exists: bool,
    /// Loaded or newly assigned code.
    pub code: Option<Bytes>,
    /// Whether `code` was assigned during this block and must be flushed.
    pub code_written: bool,
    /// Slot values as read from the anchor reader, the change-set
    /// pre-images.
    pub storage_origin: HashMap<B256, U256>,
    /// Slot values as of the start of the current transaction.
    pub storage_committed: HashMap<B256, U256>,
    /// Slot writes of the current transaction.
    pub storage_dirty: HashMap<B256, U256>,
    /// Set on contract creation: slot reads resolve to zero without
    /// consulting the reader (prior-incarnation slots must not leak in).
    pub wiped_storage: bool,
    /// Marked by SELFDESTRUCT; materialized at end of transaction.
    pub suicided: bool,
    /// EIP-161: accessed in a way that makes empty accounts deletable.
    pub touched: bool,
    /// Created during the current transaction (EIP-6780 gate).
    pub newly_created: bool,
}

impl StateObject {
    /// Object for an account loaded from the reader.
    pub fn loaded(initial: Option<StateAccount>) -> Self {
        Self {
            initial,
            account: initial.unwrap_or_default(),
            exists: initial.is_some(),
            ..Default::default()
        }
    }

    /// The current slot value visible to the executing transaction, if
    /// cached: dirty first, then committed.
    pub fn cached_slot(&self, key: &B256) -> Option<U256> {
        self.storage_dirty.get(key).or_else(|| self.storage_committed.get(key)).copied()
    }

    /// EIP-161 emptiness of the current image.
    pub fn is_empty(&self) -> bool {
        self.account.is_empty()
    }

    /// Folds the current transaction's writes into the committed view.
    /// Called when a transaction finalizes.
    pub fn merge_dirty(&mut self) {
        for (key, value) in self.storage_dirty.drain() {
            self.storage_committed.insert(key, value);
        }
    }
}
