use crate::object::StateObject;
use aura_primitives::{Address, Bytes, B256, U256};

/// One undoable mutation of the intra-block state.
///
/// Entries carry exactly what is needed to reverse the mutation; a
/// snapshot is a journal length, and reverting replays entries backwards.
#[derive(Debug)]
pub enum JournalEntry {
    /// An object came into existence (or was replaced by contract
    /// creation); `prev` is the displaced object, if any.
    CreateObject {
        /// Affected account.
        address: Address,
        /// The object this one displaced.
        prev: Option<Box<StateObject>>,
    },
    /// Balance mutation.
    BalanceChange {
        /// Affected account.
        address: Address,
        /// Balance before the mutation.
        prev: U256,
    },
    /// Nonce mutation.
    NonceChange {
        /// Affected account.
        address: Address,
        /// Nonce before the mutation.
        prev: u64,
    },
    /// Dirty-storage mutation.
    StorageChange {
        /// Affected account.
        address: Address,
        /// Mutated slot.
        key: B256,
        /// Dirty value before the write; `None` when the slot was clean.
        prev: Option<U256>,
    },
    /// Code assignment.
    CodeChange {
        /// Affected account.
        address: Address,
        /// Code hash before the assignment.
        prev_hash: B256,
        /// Code before the assignment.
        prev_code: Option<Bytes>,
    },
    /// Self-destruct marking.
    SelfDestruct {
        /// Affected account.
        address: Address,
        /// Whether the account was already marked.
        prev_flag: bool,
        /// Balance zeroed by the marking.
        prev_balance: U256,
    },
    /// Refund counter mutation.
    RefundChange {
        /// Counter value before the mutation.
        prev: u64,
    },
    /// Address warmed into the access list.
    AddAccessListAddress {
        /// Warmed address.
        address: Address,
    },
    /// Slot warmed into the access list.
    AddAccessListSlot {
        /// Warmed account.
        address: Address,
        /// Warmed slot.
        slot: B256,
    },
    /// EIP-161 touch marking.
    TouchChange {
        /// Touched account.
        address: Address,
    },
    /// Transient-storage mutation (EIP-1153).
    TransientStorageChange {
        /// Affected account.
        address: Address,
        /// Mutated key.
        key: B256,
        /// Value before the write.
        prev: U256,
    },
}
