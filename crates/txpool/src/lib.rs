//! A minimal validated mempool: single writer, many readers, nonce-ordered
//! per sender, with blob sidecar retention for the Engine API.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use alloy_consensus::TxEnvelope;
use alloy_eips::eip4844::BlobTransactionSidecar;
use aura_chainspec::ChainSpec;
use aura_evm::intrinsic_gas;
use aura_primitives::{Address, StateAccount, TransactionSigned, TxHash, B256, U256};
use aura_state::{StateReader, StateError};
use metrics::gauge;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::trace;

/// Default cap on pooled transactions.
pub const DEFAULT_POOL_CAPACITY: usize = 8_192;

/// Why a transaction was not admitted.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    /// Same hash already pooled.
    #[error("transaction already known")]
    AlreadyKnown,

    /// Signature does not recover.
    #[error("invalid sender signature")]
    InvalidSender,

    /// Replay protection targets another chain.
    #[error("wrong chain id")]
    ChainIdMismatch,

    /// The account nonce is already past this transaction.
    #[error("nonce too low: tx {tx}, account {account}")]
    NonceTooLow {
        /// Nonce of the transaction.
        tx: u64,
        /// Current account nonce.
        account: u64,
    },

    /// Cannot pay for gas plus value.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Supplied gas below the intrinsic cost.
    #[error("intrinsic gas too low")]
    IntrinsicGasTooLow,

    /// A same-nonce transaction with at least equal fees is pooled.
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,

    /// The pool is at capacity.
    #[error("txpool is full")]
    PoolFull,

    /// Underlying state failure.
    #[error(transparent)]
    State(#[from] StateError),
}

/// A pooled transaction with its recovered sender.
#[derive(Debug, Clone)]
pub struct PoolTransaction {
    /// The signed transaction.
    pub tx: TransactionSigned,
    /// Recovered sender.
    pub sender: Address,
}

#[derive(Default)]
struct PoolInner {
    by_hash: HashMap<TxHash, Arc<PoolTransaction>>,
    by_sender: BTreeMap<(Address, u64), Arc<PoolTransaction>>,
    sidecars: HashMap<TxHash, Arc<BlobTransactionSidecar>>,
}

/// The mempool.
pub struct TxPool {
    chain_spec: Arc<ChainSpec>,
    capacity: usize,
    inner: RwLock<PoolInner>,
}

impl std::fmt::Debug for TxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxPool").field("len", &self.len()).finish()
    }
}

impl TxPool {
    /// Pool with the default capacity.
    pub fn new(chain_spec: Arc<ChainSpec>) -> Self {
        Self::with_capacity(chain_spec, DEFAULT_POOL_CAPACITY)
    }

    /// Pool holding at most `capacity` transactions.
    pub fn with_capacity(chain_spec: Arc<ChainSpec>, capacity: usize) -> Self {
        Self { chain_spec, capacity, inner: RwLock::new(PoolInner::default()) }
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `hash` is pooled.
    pub fn contains(&self, hash: &TxHash) -> bool {
        self.inner.read().by_hash.contains_key(hash)
    }

    /// The pooled transaction with `hash`.
    pub fn get(&self, hash: &TxHash) -> Option<Arc<PoolTransaction>> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    /// Validates and admits a transaction against current tip state.
    pub fn add_transaction(
        &self,
        tx: TransactionSigned,
        state: &dyn StateReader,
    ) -> Result<TxHash, PoolError> {
        let hash = tx.hash();
        if self.contains(&hash) {
            return Err(PoolError::AlreadyKnown);
        }

        let sender = tx.recover_signer().map_err(|_| PoolError::InvalidSender)?;
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != self.chain_spec.chain_id {
                return Err(PoolError::ChainIdMismatch);
            }
        }

        let account = state.read_account(sender)?.unwrap_or(StateAccount::default());
        if tx.nonce() < account.nonce {
            return Err(PoolError::NonceTooLow { tx: tx.nonce(), account: account.nonce });
        }

        let intrinsic = intrinsic_gas(
            tx.input(),
            tx.is_create(),
            tx.access_list(),
            self.chain_spec.is_shanghai_active_at_timestamp(u64::MAX),
        );
        if tx.gas_limit() < intrinsic {
            return Err(PoolError::IntrinsicGasTooLow);
        }

        let cost =
            U256::from(tx.gas_limit()) * U256::from(tx.max_fee_per_gas()) + tx.value();
        if account.balance < cost {
            return Err(PoolError::InsufficientFunds);
        }

        // blob transactions keep their sidecar for engine_getBlobsV1
        let sidecar = match tx.envelope() {
            TxEnvelope::Eip4844(signed) => match signed.tx() {
                alloy_consensus::TxEip4844Variant::TxEip4844WithSidecar(with_sidecar) => {
                    Some(Arc::new(with_sidecar.sidecar.clone()))
                }
                alloy_consensus::TxEip4844Variant::TxEip4844(_) => None,
            },
            _ => None,
        };

        let mut inner = self.inner.write();
        if inner.by_hash.len() >= self.capacity {
            return Err(PoolError::PoolFull);
        }

        // replacement requires a strictly higher fee cap
        if let Some(existing) = inner.by_sender.get(&(sender, tx.nonce())) {
            if tx.max_fee_per_gas() <= existing.tx.max_fee_per_gas() {
                return Err(PoolError::ReplacementUnderpriced);
            }
            let old_hash = existing.tx.hash();
            inner.by_hash.remove(&old_hash);
            inner.sidecars.remove(&old_hash);
        }

        let pooled = Arc::new(PoolTransaction { tx, sender });
        inner.by_sender.insert((sender, pooled.tx.nonce()), pooled.clone());
        inner.by_hash.insert(hash, pooled);
        if let Some(sidecar) = sidecar {
            inner.sidecars.insert(hash, sidecar);
        }

        gauge!("txpool.transactions").set(inner.by_hash.len() as f64);
        trace!(target: "txpool", %hash, %sender, "transaction admitted");
        Ok(hash)
    }

    /// Drops mined (or otherwise finished) transactions.
    pub fn remove_transactions(&self, hashes: impl IntoIterator<Item = TxHash>) {
        let mut inner = self.inner.write();
        for hash in hashes {
            if let Some(pooled) = inner.by_hash.remove(&hash) {
                inner.by_sender.remove(&(pooled.sender, pooled.tx.nonce()));
                inner.sidecars.remove(&hash);
            }
        }
        gauge!("txpool.transactions").set(inner.by_hash.len() as f64);
    }

    /// All pooled transactions grouped by sender, nonce-ascending: the
    /// pending overlay the RPC layer materializes on top of tip state.
    pub fn pending_by_sender(&self) -> BTreeMap<Address, Vec<Arc<PoolTransaction>>> {
        let inner = self.inner.read();
        let mut out: BTreeMap<Address, Vec<Arc<PoolTransaction>>> = BTreeMap::new();
        for ((sender, _), pooled) in &inner.by_sender {
            out.entry(*sender).or_default().push(pooled.clone());
        }
        out
    }

    /// Executable transactions for payload building: per-sender nonce
    /// chains starting at the account nonce, flattened and ordered by
    /// effective tip.
    pub fn best_transactions(
        &self,
        state: &dyn StateReader,
        base_fee: Option<u64>,
    ) -> Result<Vec<Arc<PoolTransaction>>, PoolError> {
        let mut ready = Vec::new();
        for (sender, chain) in self.pending_by_sender() {
            let mut next_nonce = state.read_account(sender)?.map(|a| a.nonce).unwrap_or(0);
            for pooled in chain {
                if pooled.tx.nonce() != next_nonce {
                    break;
                }
                if pooled.tx.effective_tip_per_gas(base_fee).is_none() {
                    break;
                }
                ready.push(pooled);
                next_nonce += 1;
            }
        }
        ready.sort_by_key(|pooled| {
            std::cmp::Reverse(pooled.tx.effective_tip_per_gas(base_fee).unwrap_or_default())
        });
        Ok(ready)
    }

    /// Pending/queued split for `txpool_status`: pending transactions are
    /// the executable nonce chains, the rest queue behind gaps.
    pub fn status(&self, state: &dyn StateReader) -> Result<(usize, usize), PoolError> {
        let mut pending = 0usize;
        for (sender, chain) in self.pending_by_sender() {
            let mut next_nonce = state.read_account(sender)?.map(|a| a.nonce).unwrap_or(0);
            for pooled in chain {
                if pooled.tx.nonce() != next_nonce {
                    break;
                }
                pending += 1;
                next_nonce += 1;
            }
        }
        Ok((pending, self.len() - pending))
    }

    /// The blob sidecar retained for a pooled blob transaction.
    pub fn sidecar(&self, hash: &TxHash) -> Option<Arc<BlobTransactionSidecar>> {
        self.inner.read().sidecars.get(hash).cloned()
    }

    /// Looks up `(blob, proof)` pairs by blob versioned hash, the
    /// `engine_getBlobsV1` shape.
    pub fn blobs_by_versioned_hashes(
        &self,
        hashes: &[B256],
    ) -> Vec<Option<(alloy_eips::eip4844::Blob, alloy_eips::eip4844::Bytes48)>> {
        let inner = self.inner.read();
        let mut index: HashMap<B256, (alloy_eips::eip4844::Blob, alloy_eips::eip4844::Bytes48)> =
            HashMap::new();
        for sidecar in inner.sidecars.values() {
            for (versioned_hash, (blob, proof)) in sidecar
                .versioned_hashes()
                .zip(sidecar.blobs.iter().zip(sidecar.proofs.iter()))
            {
                index.insert(versioned_hash, (*blob, *proof));
            }
        }
        hashes.iter().map(|hash| index.get(hash).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::TxLegacy;
    use alloy_primitives::TxKind;
    use aura_chainspec::MAINNET;
    use aura_primitives::{crypto::address_of, transaction::sign_transaction, Bytes};

    struct OneAccount {
        address: Address,
        account: StateAccount,
    }

    impl StateReader for OneAccount {
        fn read_account(&self, address: Address) -> Result<Option<StateAccount>, StateError> {
            Ok((address == self.address).then_some(self.account))
        }

        fn read_storage(
            &self,
            _address: Address,
            _incarnation: u16,
            _slot: B256,
        ) -> Result<Option<U256>, StateError> {
            Ok(None)
        }

        fn read_code(
            &self,
            _address: Address,
            _incarnation: u16,
            _code_hash: B256,
        ) -> Result<Option<Bytes>, StateError> {
            Ok(None)
        }

        fn read_incarnation(&self, _address: Address) -> Result<u16, StateError> {
            Ok(0)
        }
    }

    fn secret() -> B256 {
        B256::new([0x77; 32])
    }

    fn reader() -> OneAccount {
        OneAccount {
            address: address_of(secret()).unwrap(),
            account: StateAccount { nonce: 0, balance: U256::MAX, ..Default::default() },
        }
    }

    fn transfer(nonce: u64, gas_price: u128) -> TransactionSigned {
        sign_transaction(
            TxLegacy {
                chain_id: Some(MAINNET.chain_id),
                nonce,
                gas_price,
                gas_limit: 21_000,
                to: TxKind::Call(Address::new([1u8; 20])),
                value: U256::from(1u64),
                input: Bytes::new(),
            },
            secret(),
        )
        .unwrap()
    }

    #[test]
    fn admit_order_and_overlay_by_nonce() {
        let pool = TxPool::new(MAINNET.clone());
        let state = reader();

        // out-of-order arrival
        pool.add_transaction(transfer(1, 10), &state).unwrap();
        pool.add_transaction(transfer(0, 10), &state).unwrap();
        assert_eq!(pool.len(), 2);

        let overlay = pool.pending_by_sender();
        let chain = overlay.values().next().unwrap();
        assert_eq!(chain[0].tx.nonce(), 0);
        assert_eq!(chain[1].tx.nonce(), 1);

        let (pending, queued) = pool.status(&state).unwrap();
        assert_eq!((pending, queued), (2, 0));
    }

    #[test]
    fn nonce_gaps_queue_instead_of_pending() {
        let pool = TxPool::new(MAINNET.clone());
        let state = reader();
        pool.add_transaction(transfer(2, 10), &state).unwrap();
        let (pending, queued) = pool.status(&state).unwrap();
        assert_eq!((pending, queued), (0, 1));
        assert!(pool.best_transactions(&state, None).unwrap().is_empty());
    }

    #[test]
    fn duplicates_and_underpriced_replacements_are_rejected() {
        let pool = TxPool::new(MAINNET.clone());
        let state = reader();
        let tx = transfer(0, 10);
        pool.add_transaction(tx.clone(), &state).unwrap();
        assert_eq!(pool.add_transaction(tx, &state).unwrap_err(), PoolError::AlreadyKnown);
        assert_eq!(
            pool.add_transaction(transfer(0, 10), &state).unwrap_err(),
            PoolError::ReplacementUnderpriced
        );
        // higher fee replaces
        pool.add_transaction(transfer(0, 20), &state).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let pool = TxPool::new(MAINNET.clone());
        let mut state = reader();
        state.account.nonce = 5;
        assert_eq!(
            pool.add_transaction(transfer(1, 10), &state).unwrap_err(),
            PoolError::NonceTooLow { tx: 1, account: 5 }
        );
    }

    #[test]
    fn mined_transactions_leave_the_pool() {
        let pool = TxPool::new(MAINNET.clone());
        let state = reader();
        let hash = pool.add_transaction(transfer(0, 10), &state).unwrap();
        pool.remove_transactions([hash]);
        assert!(pool.is_empty());
    }
}
