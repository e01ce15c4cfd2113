//! `eth` namespace method semantics.

mod call;
mod fees;
mod filter;

pub use call::{AccountOverride, CallRequest, StateOverride};
pub use filter::{FilterChanges, FilterStore};

use crate::{
    error::EthApiError,
    types::{
        rpc_block, rpc_receipt, rpc_transaction, RpcAccountProof, RpcBlock, RpcReceipt,
        RpcStorageProof, RpcSyncStatus, RpcTransaction,
    },
};
use alloy_rpc_types_eth::{BlockId, BlockNumberOrTag};
use aura_chainspec::ChainSpec;
use aura_consensus::Engine;
use aura_db::{DatabaseEnv, TxRo};
use aura_primitives::{
    constants::EMPTY_ROOT_HASH, Address, Bytes, Header, SealedHeader, StateAccount,
    TransactionSigned, B256, U256,
};
use aura_state::{ChainReader, HistoryStateReader, IntraBlockState, PlainStateReader, StateReader};
use aura_txpool::TxPool;
use libmdbx::RO;
use std::sync::Arc;
use tracing::trace;

/// Default cap on gas used by simulations.
pub const DEFAULT_RPC_GAS_CAP: u64 = 50_000_000;

/// Where a request anchors in the chain.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockAnchor {
    /// Resolved block number.
    pub number: u64,
    /// Whether the mempool overlay applies on top.
    pub pending: bool,
}

/// The `eth` namespace handler.
pub struct EthApi {
    pub(crate) chain_spec: Arc<ChainSpec>,
    pub(crate) db: Arc<DatabaseEnv>,
    pub(crate) pool: Arc<TxPool>,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) etherbase: Option<Address>,
    pub(crate) gas_cap: u64,
    pub(crate) filters: FilterStore,
}

impl std::fmt::Debug for EthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthApi").field("chain", &self.chain_spec.chain).finish()
    }
}

impl EthApi {
    /// Handler over the node components.
    pub fn new(
        chain_spec: Arc<ChainSpec>,
        db: Arc<DatabaseEnv>,
        pool: Arc<TxPool>,
        engine: Arc<dyn Engine>,
        etherbase: Option<Address>,
    ) -> Self {
        Self {
            chain_spec,
            db,
            pool,
            engine,
            etherbase,
            gas_cap: DEFAULT_RPC_GAS_CAP,
            filters: FilterStore::default(),
        }
    }

    pub(crate) fn head(
        &self,
        chain: &ChainReader<'_, RO>,
    ) -> Result<SealedHeader, EthApiError> {
        chain.head_header()?.ok_or(EthApiError::UnknownBlock)
    }

    pub(crate) fn resolve_tag(
        &self,
        chain: &ChainReader<'_, RO>,
        head: &SealedHeader,
        tag: BlockNumberOrTag,
    ) -> Result<BlockAnchor, EthApiError> {
        let anchor = match tag {
            BlockNumberOrTag::Latest |
            BlockNumberOrTag::Safe |
            BlockNumberOrTag::Finalized => BlockAnchor { number: head.number(), pending: false },
            BlockNumberOrTag::Pending => BlockAnchor { number: head.number(), pending: true },
            BlockNumberOrTag::Earliest => BlockAnchor { number: 0, pending: false },
            BlockNumberOrTag::Number(number) => {
                if number > head.number() {
                    return Err(EthApiError::UnknownBlock);
                }
                BlockAnchor { number, pending: false }
            }
        };
        // every anchored number must exist canonically
        if chain.canonical_hash(anchor.number)?.is_none() {
            return Err(EthApiError::UnknownBlock);
        }
        Ok(anchor)
    }

    pub(crate) fn resolve_block_id(
        &self,
        chain: &ChainReader<'_, RO>,
        head: &SealedHeader,
        block: Option<BlockId>,
    ) -> Result<BlockAnchor, EthApiError> {
        match block.unwrap_or(BlockId::Number(BlockNumberOrTag::Latest)) {
            BlockId::Number(tag) => self.resolve_tag(chain, head, tag),
            BlockId::Hash(hash) => {
                let number = chain
                    .header_number(hash.block_hash)?
                    .ok_or(EthApiError::UnknownBlock)?;
                if chain.canonical_hash(number)? != Some(hash.block_hash) {
                    return Err(EthApiError::UnknownBlock);
                }
                Ok(BlockAnchor { number, pending: false })
            }
        }
    }

    /// The header execution context of an anchor.
    pub(crate) fn anchor_header(
        &self,
        chain: &ChainReader<'_, RO>,
        head: &SealedHeader,
        anchor: BlockAnchor,
    ) -> Result<Header, EthApiError> {
        if anchor.pending {
            return Ok(self.pending_header(head));
        }
        Ok(chain
            .header_by_number(anchor.number)?
            .ok_or(EthApiError::UnknownBlock)?
            .into_header())
    }

    /// The header the next block would execute under.
    pub(crate) fn pending_header(&self, head: &SealedHeader) -> Header {
        let timestamp = head.timestamp + self.chain_spec.poa.period.max(1);
        Header {
            parent_hash: head.hash(),
            number: head.number() + 1,
            timestamp,
            gas_limit: head.gas_limit,
            beneficiary: self.etherbase.unwrap_or_default(),
            base_fee_per_gas: self.chain_spec.next_block_base_fee(head),
            excess_blob_gas: self.chain_spec.next_block_excess_blob_gas(head, timestamp),
            blob_gas_used: self
                .chain_spec
                .is_cancun_active_at_timestamp(timestamp)
                .then_some(0),
            ..Default::default()
        }
    }

    /// Materializes tip state plus the mempool overlay. Readers copy; the
    /// overlay never touches the store.
    pub(crate) fn pending_state<'r>(
        &self,
        plain: &'r PlainStateReader<'r, RO>,
        head: &SealedHeader,
    ) -> Result<IntraBlockState<'r>, EthApiError> {
        let mut state = IntraBlockState::new(plain);
        let header = self.pending_header(head);
        let delete_empty =
            self.chain_spec.is_spurious_dragon_active_at_block(header.number);

        for (_, chain) in self.pool.pending_by_sender() {
            for pooled in chain {
                let snapshot = state.snapshot();
                match aura_evm::apply_transaction(
                    &self.chain_spec,
                    &header,
                    &mut state,
                    &aura_evm::EmptyBlockHashes,
                    &pooled.tx,
                    pooled.sender,
                    None,
                    None,
                ) {
                    Ok(_) => state.finalize(delete_empty),
                    Err(_) => {
                        state.revert_to_snapshot(snapshot);
                        break;
                    }
                }
            }
        }
        Ok(state)
    }

    fn read_account_at(
        &self,
        tx: &TxRo<'_>,
        chain: &ChainReader<'_, RO>,
        head: &SealedHeader,
        address: Address,
        anchor: BlockAnchor,
    ) -> Result<Option<StateAccount>, EthApiError> {
        if anchor.number == head.number() {
            Ok(PlainStateReader::new(tx).read_account(address)?)
        } else {
            Ok(HistoryStateReader::at_end_of(tx, anchor.number).read_account(address)?)
        }
    }

    // --- chain metadata ----------------------------------------------------

    /// `eth_chainId`.
    pub fn chain_id(&self) -> u64 {
        self.chain_spec.chain_id
    }

    /// `eth_blockNumber`.
    pub fn block_number(&self) -> Result<u64, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        Ok(self.head(&chain)?.number())
    }

    /// `eth_syncing`. The node executes at its tip; there is no staged
    /// sync to report.
    pub fn syncing(&self) -> RpcSyncStatus {
        RpcSyncStatus::NotSyncing(false)
    }

    /// `eth_coinbase`.
    pub fn coinbase(&self) -> Result<Address, EthApiError> {
        self.etherbase.ok_or_else(|| {
            EthApiError::InvalidParams("no etherbase configured".to_string())
        })
    }

    /// `eth_accounts`: the locally managed signing identities.
    pub fn accounts(&self) -> Vec<Address> {
        self.etherbase.into_iter().collect()
    }

    /// `eth_mining`: whether the local key currently seals.
    pub fn mining(&self) -> Result<bool, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        Ok(self.engine.is_active_signer(&head))
    }

    /// `eth_hashrate`: zero, there is no proof-of-work.
    pub fn hashrate(&self) -> U256 {
        U256::ZERO
    }

    // --- state queries -----------------------------------------------------

    /// `eth_getBalance`.
    pub fn get_balance(
        &self,
        address: Address,
        block: Option<BlockId>,
    ) -> Result<U256, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;

        if anchor.pending {
            let plain = PlainStateReader::new(&tx);
            let mut state = self.pending_state(&plain, &head)?;
            return Ok(state.get_balance(address)?);
        }
        Ok(self
            .read_account_at(&tx, &chain, &head, address, anchor)?
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    /// `eth_getTransactionCount`.
    pub fn get_transaction_count(
        &self,
        address: Address,
        block: Option<BlockId>,
    ) -> Result<u64, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;

        if anchor.pending {
            let plain = PlainStateReader::new(&tx);
            let mut state = self.pending_state(&plain, &head)?;
            return Ok(state.get_nonce(address)?);
        }
        Ok(self
            .read_account_at(&tx, &chain, &head, address, anchor)?
            .map(|account| account.nonce)
            .unwrap_or_default())
    }

    /// `eth_getCode`.
    pub fn get_code(
        &self,
        address: Address,
        block: Option<BlockId>,
    ) -> Result<Bytes, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;

        let Some(account) = self.read_account_at(&tx, &chain, &head, address, anchor)? else {
            return Ok(Bytes::new());
        };
        if !account.has_code() {
            return Ok(Bytes::new());
        }
        let reader = PlainStateReader::new(&tx);
        Ok(reader
            .read_code(address, account.incarnation, account.code_hash)?
            .unwrap_or_default())
    }

    /// `eth_getStorageAt`.
    pub fn get_storage_at(
        &self,
        address: Address,
        slot: B256,
        block: Option<BlockId>,
    ) -> Result<B256, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;

        let value = if anchor.number == head.number() {
            let reader = PlainStateReader::new(&tx);
            let incarnation = reader.read_incarnation(address)?;
            reader.read_storage(address, incarnation, slot)?
        } else {
            let reader = HistoryStateReader::at_end_of(&tx, anchor.number);
            let incarnation = reader.read_incarnation(address)?;
            reader.read_storage(address, incarnation, slot)?
        };
        Ok(B256::from(value.unwrap_or_default()))
    }

    /// `eth_getProof`. The plain-state schema keeps no tries; the account
    /// record is returned with empty proof vectors.
    pub fn get_proof(
        &self,
        address: Address,
        slots: Vec<B256>,
        block: Option<BlockId>,
    ) -> Result<RpcAccountProof, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;

        let account =
            self.read_account_at(&tx, &chain, &head, address, anchor)?.unwrap_or_default();
        let mut storage_proof = Vec::with_capacity(slots.len());
        for slot in slots {
            let value = if anchor.number == head.number() {
                PlainStateReader::new(&tx).read_storage(address, account.incarnation, slot)?
            } else {
                HistoryStateReader::at_end_of(&tx, anchor.number).read_storage(
                    address,
                    account.incarnation,
                    slot,
                )?
            };
            storage_proof.push(RpcStorageProof {
                key: slot,
                value: value.unwrap_or_default(),
                proof: Vec::new(),
            });
        }

        Ok(RpcAccountProof {
            address,
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            storage_hash: EMPTY_ROOT_HASH,
            account_proof: Vec::new(),
            storage_proof,
        })
    }

    // --- blocks ------------------------------------------------------------

    fn assemble_block(
        &self,
        chain: &ChainReader<'_, RO>,
        number: u64,
        hash: B256,
        full: bool,
    ) -> Result<Option<RpcBlock>, EthApiError> {
        let Some(block) = chain.block(number, hash)? else { return Ok(None) };
        let senders = chain.senders(number, hash)?.unwrap_or_default();
        let td = chain.td(number, hash)?;
        Ok(Some(rpc_block(&block, hash, &senders, td, full)))
    }

    /// `eth_getBlockByNumber`.
    pub fn get_block_by_number(
        &self,
        tag: BlockNumberOrTag,
        full: bool,
    ) -> Result<Option<RpcBlock>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = match self.resolve_tag(&chain, &head, tag) {
            Ok(anchor) => anchor,
            Err(EthApiError::UnknownBlock) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(hash) = chain.canonical_hash(anchor.number)? else { return Ok(None) };
        self.assemble_block(&chain, anchor.number, hash, full)
    }

    /// `eth_getBlockByHash`.
    pub fn get_block_by_hash(
        &self,
        hash: B256,
        full: bool,
    ) -> Result<Option<RpcBlock>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let Some(number) = chain.header_number(hash)? else { return Ok(None) };
        self.assemble_block(&chain, number, hash, full)
    }

    /// `eth_getBlockTransactionCountByNumber`.
    pub fn get_block_transaction_count_by_number(
        &self,
        tag: BlockNumberOrTag,
    ) -> Result<Option<u64>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = match self.resolve_tag(&chain, &head, tag) {
            Ok(anchor) => anchor,
            Err(EthApiError::UnknownBlock) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(hash) = chain.canonical_hash(anchor.number)? else { return Ok(None) };
        Ok(chain.body(anchor.number, hash)?.map(|body| body.transactions.len() as u64))
    }

    /// `eth_getBlockTransactionCountByHash`.
    pub fn get_block_transaction_count_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<u64>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let Some(number) = chain.header_number(hash)? else { return Ok(None) };
        Ok(chain.body(number, hash)?.map(|body| body.transactions.len() as u64))
    }

    // --- transactions ------------------------------------------------------

    fn tx_in_block(
        &self,
        chain: &ChainReader<'_, RO>,
        number: u64,
        hash: B256,
        index: u64,
    ) -> Result<Option<RpcTransaction>, EthApiError> {
        let Some(body) = chain.body(number, hash)? else { return Ok(None) };
        let Some(transaction) = body.transactions.get(index as usize) else {
            return Ok(None);
        };
        let senders = chain.senders(number, hash)?.unwrap_or_default();
        let from = senders.get(index as usize).copied().unwrap_or_default();
        let header = chain.header(number, hash)?.ok_or(EthApiError::BlockDataMissing)?;
        Ok(Some(rpc_transaction(
            transaction,
            from,
            Some((hash, number, index)),
            header.base_fee_per_gas,
        )))
    }

    /// `eth_getTransactionByHash`. Pooled transactions answer with null
    /// block fields.
    pub fn get_transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<RpcTransaction>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        if let Some(meta) = chain.tx_meta(hash)? {
            let Some(block_hash) = chain.canonical_hash(meta.block_number)? else {
                return Ok(None);
            };
            return self.tx_in_block(&chain, meta.block_number, block_hash, meta.tx_index as u64);
        }
        if let Some(pooled) = self.pool.get(&hash) {
            return Ok(Some(rpc_transaction(&pooled.tx, pooled.sender, None, None)));
        }
        Ok(None)
    }

    /// `eth_getTransactionByBlockHashAndIndex`.
    pub fn get_transaction_by_block_hash_and_index(
        &self,
        block_hash: B256,
        index: u64,
    ) -> Result<Option<RpcTransaction>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let Some(number) = chain.header_number(block_hash)? else { return Ok(None) };
        self.tx_in_block(&chain, number, block_hash, index)
    }

    /// `eth_getTransactionByBlockNumberAndIndex`.
    pub fn get_transaction_by_block_number_and_index(
        &self,
        tag: BlockNumberOrTag,
        index: u64,
    ) -> Result<Option<RpcTransaction>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = match self.resolve_tag(&chain, &head, tag) {
            Ok(anchor) => anchor,
            Err(EthApiError::UnknownBlock) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(hash) = chain.canonical_hash(anchor.number)? else { return Ok(None) };
        self.tx_in_block(&chain, anchor.number, hash, index)
    }

    fn receipts_with_context(
        &self,
        chain: &ChainReader<'_, RO>,
        number: u64,
        hash: B256,
    ) -> Result<Option<Vec<RpcReceipt>>, EthApiError> {
        let Some(receipts) = chain.receipts(number)? else { return Ok(None) };
        let Some(body) = chain.body(number, hash)? else { return Ok(None) };
        let senders = chain.senders(number, hash)?.unwrap_or_default();
        let header = chain
            .header(number, hash)?
            .map(|header| SealedHeader::new(header, hash))
            .ok_or(EthApiError::BlockDataMissing)?;

        let mut out = Vec::with_capacity(receipts.len());
        let mut prev_cumulative = 0u64;
        let mut log_index = 0u64;
        for (index, (receipt, transaction)) in
            receipts.iter().zip(&body.transactions).enumerate()
        {
            let from = senders.get(index).copied().unwrap_or_default();
            out.push(rpc_receipt(
                &header,
                transaction,
                from,
                receipt,
                prev_cumulative,
                index as u64,
                log_index,
            ));
            prev_cumulative = receipt.cumulative_gas_used;
            log_index += receipt.logs.len() as u64;
        }
        Ok(Some(out))
    }

    /// `eth_getTransactionReceipt`.
    pub fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<RpcReceipt>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let Some(meta) = chain.tx_meta(hash)? else { return Ok(None) };
        let Some(block_hash) = chain.canonical_hash(meta.block_number)? else {
            return Ok(None);
        };
        let Some(receipts) =
            self.receipts_with_context(&chain, meta.block_number, block_hash)?
        else {
            return Ok(None);
        };
        Ok(receipts.into_iter().nth(meta.tx_index as usize))
    }

    /// `eth_getBlockReceipts`.
    pub fn get_block_receipts(
        &self,
        block: Option<BlockId>,
    ) -> Result<Option<Vec<RpcReceipt>>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = match self.resolve_block_id(&chain, &head, block) {
            Ok(anchor) => anchor,
            Err(EthApiError::UnknownBlock) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(hash) = chain.canonical_hash(anchor.number)? else { return Ok(None) };
        self.receipts_with_context(&chain, anchor.number, hash)
    }

    /// `eth_sendRawTransaction`.
    pub fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, EthApiError> {
        let transaction = TransactionSigned::decode_enveloped(&raw)
            .map_err(|err| EthApiError::InvalidParams(err.to_string()))?;
        let tx = self.db.tx()?;
        let reader = PlainStateReader::new(&tx);
        let hash = self.pool.add_transaction(transaction, &reader)?;
        trace!(target: "rpc::eth", %hash, "raw transaction accepted");
        Ok(hash)
    }
}
