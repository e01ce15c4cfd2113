//! `eth_getLogs` and the installable filter family.

use crate::{error::EthApiError, eth::EthApi, types::rpc_logs};
use alloy_rpc_types_eth::{BlockNumberOrTag, Filter, FilterBlockOption, Log as RpcLog};
use aura_primitives::{Log, B256, U256};
use aura_state::ChainReader;
use libmdbx::RO;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

/// Hard cap on a log query's block range.
const MAX_BLOCK_RANGE: u64 = 10_000;

/// `eth_getFilterChanges` response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FilterChanges {
    /// New block or pending-transaction hashes.
    Hashes(Vec<B256>),
    /// New matching logs.
    Logs(Vec<RpcLog>),
}

enum FilterKind {
    Log(Box<Filter>),
    Block,
    PendingTransaction,
}

struct InstalledFilter {
    kind: FilterKind,
    /// Highest block already reported.
    last_block: u64,
    /// Pending-transaction hashes already reported.
    seen: HashSet<B256>,
}

/// Poll-based filter registry.
#[derive(Default)]
pub struct FilterStore {
    inner: RwLock<HashMap<u64, InstalledFilter>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FilterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStore").field("installed", &self.inner.read().len()).finish()
    }
}

impl FilterStore {
    fn install(&self, kind: FilterKind, last_block: u64) -> U256 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .write()
            .insert(id, InstalledFilter { kind, last_block, seen: HashSet::new() });
        U256::from(id)
    }

    fn remove(&self, id: U256) -> bool {
        let Ok(id) = u64::try_from(id) else { return false };
        self.inner.write().remove(&id).is_some()
    }
}

/// Whether `log` passes the address and topic sets of `filter`.
pub(crate) fn log_matches(filter: &Filter, log: &Log) -> bool {
    if !filter.address.matches(&log.address) {
        return false;
    }
    let topics = log.topics();
    for (index, topic_filter) in filter.topics.iter().enumerate() {
        if topic_filter.is_empty() {
            continue;
        }
        match topics.get(index) {
            Some(topic) if topic_filter.matches(topic) => {}
            _ => return false,
        }
    }
    true
}

impl EthApi {
    fn filter_range(
        &self,
        chain: &ChainReader<'_, RO>,
        filter: &Filter,
    ) -> Result<(u64, u64), EthApiError> {
        let head = self.head(chain)?;
        match filter.block_option {
            FilterBlockOption::AtBlockHash(hash) => {
                let number =
                    chain.header_number(hash)?.ok_or(EthApiError::UnknownBlock)?;
                Ok((number, number))
            }
            FilterBlockOption::Range { from_block, to_block } => {
                let resolve = |tag: Option<BlockNumberOrTag>, default: u64| match tag {
                    None => Ok(default),
                    Some(tag) => self.resolve_tag(chain, &head, tag).map(|anchor| anchor.number),
                };
                let from = resolve(from_block, head.number())?;
                let to = resolve(to_block, head.number())?;
                if from > to {
                    return Err(EthApiError::InvalidParams(
                        "fromBlock above toBlock".to_string(),
                    ));
                }
                if to - from > MAX_BLOCK_RANGE {
                    return Err(EthApiError::InvalidParams(format!(
                        "block range too wide (max {MAX_BLOCK_RANGE})"
                    )));
                }
                Ok((from, to))
            }
        }
    }

    fn logs_in_range(
        &self,
        chain: &ChainReader<'_, RO>,
        filter: &Filter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RpcLog>, EthApiError> {
        let mut out = Vec::new();
        for number in from..=to {
            let Some(hash) = chain.canonical_hash(number)? else { continue };
            let Some(receipts) = chain.receipts(number)? else { continue };
            // cheap pre-check on the accumulated bloom before touching the body
            if receipts.iter().all(|receipt| receipt.logs.is_empty()) {
                continue;
            }
            let Some(body) = chain.body(number, hash)? else { continue };

            let mut log_index = 0u64;
            for (tx_index, receipt) in receipts.iter().enumerate() {
                let log_count = receipt.logs.len() as u64;
                let any_match = receipt.logs.iter().any(|log| log_matches(filter, log));
                if any_match {
                    let tx_hash = body
                        .transactions
                        .get(tx_index)
                        .map(|tx| tx.hash())
                        .unwrap_or_default();
                    let positioned =
                        rpc_logs(receipt, hash, number, tx_hash, tx_index as u64, log_index);
                    out.extend(
                        positioned
                            .into_iter()
                            .filter(|log| log_matches(filter, &log.inner)),
                    );
                }
                log_index += log_count;
            }
        }
        Ok(out)
    }

    /// `eth_getLogs`.
    pub fn get_logs(&self, filter: &Filter) -> Result<Vec<RpcLog>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let (from, to) = self.filter_range(&chain, filter)?;
        self.logs_in_range(&chain, filter, from, to)
    }

    /// `eth_newFilter`.
    pub fn new_filter(&self, filter: Filter) -> Result<U256, EthApiError> {
        let head = self.block_number()?;
        Ok(self.filters.install(FilterKind::Log(Box::new(filter)), head))
    }

    /// `eth_newBlockFilter`.
    pub fn new_block_filter(&self) -> Result<U256, EthApiError> {
        let head = self.block_number()?;
        Ok(self.filters.install(FilterKind::Block, head))
    }

    /// `eth_newPendingTransactionFilter`.
    pub fn new_pending_transaction_filter(&self) -> Result<U256, EthApiError> {
        let head = self.block_number()?;
        Ok(self.filters.install(FilterKind::PendingTransaction, head))
    }

    /// `eth_uninstallFilter`.
    pub fn uninstall_filter(&self, id: U256) -> bool {
        self.filters.remove(id)
    }

    /// `eth_getFilterChanges`.
    pub fn get_filter_changes(&self, id: U256) -> Result<FilterChanges, EthApiError> {
        let id = u64::try_from(id)
            .map_err(|_| EthApiError::InvalidParams("unknown filter id".to_string()))?;
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?.number();

        let mut filters = self.filters.inner.write();
        let installed = filters
            .get_mut(&id)
            .ok_or_else(|| EthApiError::InvalidParams("unknown filter id".to_string()))?;

        match &installed.kind {
            FilterKind::Block => {
                let mut hashes = Vec::new();
                for number in installed.last_block + 1..=head {
                    if let Some(hash) = chain.canonical_hash(number)? {
                        hashes.push(hash);
                    }
                }
                installed.last_block = head;
                Ok(FilterChanges::Hashes(hashes))
            }
            FilterKind::PendingTransaction => {
                let mut fresh = Vec::new();
                for (_, chain_txs) in self.pool.pending_by_sender() {
                    for pooled in chain_txs {
                        let hash = pooled.tx.hash();
                        if installed.seen.insert(hash) {
                            fresh.push(hash);
                        }
                    }
                }
                Ok(FilterChanges::Hashes(fresh))
            }
            FilterKind::Log(filter) => {
                let from = installed.last_block + 1;
                if from > head {
                    return Ok(FilterChanges::Logs(Vec::new()));
                }
                let filter = (**filter).clone();
                installed.last_block = head;
                drop(filters);
                Ok(FilterChanges::Logs(self.logs_in_range(&chain, &filter, from, head)?))
            }
        }
    }

    /// `eth_getFilterLogs`: the full match set of an installed log filter.
    pub fn get_filter_logs(&self, id: U256) -> Result<Vec<RpcLog>, EthApiError> {
        let id = u64::try_from(id)
            .map_err(|_| EthApiError::InvalidParams("unknown filter id".to_string()))?;
        let filter = {
            let filters = self.filters.inner.read();
            match filters.get(&id).map(|installed| &installed.kind) {
                Some(FilterKind::Log(filter)) => (**filter).clone(),
                _ => {
                    return Err(EthApiError::InvalidParams(
                        "not a log filter".to_string(),
                    ))
                }
            }
        };
        self.get_logs(&filter)
    }
}
