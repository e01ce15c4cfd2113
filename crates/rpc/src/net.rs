//! `net`, `web3` and `txpool` namespaces.

use crate::{
    error::EthApiError,
    eth::EthApi,
    types::{rpc_transaction, RpcTransaction, RpcTxpoolStatus},
};
use aura_primitives::{keccak256, Address, Bytes, B256};
use aura_state::PlainStateReader;
use std::collections::BTreeMap;

/// Client identifier reported by `web3_clientVersion`.
pub const CLIENT_VERSION: &str = concat!("aura/v", env!("CARGO_PKG_VERSION"));

impl EthApi {
    /// `net_version`: the chain id as a decimal string.
    pub fn net_version(&self) -> String {
        self.chain_id().to_string()
    }

    /// `net_listening`: networking is an external collaborator; the core
    /// reports not-listening.
    pub fn net_listening(&self) -> bool {
        false
    }

    /// `net_peerCount`.
    pub fn net_peer_count(&self) -> u64 {
        0
    }

    /// `web3_clientVersion`.
    pub fn web3_client_version(&self) -> String {
        CLIENT_VERSION.to_string()
    }

    /// `web3_sha3`.
    pub fn web3_sha3(&self, data: Bytes) -> B256 {
        keccak256(&data)
    }

    /// `txpool_status`.
    pub fn txpool_status(&self) -> Result<RpcTxpoolStatus, EthApiError> {
        let tx = self.db.tx()?;
        let reader = PlainStateReader::new(&tx);
        let (pending, queued) = self.pool.status(&reader)?;
        Ok(RpcTxpoolStatus { pending: pending as u64, queued: queued as u64 })
    }

    /// `txpool_content`: pooled transactions grouped by sender and nonce.
    /// The queued map follows the same executable-chain split as
    /// [`Self::txpool_status`].
    pub fn txpool_content(
        &self,
    ) -> Result<
        (
            BTreeMap<Address, BTreeMap<u64, RpcTransaction>>,
            BTreeMap<Address, BTreeMap<u64, RpcTransaction>>,
        ),
        EthApiError,
    > {
        let tx = self.db.tx()?;
        let reader = PlainStateReader::new(&tx);

        let mut pending: BTreeMap<Address, BTreeMap<u64, RpcTransaction>> = BTreeMap::new();
        let mut queued: BTreeMap<Address, BTreeMap<u64, RpcTransaction>> = BTreeMap::new();

        for (sender, chain) in self.pool.pending_by_sender() {
            let mut next_nonce = {
                use aura_state::StateReader;
                reader.read_account(sender)?.map(|account| account.nonce).unwrap_or_default()
            };
            for pooled in chain {
                let entry = rpc_transaction(&pooled.tx, sender, None, None);
                if pooled.tx.nonce() == next_nonce {
                    pending.entry(sender).or_default().insert(pooled.tx.nonce(), entry);
                    next_nonce += 1;
                } else {
                    queued.entry(sender).or_default().insert(pooled.tx.nonce(), entry);
                }
            }
        }
        Ok((pending, queued))
    }
}
