//! Maps the chain spec and headers onto revm environments.

use aura_chainspec::{ChainSpec, Hardfork};
use aura_primitives::{Header, TransactionSigned};
use revm::primitives::{BlobExcessGasAndPrice, BlockEnv, CfgEnv, SpecId, TxEnv, B256, U256};

/// The revm [`SpecId`] in force for a header of this chain.
pub fn spec_id_at_header(chain_spec: &ChainSpec, header: &Header) -> SpecId {
    spec_id_at(chain_spec, header.number, header.timestamp)
}

/// The revm [`SpecId`] in force at `(number, timestamp)`.
pub fn spec_id_at(chain_spec: &ChainSpec, number: u64, timestamp: u64) -> SpecId {
    if chain_spec.is_active_at(Hardfork::Prague, number, timestamp) {
        SpecId::PRAGUE
    } else if chain_spec.is_active_at(Hardfork::Cancun, number, timestamp) {
        SpecId::CANCUN
    } else if chain_spec.is_active_at(Hardfork::Shanghai, number, timestamp) {
        SpecId::SHANGHAI
    } else if chain_spec.is_active_at(Hardfork::London, number, timestamp) {
        SpecId::LONDON
    } else if chain_spec.is_active_at(Hardfork::Berlin, number, timestamp) {
        SpecId::BERLIN
    } else if chain_spec.is_active_at(Hardfork::Istanbul, number, timestamp) {
        SpecId::ISTANBUL
    } else if chain_spec.is_active_at(Hardfork::Byzantium, number, timestamp) {
        SpecId::BYZANTIUM
    } else if chain_spec.is_active_at(Hardfork::SpuriousDragon, number, timestamp) {
        SpecId::SPURIOUS_DRAGON
    } else if chain_spec.is_active_at(Hardfork::Homestead, number, timestamp) {
        SpecId::HOMESTEAD
    } else {
        SpecId::FRONTIER
    }
}

/// Fills the config env.
pub fn fill_cfg_env(cfg: &mut CfgEnv, chain_spec: &ChainSpec) {
    cfg.chain_id = chain_spec.chain_id;
}

/// The precompile addresses active (and warm) at `header`.
pub fn precompile_addresses(chain_spec: &ChainSpec, header: &Header) -> Vec<aura_primitives::Address> {
    let spec_id = spec_id_at_header(chain_spec, header);
    revm::precompile::Precompiles::new(revm::precompile::PrecompileSpecId::from_spec_id(spec_id))
        .addresses()
        .copied()
        .collect()
}

/// Fills the block env from a header.
pub fn fill_block_env(block: &mut BlockEnv, header: &Header) {
    block.number = U256::from(header.number);
    block.coinbase = header.beneficiary;
    block.timestamp = U256::from(header.timestamp);
    block.gas_limit = U256::from(header.gas_limit);
    block.basefee = U256::from(header.base_fee_per_gas.unwrap_or_default());
    block.difficulty = header.difficulty;
    // PoA carries no randomness beacon; the mix digest slot stands in
    block.prevrandao = Some(B256::from(header.mix_hash));
    block.blob_excess_gas_and_price =
        header.excess_blob_gas.map(BlobExcessGasAndPrice::new);
}

/// Fills the transaction env. The gas price is the *effective* per-gas
/// price so the GASPRICE opcode observes what the sender actually pays.
pub fn fill_tx_env(
    tx_env: &mut TxEnv,
    tx: &TransactionSigned,
    sender: aura_primitives::Address,
    base_fee: Option<u64>,
) {
    tx_env.caller = sender;
    tx_env.gas_limit = tx.gas_limit();
    tx_env.gas_price = U256::from(tx.effective_gas_price(base_fee));
    tx_env.gas_priority_fee = None;
    tx_env.transact_to = tx.to();
    tx_env.value = tx.value();
    tx_env.data = tx.input().clone();
    tx_env.nonce = Some(tx.nonce());
    tx_env.chain_id = tx.chain_id();
    tx_env.blob_hashes = tx.blob_versioned_hashes().map(<[B256]>::to_vec).unwrap_or_default();
    tx_env.max_fee_per_blob_gas = tx.max_fee_per_blob_gas().map(U256::from);
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_chainspec::MAINNET;

    #[test]
    fn mainnet_runs_prague_from_genesis() {
        let header = MAINNET.genesis_header(B256::ZERO);
        assert_eq!(spec_id_at_header(&MAINNET, &header), SpecId::PRAGUE);
    }

    #[test]
    fn pre_fork_block_resolves_older_spec() {
        let mut spec = (**MAINNET).clone();
        spec.hardforks.insert(
            aura_chainspec::Hardfork::Prague,
            aura_chainspec::ForkCondition::Timestamp(u64::MAX),
        );
        let header = Header { timestamp: spec.genesis.timestamp, ..Default::default() };
        assert_eq!(spec_id_at_header(&spec, &header), SpecId::CANCUN);
    }
}
