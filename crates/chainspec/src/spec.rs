use alloy_genesis::Genesis;
use alloy_primitives::{b256, Address, Bytes, B256, B64, U256};
use aura_primitives::{
    constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH, ETH_TO_WEI},
    Header,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Base fee of the genesis block when London is active from genesis.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

/// Default block period of dev/private chains, seconds.
pub const DEV_PERIOD: u64 = 1;

/// SHA-256 of the empty EIP-7685 requests list.
const EMPTY_REQUESTS_HASH: B256 =
    b256!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");

/// Signer vanity prefix length in header extra-data.
const EXTRA_VANITY_LEN: usize = 32;
/// Seal suffix length in header extra-data.
const EXTRA_SEAL_LEN: usize = 65;

/// The chains this node knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuraChain {
    /// The production network.
    Mainnet,
    /// The public test network.
    Testnet,
    /// An operator-supplied genesis.
    Private,
}

impl AuraChain {
    /// Canonical name used in config files and client version strings.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Private => "private",
        }
    }
}

impl std::str::FromStr for AuraChain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "private" => Ok(Self::Private),
            other => Err(UnknownChain(other.to_string())),
        }
    }
}

/// Unrecognized chain name.
#[derive(Debug, thiserror::Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(pub String);

/// The consensus engine variants the node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusKind {
    /// Proof-of-authority with vote-based signer membership.
    Apoa,
    /// PoA variant whose mix-digest commits to the pre-reward state root.
    Apos,
    /// Accepts everything; test harnesses only.
    Faker,
}

/// PoA consensus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoaConfig {
    /// Engine variant.
    pub kind: ConsensusKind,
    /// Minimum seconds between blocks.
    pub period: u64,
    /// Blocks per epoch; vote tallies reset at epoch boundaries.
    pub epoch: u64,
}

impl Default for PoaConfig {
    fn default() -> Self {
        Self { kind: ConsensusKind::Apoa, period: 8, epoch: 30_000 }
    }
}

/// Named protocol upgrades, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hardfork {
    /// EIP-2 era rules.
    Homestead,
    /// EIP-161 state clearing.
    SpuriousDragon,
    /// EIP-658 receipt status.
    Byzantium,
    /// EIP-1344 chain id opcode.
    Istanbul,
    /// EIP-2929/2930 access lists.
    Berlin,
    /// EIP-1559 fee market.
    London,
    /// Withdrawals, PUSH0.
    Shanghai,
    /// EIP-4844 blobs, EIP-1153 transient storage.
    Cancun,
    /// Pectra: EIP-7685 requests, EIP-7691 blob schedule.
    Prague,
}

/// When a hardfork activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkCondition {
    /// Not scheduled.
    Never,
    /// Active at the given block height.
    Block(u64),
    /// Active at the given unix timestamp.
    Timestamp(u64),
}

impl ForkCondition {
    /// Whether the fork is active for a header at `number`/`timestamp`.
    pub const fn active_at(&self, number: u64, timestamp: u64) -> bool {
        match self {
            Self::Never => false,
            Self::Block(block) => *block <= number,
            Self::Timestamp(time) => *time <= timestamp,
        }
    }
}

/// EIP-1559 base fee parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFeeParams {
    /// Bound divisor of per-block base fee changes.
    pub max_change_denominator: u64,
    /// Target gas is `gas_limit / elasticity_multiplier`.
    pub elasticity_multiplier: u64,
}

impl Default for BaseFeeParams {
    fn default() -> Self {
        Self { max_change_denominator: 8, elasticity_multiplier: 2 }
    }
}

/// Per-fork blob gas schedule (EIP-4844, revised by EIP-7691).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobParams {
    /// Target blob count per block.
    pub target_blobs_per_block: u64,
    /// Maximum blob count per block.
    pub max_blobs_per_block: u64,
    /// Denominator of the blob base fee exponential.
    pub base_fee_update_fraction: u64,
}

impl BlobParams {
    /// The Cancun schedule.
    pub const fn cancun() -> Self {
        Self {
            target_blobs_per_block: 3,
            max_blobs_per_block: 6,
            base_fee_update_fraction: 3_338_477,
        }
    }

    /// The Pectra (EIP-7691) schedule.
    pub const fn prague() -> Self {
        Self {
            target_blobs_per_block: 6,
            max_blobs_per_block: 9,
            base_fee_update_fraction: 5_007_716,
        }
    }
}

/// Everything the node needs to know about a chain: identity, genesis,
/// hardfork schedule and consensus parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    /// The chain this spec describes.
    pub chain: AuraChain,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Genesis definition, including the account allocation.
    pub genesis: Genesis,
    /// PoA parameters.
    pub poa: PoaConfig,
    /// Hardfork activation schedule.
    pub hardforks: BTreeMap<Hardfork, ForkCondition>,
}

impl ChainSpec {
    /// Builds a spec for a `private` chain from an operator genesis file.
    ///
    /// Fork activations come from the embedded chain config; the consensus
    /// period/epoch from its clique section, falling back to dev defaults.
    pub fn from_genesis(genesis: Genesis) -> Self {
        let config = &genesis.config;
        let mut hardforks = BTreeMap::new();
        let mut block_fork = |fork: Hardfork, at: Option<u64>| {
            hardforks.insert(fork, at.map_or(ForkCondition::Never, ForkCondition::Block));
        };
        block_fork(Hardfork::Homestead, config.homestead_block);
        block_fork(Hardfork::SpuriousDragon, config.eip158_block);
        block_fork(Hardfork::Byzantium, config.byzantium_block);
        block_fork(Hardfork::Istanbul, config.istanbul_block);
        block_fork(Hardfork::Berlin, config.berlin_block);
        block_fork(Hardfork::London, config.london_block);
        let mut time_fork = |fork: Hardfork, at: Option<u64>| {
            hardforks.insert(fork, at.map_or(ForkCondition::Never, ForkCondition::Timestamp));
        };
        time_fork(Hardfork::Shanghai, config.shanghai_time);
        time_fork(Hardfork::Cancun, config.cancun_time);
        time_fork(Hardfork::Prague, config.prague_time);

        let poa = config.clique.as_ref().map_or(
            PoaConfig { kind: ConsensusKind::Apoa, period: DEV_PERIOD, epoch: 30_000 },
            |clique| PoaConfig {
                kind: ConsensusKind::Apoa,
                period: clique.period.unwrap_or(DEV_PERIOD),
                epoch: clique.epoch.unwrap_or(30_000),
            },
        );

        Self { chain: AuraChain::Private, chain_id: config.chain_id, genesis, poa, hardforks }
    }

    fn fork(&self, fork: Hardfork) -> ForkCondition {
        self.hardforks.get(&fork).copied().unwrap_or(ForkCondition::Never)
    }

    /// Whether `fork` is active for a block at `number`/`timestamp`.
    pub fn is_active_at(&self, fork: Hardfork, number: u64, timestamp: u64) -> bool {
        self.fork(fork).active_at(number, timestamp)
    }

    /// EIP-161 state clearing active at `number`.
    pub fn is_spurious_dragon_active_at_block(&self, number: u64) -> bool {
        self.fork(Hardfork::SpuriousDragon).active_at(number, u64::MAX)
    }

    /// EIP-658 receipt status active at `number`.
    pub fn is_byzantium_active_at_block(&self, number: u64) -> bool {
        self.fork(Hardfork::Byzantium).active_at(number, u64::MAX)
    }

    /// EIP-1559 active at `number`.
    pub fn is_london_active_at_block(&self, number: u64) -> bool {
        self.fork(Hardfork::London).active_at(number, u64::MAX)
    }

    /// Withdrawals active at `timestamp`.
    pub fn is_shanghai_active_at_timestamp(&self, timestamp: u64) -> bool {
        self.fork(Hardfork::Shanghai).active_at(u64::MAX, timestamp)
    }

    /// Blobs and transient storage active at `timestamp`.
    pub fn is_cancun_active_at_timestamp(&self, timestamp: u64) -> bool {
        self.fork(Hardfork::Cancun).active_at(u64::MAX, timestamp)
    }

    /// Pectra rules active at `timestamp`.
    pub fn is_prague_active_at_timestamp(&self, timestamp: u64) -> bool {
        self.fork(Hardfork::Prague).active_at(u64::MAX, timestamp)
    }

    /// Base fee parameters; constant across forks on this chain.
    pub fn base_fee_params(&self) -> BaseFeeParams {
        BaseFeeParams::default()
    }

    /// The blob schedule in force at `timestamp`, if blobs are active.
    pub fn blob_params_at_timestamp(&self, timestamp: u64) -> Option<BlobParams> {
        if self.is_prague_active_at_timestamp(timestamp) {
            Some(BlobParams::prague())
        } else if self.is_cancun_active_at_timestamp(timestamp) {
            Some(BlobParams::cancun())
        } else {
            None
        }
    }

    /// EIP-1559 base fee of the block following `parent`.
    pub fn next_block_base_fee(&self, parent: &Header) -> Option<u64> {
        if !self.is_london_active_at_block(parent.number + 1) {
            return None;
        }
        let Some(base_fee) = parent.base_fee_per_gas else {
            // first London block
            return Some(INITIAL_BASE_FEE);
        };
        let params = self.base_fee_params();
        let gas_target = parent.gas_limit / params.elasticity_multiplier;

        Some(match parent.gas_used.cmp(&gas_target) {
            std::cmp::Ordering::Equal => base_fee,
            std::cmp::Ordering::Greater => {
                let delta = (base_fee as u128 * (parent.gas_used - gas_target) as u128 /
                    gas_target as u128 /
                    params.max_change_denominator as u128) as u64;
                base_fee + delta.max(1)
            }
            std::cmp::Ordering::Less => {
                let delta = (base_fee as u128 * (gas_target - parent.gas_used) as u128 /
                    gas_target as u128 /
                    params.max_change_denominator as u128) as u64;
                base_fee.saturating_sub(delta)
            }
        })
    }

    /// EIP-4844 excess blob gas of the block following `parent`, under the
    /// schedule active at `timestamp`.
    pub fn next_block_excess_blob_gas(&self, parent: &Header, timestamp: u64) -> Option<u64> {
        let params = self.blob_params_at_timestamp(timestamp)?;
        let parent_excess = parent.excess_blob_gas.unwrap_or(0);
        let parent_used = parent.blob_gas_used.unwrap_or(0);
        let target = params.target_blobs_per_block * aura_primitives::constants::GAS_PER_BLOB;
        Some((parent_excess + parent_used).saturating_sub(target))
    }

    /// The PoA signer set embedded in the genesis extra-data.
    pub fn initial_signers(&self) -> Vec<Address> {
        let extra = &self.genesis.extra_data;
        if extra.len() <= EXTRA_VANITY_LEN + EXTRA_SEAL_LEN {
            return Vec::new();
        }
        let signer_bytes = &extra[EXTRA_VANITY_LEN..extra.len() - EXTRA_SEAL_LEN];
        signer_bytes.chunks_exact(Address::len_bytes()).map(Address::from_slice).collect()
    }

    /// The genesis header. The state root is the commitment over the
    /// genesis allocation, computed by the state layer.
    pub fn genesis_header(&self, state_root: B256) -> Header {
        let timestamp = self.genesis.timestamp;
        let base_fee_per_gas =
            self.is_london_active_at_block(0).then_some(
                self.genesis.base_fee_per_gas.map_or(INITIAL_BASE_FEE, |fee| fee as u64),
            );
        let (blob_gas_used, excess_blob_gas) = if self.is_cancun_active_at_timestamp(timestamp) {
            (Some(0), Some(0))
        } else {
            (None, None)
        };
        let parent_beacon_block_root =
            self.is_cancun_active_at_timestamp(timestamp).then_some(B256::ZERO);
        let requests_hash =
            self.is_prague_active_at_timestamp(timestamp).then_some(EMPTY_REQUESTS_HASH);
        let withdrawals_root =
            self.is_shanghai_active_at_timestamp(timestamp).then_some(EMPTY_ROOT_HASH);

        Header {
            parent_hash: B256::ZERO,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: self.genesis.coinbase,
            state_root,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            logs_bloom: Default::default(),
            difficulty: self.genesis.difficulty,
            number: 0,
            gas_limit: self.genesis.gas_limit as u64,
            gas_used: 0,
            timestamp,
            extra_data: self.genesis.extra_data.clone(),
            mix_hash: self.genesis.mix_hash,
            nonce: B64::from(self.genesis.nonce),
            base_fee_per_gas,
            withdrawals_root,
            blob_gas_used,
            excess_blob_gas,
            parent_beacon_block_root,
            requests_hash,
        }
    }
}

/// Builds the extra-data blob for a checkpoint/genesis header: 32 bytes of
/// vanity, the sorted signer list, and a zeroed seal.
pub fn seal_extra_data(mut signers: Vec<Address>) -> Bytes {
    signers.sort();
    let mut extra = Vec::with_capacity(
        EXTRA_VANITY_LEN + signers.len() * Address::len_bytes() + EXTRA_SEAL_LEN,
    );
    extra.extend_from_slice(&[0u8; EXTRA_VANITY_LEN]);
    for signer in signers {
        extra.extend_from_slice(signer.as_slice());
    }
    extra.extend_from_slice(&[0u8; EXTRA_SEAL_LEN]);
    extra.into()
}

fn all_forks_from_genesis(genesis_time: u64) -> BTreeMap<Hardfork, ForkCondition> {
    let mut forks = BTreeMap::new();
    for fork in [
        Hardfork::Homestead,
        Hardfork::SpuriousDragon,
        Hardfork::Byzantium,
        Hardfork::Istanbul,
        Hardfork::Berlin,
        Hardfork::London,
    ] {
        forks.insert(fork, ForkCondition::Block(0));
    }
    for fork in [Hardfork::Shanghai, Hardfork::Cancun, Hardfork::Prague] {
        forks.insert(fork, ForkCondition::Timestamp(genesis_time));
    }
    forks
}

fn named_spec(
    chain: AuraChain,
    chain_id: u64,
    genesis_time: u64,
    signers: Vec<Address>,
    alloc: Vec<(Address, U256)>,
) -> ChainSpec {
    let genesis = Genesis::default()
        .with_gas_limit(30_000_000)
        .with_timestamp(genesis_time)
        .with_extra_data(seal_extra_data(signers))
        .extend_accounts(alloc.into_iter().map(|(address, balance)| {
            (address, alloy_genesis::GenesisAccount::default().with_balance(balance))
        }));

    ChainSpec {
        chain,
        chain_id,
        genesis,
        poa: PoaConfig::default(),
        hardforks: all_forks_from_genesis(genesis_time),
    }
}

/// The aura production network.
pub static MAINNET: Lazy<Arc<ChainSpec>> = Lazy::new(|| {
    Arc::new(named_spec(
        AuraChain::Mainnet,
        9917,
        1_717_200_000,
        vec![
            Address::new([0x11; 20]),
            Address::new([0x57; 20]),
            Address::new([0x9e; 20]),
        ],
        vec![(Address::new([0xfa; 20]), U256::from(400_000_000u64) * U256::from(ETH_TO_WEI))],
    ))
});

/// The aura public test network.
pub static TESTNET: Lazy<Arc<ChainSpec>> = Lazy::new(|| {
    Arc::new(named_spec(
        AuraChain::Testnet,
        9918,
        1_714_500_000,
        vec![Address::new([0x21; 20]), Address::new([0x22; 20])],
        vec![(Address::new([0xfb; 20]), U256::from(1_000_000_000u64) * U256::from(ETH_TO_WEI))],
    ))
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_signers_come_from_extra_data() {
        let signers = MAINNET.initial_signers();
        assert_eq!(signers.len(), 3);
        let mut sorted = signers.clone();
        sorted.sort();
        assert_eq!(signers, sorted, "genesis signers must be sorted");
    }

    #[test]
    fn genesis_header_is_deterministic() {
        let root = B256::new([0xab; 32]);
        let a = MAINNET.genesis_header(root);
        let b = MAINNET.genesis_header(root);
        assert_eq!(a.hash_slow(), b.hash_slow());
        assert_eq!(a.number, 0);
        assert_eq!(a.base_fee_per_gas, Some(INITIAL_BASE_FEE));
        assert!(a.blob_gas_used.is_some(), "cancun active from genesis");
    }

    #[test]
    fn base_fee_tracks_gas_usage() {
        let spec = &*MAINNET;
        let parent = Header {
            number: 1,
            gas_limit: 30_000_000,
            gas_used: 15_000_000, // exactly at target
            base_fee_per_gas: Some(INITIAL_BASE_FEE),
            ..Default::default()
        };
        assert_eq!(spec.next_block_base_fee(&parent), Some(INITIAL_BASE_FEE));

        let busy = Header { gas_used: 30_000_000, ..parent.clone() };
        assert!(spec.next_block_base_fee(&busy).unwrap() > INITIAL_BASE_FEE);

        let idle = Header { gas_used: 0, ..parent };
        assert!(spec.next_block_base_fee(&idle).unwrap() < INITIAL_BASE_FEE);
    }

    #[test]
    fn blob_schedule_switches_at_prague() {
        let spec = &*MAINNET;
        // prague is active from genesis on mainnet
        assert_eq!(
            spec.blob_params_at_timestamp(spec.genesis.timestamp),
            Some(BlobParams::prague())
        );
        assert_eq!(BlobParams::cancun().max_blobs_per_block, 6);
        assert_eq!(BlobParams::prague().max_blobs_per_block, 9);
    }

    #[test]
    fn private_spec_reads_clique_config() {
        let genesis: Genesis = serde_json::from_str(
            r#"{
                "config": {
                    "chainId": 1337,
                    "homesteadBlock": 0,
                    "eip158Block": 0,
                    "byzantiumBlock": 0,
                    "istanbulBlock": 0,
                    "berlinBlock": 0,
                    "londonBlock": 0,
                    "clique": { "period": 3, "epoch": 100 }
                },
                "difficulty": "0x1",
                "gasLimit": "0x1c9c380",
                "alloc": {}
            }"#,
        )
        .unwrap();
        let spec = ChainSpec::from_genesis(genesis);
        assert_eq!(spec.chain_id, 1337);
        assert_eq!(spec.poa.period, 3);
        assert_eq!(spec.poa.epoch, 100);
        assert!(spec.is_london_active_at_block(0));
        assert!(!spec.is_cancun_active_at_timestamp(u64::MAX));
    }
}
