//! APOA consensus: proof-of-authority with vote-based signer membership,
//! epoch checkpoints and in-turn/no-turn difficulty.
//!
//! Three engine variants share one capability surface: `Apoa` (zero mix
//! digest), `Apos` (the mix digest carries the pre-reward state root
//! commitment) and `Faker` (accepts everything; test harnesses).

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, SystemTime},
};

use aura_chainspec::{ChainSpec, ConsensusKind};
use aura_db::DatabaseEnv;
use aura_primitives::{
    constants::{EMPTY_OMMER_ROOT_HASH, GAS_LIMIT_BOUND_DIVISOR, MIN_GAS_LIMIT},
    Address, Header, SealedHeader, B256, U256,
};
use aura_state::ChainReader;
use lru::LruCache;
use parking_lot::RwLock;
use rand::RngCore;
use schnellru::{ByLength, LruMap};
use tracing::{debug, trace};

pub mod constants;
mod error;
mod seal;
mod sealer;
mod snapshot;

pub use constants::{DIFF_INTURN, DIFF_NOTURN, NONCE_AUTH, NONCE_DROP};
pub use error::ApoaError;
pub use seal::{recover_seal_signer, seal_hash, seal_header};
pub use sealer::{SealOutcome, SealTask};
pub use snapshot::{Snapshot, Tally, Vote};

use constants::{
    CHECKPOINT_INTERVAL, EXTRA_SEAL_LEN, EXTRA_SIGNER_LEN, EXTRA_VANITY_LEN,
    RECOVERED_SIGNER_CACHE_SIZE, SNAPSHOT_CACHE_SIZE, WIGGLE_TIME_MS,
};

/// The capability surface every engine variant exposes.
pub trait Engine: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> ConsensusKind;

    /// Full header verification against its parent, snapshot-derived
    /// authorization included.
    fn verify_header(&self, header: &SealedHeader, parent: &SealedHeader)
        -> Result<(), ApoaError>;

    /// The address that sealed `header`.
    fn recover_proposer(&self, header: &SealedHeader) -> Result<Address, ApoaError>;

    /// The snapshot at `(number, hash)`.
    fn snapshot_at(&self, number: u64, hash: B256) -> Result<Snapshot, ApoaError>;

    /// Difficulty the local signer would seal the child of `parent` with.
    fn difficulty(&self, parent: &SealedHeader) -> Result<U256, ApoaError>;

    /// Fills the consensus fields of a header under construction.
    fn prepare(&self, parent: &SealedHeader, header: &mut Header) -> Result<(), ApoaError>;

    /// Signs and seals a prepared header, honoring the no-turn wiggle.
    /// Returns `None` when the stop channel fired first.
    fn seal(
        &self,
        header: Header,
        stop: &std::sync::mpsc::Receiver<()>,
    ) -> Result<Option<SealedHeader>, ApoaError>;

    /// Signs a prepared header immediately, without slot waiting. Used by
    /// the payload builder, which owns its own timing.
    fn sign_prepared(&self, header: &mut Header) -> Result<(), ApoaError>;

    /// Whether the local key is an authorized signer at the given tip.
    fn is_active_signer(&self, tip: &SealedHeader) -> bool;
}

struct LocalSigner {
    address: Address,
    secret: B256,
}

/// The proof-of-authority engine.
pub struct Apoa {
    chain_spec: Arc<ChainSpec>,
    db: Arc<DatabaseEnv>,
    kind: ConsensusKind,
    epoch: u64,
    period: u64,
    recovered: RwLock<LruCache<B256, Address>>,
    snapshots: RwLock<LruMap<B256, Snapshot>>,
    proposals: RwLock<HashMap<Address, bool>>,
    signer: RwLock<Option<LocalSigner>>,
}

impl std::fmt::Debug for Apoa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Apoa")
            .field("kind", &self.kind)
            .field("epoch", &self.epoch)
            .field("period", &self.period)
            .finish()
    }
}

impl Apoa {
    /// Engine over the given chain and store.
    pub fn new(chain_spec: Arc<ChainSpec>, db: Arc<DatabaseEnv>) -> Self {
        let kind = chain_spec.poa.kind;
        let epoch = chain_spec.poa.epoch;
        let period = chain_spec.poa.period;
        Self {
            chain_spec,
            db,
            kind,
            epoch,
            period,
            recovered: RwLock::new(LruCache::new(
                NonZeroUsize::new(RECOVERED_SIGNER_CACHE_SIZE).expect("nonzero"),
            )),
            snapshots: RwLock::new(LruMap::new(ByLength::new(SNAPSHOT_CACHE_SIZE as u32))),
            proposals: RwLock::new(HashMap::new()),
            signer: RwLock::new(None),
        }
    }

    /// Blocks per epoch.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Minimum seconds between blocks.
    pub const fn period(&self) -> u64 {
        self.period
    }

    /// Injects the local signing key (the `miner.etherbase` identity).
    pub fn authorize(&self, address: Address, secret: B256) {
        *self.signer.write() = Some(LocalSigner { address, secret });
    }

    /// The local signer address, if any.
    pub fn local_signer(&self) -> Option<Address> {
        self.signer.read().as_ref().map(|signer| signer.address)
    }

    /// Registers a membership proposal the signer votes for while sealing.
    pub fn propose(&self, candidate: Address, authorize: bool) {
        self.proposals.write().insert(candidate, authorize);
    }

    /// Withdraws a membership proposal.
    pub fn discard(&self, candidate: Address) {
        self.proposals.write().remove(&candidate);
    }

    fn present_timestamp(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }

    fn recover(&self, header: &SealedHeader) -> Result<Address, ApoaError> {
        if let Some(signer) = self.recovered.write().get(&header.hash()) {
            return Ok(*signer);
        }
        let signer = seal::recover_seal_signer(header)?;
        self.recovered.write().put(header.hash(), signer);
        Ok(signer)
    }

    fn signer_bytes_len(&self, header: &Header) -> Result<usize, ApoaError> {
        let extra_len = header.extra_data.len();
        if extra_len < EXTRA_VANITY_LEN {
            return Err(ApoaError::MissingVanity);
        }
        if extra_len < EXTRA_VANITY_LEN + EXTRA_SEAL_LEN {
            return Err(ApoaError::MissingSignature);
        }
        Ok(extra_len - EXTRA_VANITY_LEN - EXTRA_SEAL_LEN)
    }

    fn checkpoint_signers(header: &Header) -> Vec<Address> {
        let extra = &header.extra_data;
        extra[EXTRA_VANITY_LEN..extra.len() - EXTRA_SEAL_LEN]
            .chunks_exact(EXTRA_SIGNER_LEN)
            .map(Address::from_slice)
            .collect()
    }

    fn load_persisted_snapshot(&self, hash: B256) -> Result<Option<Snapshot>, ApoaError> {
        let raw = self.db.view(|tx| tx.get::<aura_db::tables::SignersDB>(hash))?;
        raw.map(|raw| {
            serde_json::from_slice(&raw).map_err(|e| ApoaError::CorruptSnapshot(e.to_string()))
        })
        .transpose()
    }

    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<(), ApoaError> {
        let raw = serde_json::to_vec(snapshot)
            .map_err(|e| ApoaError::CorruptSnapshot(e.to_string()))?;
        self.db.update(|tx| {
            tx.put::<aura_db::tables::SignersDB>(snapshot.block_hash, raw.clone())?;
            tx.put::<aura_db::tables::PoaSnapshot>(snapshot.block_number, snapshot.block_hash)
        })?;
        metrics::counter!("consensus.snapshots_persisted").increment(1);
        debug!(
            target: "consensus::apoa",
            number = snapshot.block_number,
            signers = snapshot.signers.len(),
            "snapshot persisted"
        );
        Ok(())
    }

    fn header_at(&self, number: u64, hash: B256) -> Result<Option<SealedHeader>, ApoaError> {
        let tx = self.db.tx()?;
        let reader = ChainReader::new(&tx);
        Ok(reader.header(number, hash)?.map(|header| SealedHeader::new(header, hash)))
    }

    fn vote_of(&self, header: &SealedHeader) -> Option<(Address, aura_primitives::B64)> {
        if header.number() % self.epoch == 0 || header.beneficiary == Address::ZERO {
            return None;
        }
        Some((header.beneficiary, header.nonce))
    }

    /// Walks back from `(number, hash)` to the nearest cached, persisted
    /// or genesis snapshot and replays the intervening headers onto it.
    fn snapshot(&self, number: u64, hash: B256) -> Result<Snapshot, ApoaError> {
        let mut headers: Vec<SealedHeader> = Vec::new();
        let mut cursor = (number, hash);

        let mut snap = loop {
            let (number, hash) = cursor;
            if let Some(snap) = self.snapshots.write().get(&hash) {
                break snap.clone();
            }
            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snap) = self.load_persisted_snapshot(hash)? {
                    break snap;
                }
            }
            let header = self.header_at(number, hash)?.ok_or(ApoaError::UnknownBlock(hash))?;
            if number == 0 {
                let signers = Self::checkpoint_signers(&header);
                break Snapshot::new(signers, 0, hash);
            }
            cursor = (number - 1, header.parent_hash);
            headers.push(header);
        };

        for header in headers.iter().rev() {
            let signer = self.recover(header)?;
            let vote = self.vote_of(header);
            snap = snap.apply(self.epoch, header.number(), header.hash(), signer, vote)?;
        }

        self.snapshots.write().insert(snap.block_hash, snap.clone());
        if !headers.is_empty() && snap.block_number % CHECKPOINT_INTERVAL == 0 {
            self.persist_snapshot(&snap)?;
        }
        trace!(
            target: "consensus::apoa",
            number = snap.block_number,
            replayed = headers.len(),
            "snapshot resolved"
        );
        Ok(snap)
    }
}

impl Engine for Apoa {
    fn kind(&self) -> ConsensusKind {
        self.kind
    }

    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ApoaError> {
        let number = header.number();
        if number == 0 {
            return Err(ApoaError::GenesisUnverifiable);
        }
        if header.timestamp > self.present_timestamp() {
            return Err(ApoaError::FutureBlock { block_number: number });
        }
        if header.parent_hash != parent.hash() || parent.number() + 1 != number {
            return Err(ApoaError::UnknownBlock(header.parent_hash));
        }

        // extra-data discipline: vanity || [signers on checkpoints] || seal
        let is_checkpoint = number % self.epoch == 0;
        let signer_bytes = self.signer_bytes_len(header)?;
        if !is_checkpoint && signer_bytes != 0 {
            return Err(ApoaError::ExtraSigners);
        }
        if is_checkpoint && (signer_bytes == 0 || signer_bytes % EXTRA_SIGNER_LEN != 0) {
            return Err(ApoaError::InvalidCheckpointSigners);
        }

        // vote marker
        if header.nonce != NONCE_AUTH && header.nonce != NONCE_DROP {
            return Err(ApoaError::InvalidVote);
        }
        if is_checkpoint && header.nonce != NONCE_DROP {
            return Err(ApoaError::InvalidVote);
        }

        // mix digest: zero under plain PoA; the staked variant carries the
        // pre-reward state root commitment there
        if self.kind == ConsensusKind::Apoa && header.mix_hash != B256::ZERO {
            return Err(ApoaError::InvalidMixDigest);
        }

        if header.ommers_hash != EMPTY_OMMER_ROOT_HASH {
            return Err(ApoaError::NonEmptyOmmers);
        }

        // gas envelope
        if header.gas_used > header.gas_limit {
            return Err(ApoaError::InvalidGasUsed {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            });
        }
        let limit_delta = parent.gas_limit.abs_diff(header.gas_limit);
        let max_delta = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        if limit_delta >= max_delta || header.gas_limit < MIN_GAS_LIMIT {
            return Err(ApoaError::InvalidGasLimit { gas_limit: header.gas_limit });
        }
        if self.chain_spec.is_london_active_at_block(number) &&
            header.base_fee_per_gas != self.chain_spec.next_block_base_fee(parent)
        {
            return Err(ApoaError::InvalidBaseFee);
        }

        // period
        if header.timestamp < parent.timestamp + self.period {
            return Err(ApoaError::InvalidTimestamp {
                timestamp: header.timestamp,
                parent_timestamp: parent.timestamp,
                period: self.period,
            });
        }

        if header.difficulty != DIFF_INTURN && header.difficulty != DIFF_NOTURN {
            return Err(ApoaError::InvalidDifficulty);
        }

        // authorization: replaying the header onto the parent snapshot
        // enforces membership and the recency window
        let signer = self.recover(header)?;
        let snap = self.snapshot(number - 1, header.parent_hash)?;
        snap.apply(self.epoch, number, header.hash(), signer, self.vote_of(header))?;

        // turn-dependent difficulty
        let inturn = snap.is_inturn(number, signer);
        if (inturn && header.difficulty != DIFF_INTURN) ||
            (!inturn && header.difficulty != DIFF_NOTURN)
        {
            return Err(ApoaError::WrongDifficulty);
        }

        // checkpoint headers must list the snapshot's signers byte-for-byte
        if is_checkpoint {
            let expected = snap.signers_sorted();
            if Self::checkpoint_signers(header) != expected {
                return Err(ApoaError::InvalidCheckpointSigners);
            }
        }

        Ok(())
    }

    fn recover_proposer(&self, header: &SealedHeader) -> Result<Address, ApoaError> {
        self.recover(header)
    }

    fn snapshot_at(&self, number: u64, hash: B256) -> Result<Snapshot, ApoaError> {
        self.snapshot(number, hash)
    }

    fn difficulty(&self, parent: &SealedHeader) -> Result<U256, ApoaError> {
        let signer = self.local_signer().ok_or(ApoaError::NoLocalSigner)?;
        let snap = self.snapshot(parent.number(), parent.hash())?;
        Ok(if snap.is_inturn(parent.number() + 1, signer) { DIFF_INTURN } else { DIFF_NOTURN })
    }

    fn prepare(&self, parent: &SealedHeader, header: &mut Header) -> Result<(), ApoaError> {
        let number = parent.number() + 1;
        let snap = self.snapshot(parent.number(), parent.hash())?;

        header.number = number;
        header.parent_hash = parent.hash();
        header.difficulty = self.difficulty(parent)?;
        header.ommers_hash = EMPTY_OMMER_ROOT_HASH;

        // carry a pending proposal, if any is still actionable
        header.beneficiary = Address::ZERO;
        header.nonce = NONCE_DROP;
        if number % self.epoch != 0 {
            let proposals = self.proposals.read();
            let actionable: Vec<_> = proposals
                .iter()
                .filter(|(candidate, authorize)| {
                    snap.signers.contains(*candidate) != **authorize
                })
                .collect();
            if !actionable.is_empty() {
                let mut rng = rand::rngs::OsRng;
                let pick = rng.next_u64() as usize % actionable.len();
                let (candidate, authorize) = actionable[pick];
                header.beneficiary = *candidate;
                header.nonce = if *authorize { NONCE_AUTH } else { NONCE_DROP };
            }
        }

        // vanity || [signers on checkpoints] || zeroed seal
        let mut extra = vec![0u8; EXTRA_VANITY_LEN];
        if number % self.epoch == 0 {
            for signer in snap.signers_sorted() {
                extra.extend_from_slice(signer.as_slice());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL_LEN]);
        header.extra_data = extra.into();

        header.timestamp =
            (parent.timestamp + self.period).max(self.present_timestamp());
        Ok(())
    }

    fn seal(
        &self,
        mut header: Header,
        stop: &std::sync::mpsc::Receiver<()>,
    ) -> Result<Option<SealedHeader>, ApoaError> {
        let (address, secret) = {
            let guard = self.signer.read();
            let signer = guard.as_ref().ok_or(ApoaError::NoLocalSigner)?;
            (signer.address, signer.secret)
        };

        let snap = self.snapshot(header.number - 1, header.parent_hash)?;
        if !snap.signers.contains(&address) {
            return Err(ApoaError::UnauthorizedSigner(address));
        }
        if snap.signed_recently(address) {
            debug!(target: "consensus::apoa", %address, "signed recently, skipping slot");
            return Ok(None);
        }

        // wait out the declared timestamp, plus the no-turn wiggle that
        // keeps the in-turn signer ahead of the pack
        let now = self.present_timestamp();
        let mut delay = Duration::from_secs(header.timestamp.saturating_sub(now));
        if header.difficulty == DIFF_NOTURN {
            let mut rng = rand::rngs::OsRng;
            let steps = rng.next_u64() % (snap.recency_window() + 1);
            delay += Duration::from_millis(steps * WIGGLE_TIME_MS);
        }

        match stop.recv_timeout(delay) {
            Ok(()) => return Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
        }

        seal::seal_header(&mut header, secret)?;
        metrics::counter!("consensus.blocks_sealed").increment(1);
        Ok(Some(SealedHeader::seal_slow(header)))
    }

    fn sign_prepared(&self, header: &mut Header) -> Result<(), ApoaError> {
        let secret = {
            let guard = self.signer.read();
            guard.as_ref().ok_or(ApoaError::NoLocalSigner)?.secret
        };
        seal::seal_header(header, secret)
    }

    fn is_active_signer(&self, tip: &SealedHeader) -> bool {
        let Some(address) = self.local_signer() else { return false };
        self.snapshot(tip.number(), tip.hash())
            .map(|snap| snap.signers.contains(&address))
            .unwrap_or(false)
    }
}

/// Accepts everything; test harnesses only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faker;

impl Engine for Faker {
    fn kind(&self) -> ConsensusKind {
        ConsensusKind::Faker
    }

    fn verify_header(
        &self,
        header: &SealedHeader,
        parent: &SealedHeader,
    ) -> Result<(), ApoaError> {
        if header.parent_hash != parent.hash() {
            return Err(ApoaError::UnknownBlock(header.parent_hash));
        }
        Ok(())
    }

    fn recover_proposer(&self, header: &SealedHeader) -> Result<Address, ApoaError> {
        Ok(header.beneficiary)
    }

    fn snapshot_at(&self, number: u64, hash: B256) -> Result<Snapshot, ApoaError> {
        Ok(Snapshot::new(Vec::new(), number, hash))
    }

    fn difficulty(&self, _parent: &SealedHeader) -> Result<U256, ApoaError> {
        Ok(DIFF_NOTURN)
    }

    fn prepare(&self, parent: &SealedHeader, header: &mut Header) -> Result<(), ApoaError> {
        header.number = parent.number() + 1;
        header.parent_hash = parent.hash();
        header.difficulty = DIFF_NOTURN;
        Ok(())
    }

    fn seal(
        &self,
        header: Header,
        _stop: &std::sync::mpsc::Receiver<()>,
    ) -> Result<Option<SealedHeader>, ApoaError> {
        Ok(Some(SealedHeader::seal_slow(header)))
    }

    fn sign_prepared(&self, _header: &mut Header) -> Result<(), ApoaError> {
        Ok(())
    }

    fn is_active_signer(&self, _tip: &SealedHeader) -> bool {
        false
    }
}
