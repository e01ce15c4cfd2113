//! Signer rotation, difficulty and vote-based membership over a real
//! store.

use aura_chainspec::{AuraChain, ChainSpec, ConsensusKind, ForkCondition, Hardfork, PoaConfig};
use aura_consensus::{
    seal_header, Apoa, ApoaError, Engine, DIFF_INTURN, DIFF_NOTURN, NONCE_DROP,
};
use aura_db::DatabaseEnv;
use aura_primitives::{crypto::address_of, Address, Header, SealedHeader, B256};
use aura_state::{init_genesis, ChainWriter};
use std::{collections::BTreeMap, sync::Arc};

const EPOCH: u64 = 8;

fn secrets() -> Vec<B256> {
    vec![B256::new([0x11; 32]), B256::new([0x22; 32]), B256::new([0x33; 32])]
}

fn signer_addresses() -> Vec<Address> {
    secrets().iter().map(|secret| address_of(*secret).unwrap()).collect()
}

fn secret_of(address: Address) -> Option<B256> {
    secrets().into_iter().find(|secret| address_of(*secret).unwrap() == address)
}

fn test_spec() -> Arc<ChainSpec> {
    let genesis = alloy_genesis::Genesis::default()
        .with_gas_limit(30_000_000)
        .with_timestamp(1_700_000_000)
        .with_extra_data(aura_chainspec::seal_extra_data(signer_addresses()));

    let mut hardforks = BTreeMap::new();
    for fork in [
        Hardfork::Homestead,
        Hardfork::SpuriousDragon,
        Hardfork::Byzantium,
        Hardfork::Istanbul,
        Hardfork::Berlin,
        Hardfork::London,
    ] {
        hardforks.insert(fork, ForkCondition::Block(0));
    }

    Arc::new(ChainSpec {
        chain: AuraChain::Private,
        chain_id: 1337,
        genesis,
        poa: PoaConfig { kind: ConsensusKind::Apoa, period: 0, epoch: EPOCH },
        hardforks,
    })
}

struct TestChain {
    env: Arc<DatabaseEnv>,
    spec: Arc<ChainSpec>,
    tip: SealedHeader,
    _dir: tempfile::TempDir,
}

impl TestChain {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let env = Arc::new(DatabaseEnv::open(dir.path(), aura_db::EnvKind::RW).unwrap());
        let spec = test_spec();
        let tip = init_genesis(&env, &spec).unwrap();
        Self { env, spec, tip, _dir: dir }
    }

    fn engine(&self) -> Apoa {
        Apoa::new(self.spec.clone(), self.env.clone())
    }

    fn write(&mut self, sealed: &SealedHeader) {
        let tx = self.env.tx_mut().unwrap();
        let writer = ChainWriter::new(&tx);
        writer.write_header(sealed).unwrap();
        writer.write_canonical_hash(sealed.number(), sealed.hash()).unwrap();
        writer.set_head_header(sealed.hash()).unwrap();
        tx.commit().unwrap();
        self.tip = sealed.clone();
    }

    /// Prepares the next header for `signer` without sealing it yet.
    fn prepare(&self, engine: &Apoa, signer: Address) -> Header {
        engine.authorize(signer, secret_of(signer).expect("local signer key"));
        let mut header = Header::default();
        engine.prepare(&self.tip, &mut header).unwrap();
        header.gas_limit = self.tip.gas_limit;
        header.base_fee_per_gas = self.spec.next_block_base_fee(&self.tip);
        header
    }

    /// Seals the next block with `signer` directly (no wiggle sleeping)
    /// and appends it to the chain.
    fn produce(&mut self, engine: &Apoa, signer: Address) -> SealedHeader {
        let mut header = self.prepare(engine, signer);
        seal_header(&mut header, secret_of(signer).unwrap()).unwrap();
        let sealed = SealedHeader::seal_slow(header);
        self.write(&sealed);
        sealed
    }

    /// The in-turn signer for the next block.
    fn inturn_signer(&self, engine: &Apoa) -> Address {
        let snap = engine.snapshot_at(self.tip.number(), self.tip.hash()).unwrap();
        let signers = snap.signers_sorted();
        signers[((self.tip.number() + 1) % signers.len() as u64) as usize]
    }

    /// A signer whose key is local and who will be outside the recency
    /// window once the next block slides it.
    fn producible_signer(&self, engine: &Apoa) -> Address {
        let snap = engine.snapshot_at(self.tip.number(), self.tip.hash()).unwrap();
        let window = snap.recency_window();
        let next = self.tip.number() + 1;
        let blocked = |address: Address| {
            snap.recents
                .iter()
                .any(|(number, recent)| *recent == address && number + window > next)
        };
        let inturn = self.inturn_signer(engine);
        if secret_of(inturn).is_some() && !blocked(inturn) {
            return inturn;
        }
        signer_addresses()
            .into_iter()
            .find(|address| !blocked(*address))
            .expect("some original signer is eligible")
    }
}

#[test]
fn inturn_blocks_carry_difficulty_two_and_verify() {
    let mut chain = TestChain::new();
    let engine = chain.engine();

    for _ in 0..3 {
        let parent = chain.tip.clone();
        let signer = chain.inturn_signer(&engine);
        let sealed = chain.produce(&engine, signer);

        assert_eq!(sealed.difficulty, DIFF_INTURN);
        assert_eq!(engine.recover_proposer(&sealed).unwrap(), signer);

        // a fresh engine (cold caches) reaches the same verdict
        let verifier = chain.engine();
        verifier.verify_header(&sealed, &parent).unwrap();
    }
}

#[test]
fn engine_seal_waits_out_the_slot_and_signs() {
    let mut chain = TestChain::new();
    let engine = chain.engine();

    let signer = chain.inturn_signer(&engine);
    let header = chain.prepare(&engine, signer);

    // in-turn sealing has no wiggle, and period 0 means no slot wait
    let (_stop_tx, stop_rx) = std::sync::mpsc::channel();
    let sealed = engine.seal(header, &stop_rx).unwrap().expect("in-turn slot seals");
    let parent = chain.tip.clone();
    chain.write(&sealed);
    chain.engine().verify_header(&sealed, &parent).unwrap();
    assert!(engine.is_active_signer(&chain.tip));
}

#[test]
fn noturn_signer_seals_with_difficulty_one() {
    let mut chain = TestChain::new();
    let engine = chain.engine();

    let inturn = chain.inturn_signer(&engine);
    let noturn = signer_addresses().into_iter().find(|address| *address != inturn).unwrap();

    let sealed = chain.produce(&engine, noturn);
    assert_eq!(sealed.difficulty, DIFF_NOTURN);

    let parent_hash = sealed.parent_hash;
    let tx = chain.env.tx().unwrap();
    let parent = aura_state::ChainReader::new(&tx)
        .header_by_hash(parent_hash)
        .unwrap()
        .unwrap();
    drop(tx);
    chain.engine().verify_header(&sealed, &parent).unwrap();

    // claiming in-turn difficulty from the wrong slot is rejected
    let mut wrong = (*sealed).clone();
    wrong.difficulty = DIFF_INTURN;
    seal_header(&mut wrong, secret_of(noturn).unwrap()).unwrap();
    let wrong = SealedHeader::seal_slow(wrong);
    chain.write(&wrong);
    assert_eq!(
        chain.engine().verify_header(&wrong, &parent).unwrap_err(),
        ApoaError::WrongDifficulty
    );
}

#[test]
fn recent_signer_cannot_seal_again() {
    let mut chain = TestChain::new();
    let engine = chain.engine();

    let signer = chain.inturn_signer(&engine);
    chain.produce(&engine, signer);

    // same signer immediately again: inside the n/2+1 window
    let parent = chain.tip.clone();
    let mut header = chain.prepare(&engine, signer);
    header.difficulty =
        if chain.inturn_signer(&engine) == signer { DIFF_INTURN } else { DIFF_NOTURN };
    seal_header(&mut header, secret_of(signer).unwrap()).unwrap();
    let sealed = SealedHeader::seal_slow(header);
    chain.write(&sealed);

    assert_eq!(
        chain.engine().verify_header(&sealed, &parent).unwrap_err(),
        ApoaError::RecentlySigned(signer)
    );
}

#[test]
fn unauthorized_signer_is_rejected() {
    let mut chain = TestChain::new();
    let engine = chain.engine();

    let outsider = B256::new([0x99; 32]);
    let parent = chain.tip.clone();
    let authorized = chain.inturn_signer(&engine);
    let mut header = chain.prepare(&engine, authorized);
    header.difficulty = DIFF_NOTURN;
    seal_header(&mut header, outsider).unwrap();
    let sealed = SealedHeader::seal_slow(header);
    chain.write(&sealed);

    assert_eq!(
        chain.engine().verify_header(&sealed, &parent).unwrap_err(),
        ApoaError::UnauthorizedSigner(address_of(outsider).unwrap())
    );
}

#[test]
fn two_votes_admit_a_fourth_signer_and_checkpoint_lists_it() {
    let mut chain = TestChain::new();
    let engine = chain.engine();
    let candidate = Address::new([0xca; 20]);

    // two distinct signers vote while sealing their turns
    engine.propose(candidate, true);
    let mut voters: Vec<Address> = Vec::new();
    while voters.len() < 2 {
        let signer = chain.producible_signer(&engine);
        let sealed = chain.produce(&engine, signer);
        if sealed.beneficiary == candidate && !voters.contains(&signer) {
            voters.push(signer);
        }
        assert!(chain.tip.number() < EPOCH, "votes must land before the checkpoint");
    }

    let snap = engine.snapshot_at(chain.tip.number(), chain.tip.hash()).unwrap();
    assert_eq!(snap.signers.len(), 4, "two of three votes admit the candidate");
    assert!(snap.signers.contains(&candidate));

    // roll forward to the checkpoint; its extra-data must list the new set
    while chain.tip.number() < EPOCH {
        let signer = chain.producible_signer(&engine);
        chain.produce(&engine, signer);
    }
    let checkpoint = chain.tip.clone();
    assert_eq!(checkpoint.number() % EPOCH, 0);
    assert_eq!(checkpoint.nonce, NONCE_DROP);

    let mut expected = Vec::new();
    for signer in snap.signers_sorted() {
        expected.extend_from_slice(signer.as_slice());
    }
    let extra = &checkpoint.extra_data;
    assert_eq!(&extra[32..extra.len() - 65], expected.as_slice());
}
