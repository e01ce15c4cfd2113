//! Authorization snapshots: the signer set, the recency window and the
//! pending vote tally at a given block.

use crate::{
    constants::{NONCE_AUTH, NONCE_DROP},
    error::ApoaError,
};
use aura_primitives::{Address, BlockNumber, B256, B64};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A single pending vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Authorized signer that cast the vote.
    pub signer: Address,
    /// Block the vote was cast in.
    pub block_number: BlockNumber,
    /// Account being voted on.
    pub candidate: Address,
    /// Whether to authorize or drop the candidate.
    pub authorize: bool,
}

/// Running vote count for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Direction of the pending votes.
    pub authorize: bool,
    /// Number of votes so far.
    pub votes: u64,
}

/// The authorization state at a specific block, derived from the nearest
/// checkpoint plus intervening headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Block this snapshot describes.
    pub block_number: BlockNumber,
    /// Hash of that block.
    pub block_hash: B256,
    /// Authorized signers; iteration order is ascending.
    pub signers: BTreeSet<Address>,
    /// Recent proposers, by block number, enforcing the
    /// `len(signers)/2 + 1` recency window.
    pub recents: BTreeMap<BlockNumber, Address>,
    /// Chronological list of pending votes.
    pub votes: Vec<Vote>,
    /// Current tally per candidate, to avoid recounting.
    pub tally: HashMap<Address, Tally>,
}

impl Snapshot {
    /// Fresh snapshot at a trusted checkpoint.
    pub fn new(signers: Vec<Address>, block_number: BlockNumber, block_hash: B256) -> Self {
        Self {
            block_number,
            block_hash,
            signers: signers.into_iter().collect(),
            recents: BTreeMap::new(),
            votes: Vec::new(),
            tally: HashMap::new(),
        }
    }

    /// The signer set in ascending order.
    pub fn signers_sorted(&self) -> Vec<Address> {
        self.signers.iter().copied().collect()
    }

    /// Size of the recency window.
    pub fn recency_window(&self) -> u64 {
        self.signers.len() as u64 / 2 + 1
    }

    /// Whether `signer` is the designated proposer at `block_number`.
    pub fn is_inturn(&self, block_number: BlockNumber, signer: Address) -> bool {
        let signers = self.signers_sorted();
        if signers.is_empty() {
            return false;
        }
        signers[(block_number % signers.len() as u64) as usize] == signer
    }

    /// Whether `signer` sealed within the recency window ending at the
    /// snapshot block.
    pub fn signed_recently(&self, signer: Address) -> bool {
        self.recents.values().any(|recent| *recent == signer)
    }

    fn is_valid_vote(&self, candidate: Address, authorize: bool) -> bool {
        let is_signer = self.signers.contains(&candidate);
        (authorize && !is_signer) || (!authorize && is_signer)
    }

    fn cast(&mut self, signer: Address, block_number: BlockNumber, candidate: Address, authorize: bool) -> bool {
        if !self.is_valid_vote(candidate, authorize) {
            return false;
        }
        self.votes.push(Vote { signer, block_number, candidate, authorize });
        let tally = self.tally.entry(candidate).or_insert(Tally { authorize, votes: 0 });
        tally.votes += 1;
        true
    }

    fn uncast(&mut self, signer: Address, candidate: Address) {
        let Some(position) = self
            .votes
            .iter()
            .position(|vote| vote.signer == signer && vote.candidate == candidate)
        else {
            return;
        };
        self.votes.remove(position);
        if let Some(tally) = self.tally.get_mut(&candidate) {
            tally.votes -= 1;
            if tally.votes == 0 {
                self.tally.remove(&candidate);
            }
        }
    }

    /// Applies the next header: enforces authorization and recency,
    /// registers the vote it carries and applies strict-majority outcomes.
    /// Epoch boundaries reset all pending votes.
    pub fn apply(
        &self,
        epoch: u64,
        block_number: BlockNumber,
        block_hash: B256,
        signer: Address,
        vote: Option<(Address, B64)>,
    ) -> Result<Self, ApoaError> {
        if self.block_number + 1 != block_number {
            return Err(ApoaError::SnapshotGap(block_number));
        }

        let mut snap = self.clone();
        snap.block_number = block_number;
        snap.block_hash = block_hash;

        // votes do not survive an epoch boundary
        if block_number % epoch == 0 {
            snap.votes.clear();
            snap.tally.clear();
        }

        // slide the recency window
        let window = snap.recency_window();
        if block_number >= window {
            snap.recents.remove(&(block_number - window));
        }

        if !snap.signers.contains(&signer) {
            return Err(ApoaError::UnauthorizedSigner(signer));
        }
        if snap.signed_recently(signer) {
            return Err(ApoaError::RecentlySigned(signer));
        }
        snap.recents.insert(block_number, signer);

        if let Some((candidate, nonce)) = vote {
            let authorize = if nonce == NONCE_AUTH {
                true
            } else if nonce == NONCE_DROP {
                false
            } else {
                return Err(ApoaError::InvalidVote);
            };

            // a signer may only have one live vote per candidate
            snap.uncast(signer, candidate);
            snap.cast(signer, block_number, candidate, authorize);

            // strict majority applies the change immediately
            let majority = snap.signers.len() as u64 / 2;
            if let Some(tally) = snap.tally.get(&candidate).copied() {
                if tally.votes > majority {
                    if tally.authorize {
                        snap.signers.insert(candidate);
                    } else {
                        snap.signers.remove(&candidate);

                        // the window may have shrunk; trim the oldest entries
                        let window = snap.recency_window();
                        while snap.recents.len() as u64 > window.saturating_sub(1) {
                            let Some((&oldest, _)) = snap.recents.iter().next() else { break };
                            if oldest + window > block_number {
                                break;
                            }
                            snap.recents.remove(&oldest);
                        }

                        // votes cast by the dropped signer die with it
                        let dropped: Vec<_> = snap
                            .votes
                            .iter()
                            .filter(|vote| vote.signer == candidate)
                            .map(|vote| (vote.signer, vote.candidate))
                            .collect();
                        for (signer, candidate) in dropped {
                            snap.uncast(signer, candidate);
                        }
                    }
                    // all votes about the candidate are settled
                    snap.votes.retain(|vote| vote.candidate != candidate);
                    snap.tally.remove(&candidate);
                }
            }
        }

        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn three_signer_snapshot() -> Snapshot {
        Snapshot::new(vec![addr(1), addr(2), addr(3)], 0, B256::ZERO)
    }

    const EPOCH: u64 = 30_000;

    #[test]
    fn two_of_three_votes_admit_a_candidate() {
        let snap = three_signer_snapshot();
        let candidate = addr(9);

        let snap = snap
            .apply(EPOCH, 1, B256::with_last_byte(1), addr(1), Some((candidate, NONCE_AUTH)))
            .unwrap();
        assert_eq!(snap.signers.len(), 3, "one vote is not a majority of three");
        assert_eq!(snap.tally.get(&candidate).unwrap().votes, 1);

        let snap = snap
            .apply(EPOCH, 2, B256::with_last_byte(2), addr(2), Some((candidate, NONCE_AUTH)))
            .unwrap();
        assert_eq!(snap.signers.len(), 4, "two of three is a strict majority");
        assert!(snap.signers.contains(&candidate));
        assert!(snap.tally.is_empty(), "settled candidate leaves no tally");

        // checkpoint extra-data is the sorted signer list
        let sorted = snap.signers_sorted();
        let mut expected = vec![addr(1), addr(2), addr(3), candidate];
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn drop_votes_remove_a_signer() {
        let snap = three_signer_snapshot();
        let victim = addr(3);

        let snap = snap
            .apply(EPOCH, 1, B256::with_last_byte(1), addr(1), Some((victim, NONCE_DROP)))
            .unwrap();
        let snap = snap
            .apply(EPOCH, 2, B256::with_last_byte(2), addr(2), Some((victim, NONCE_DROP)))
            .unwrap();
        assert!(!snap.signers.contains(&victim));
        assert_eq!(snap.signers.len(), 2);
    }

    #[test]
    fn recency_window_rejects_back_to_back_seals() {
        let snap = three_signer_snapshot();
        let snap = snap.apply(EPOCH, 1, B256::with_last_byte(1), addr(1), None).unwrap();
        // window of 3 signers is 2; the same signer cannot seal block 2
        let err = snap.apply(EPOCH, 2, B256::with_last_byte(2), addr(1), None).unwrap_err();
        assert_eq!(err, ApoaError::RecentlySigned(addr(1)));
        // a different signer may
        snap.apply(EPOCH, 2, B256::with_last_byte(2), addr(2), None).unwrap();
    }

    #[test]
    fn epoch_boundary_clears_pending_votes() {
        let snap = Snapshot::new(vec![addr(1), addr(2), addr(3)], 99, B256::ZERO);
        let snap = snap
            .apply(100, 100, B256::with_last_byte(1), addr(1), Some((addr(9), NONCE_AUTH)))
            .unwrap();
        // the epoch boundary cleared votes before the new one was cast;
        // after the boundary block the fresh vote is the only one pending
        assert_eq!(snap.votes.len(), 1);

        let snap = snap.apply(100, 101, B256::with_last_byte(2), addr(2), None).unwrap();
        assert_eq!(snap.votes.len(), 1);

        // crossing the next boundary clears everything
        let mut at_boundary = snap.clone();
        at_boundary.block_number = 199;
        at_boundary.recents.clear();
        let cleared =
            at_boundary.apply(100, 200, B256::with_last_byte(3), addr(3), None).unwrap();
        assert!(cleared.votes.is_empty());
        assert!(cleared.tally.is_empty());
    }

    #[test]
    fn duplicate_votes_do_not_double_count() {
        let snap = three_signer_snapshot();
        let candidate = addr(9);
        let snap = snap
            .apply(EPOCH, 1, B256::with_last_byte(1), addr(1), Some((candidate, NONCE_AUTH)))
            .unwrap();
        let snap = snap.apply(EPOCH, 2, B256::with_last_byte(2), addr(2), None).unwrap();
        // the same signer votes again: old vote is uncast first
        let snap = snap
            .apply(EPOCH, 3, B256::with_last_byte(3), addr(1), Some((candidate, NONCE_AUTH)))
            .unwrap();
        assert_eq!(snap.tally.get(&candidate).unwrap().votes, 1);
        assert_eq!(snap.signers.len(), 3);
    }

    #[test]
    fn inturn_follows_sorted_order() {
        let snap = three_signer_snapshot();
        assert!(snap.is_inturn(0, addr(1)));
        assert!(snap.is_inturn(1, addr(2)));
        assert!(snap.is_inturn(2, addr(3)));
        assert!(snap.is_inturn(3, addr(1)));
        assert!(!snap.is_inturn(0, addr(2)));
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let snap = three_signer_snapshot()
            .apply(EPOCH, 1, B256::with_last_byte(1), addr(1), Some((addr(9), NONCE_AUTH)))
            .unwrap();
        let json = serde_json::to_vec(&snap).unwrap();
        let decoded: Snapshot = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, snap);
    }
}
