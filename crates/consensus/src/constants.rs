use alloy_primitives::{B64, U256};

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY_LEN: usize = 32;
/// Fixed number of extra-data suffix bytes reserved for the signer seal.
pub const EXTRA_SEAL_LEN: usize = 65;
/// Length of one signer entry in a checkpoint extra-data.
pub const EXTRA_SIGNER_LEN: usize = 20;

/// Nonce marker of an authorization vote.
pub const NONCE_AUTH: B64 = B64::new([0xff; 8]);
/// Nonce marker of a drop vote.
pub const NONCE_DROP: B64 = B64::ZERO;

/// Difficulty of an in-turn block.
pub const DIFF_INTURN: U256 = U256::from_limbs([2u64, 0, 0, 0]);
/// Difficulty of a no-turn block.
pub const DIFF_NOTURN: U256 = U256::from_limbs([1u64, 0, 0, 0]);

/// Number of blocks after which a snapshot is persisted to the database.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Number of recent signatures kept in the in-memory recovery cache.
pub const RECOVERED_SIGNER_CACHE_SIZE: usize = 4096;
/// Number of snapshots kept in memory.
pub const SNAPSHOT_CACHE_SIZE: usize = 128;

/// Per-signer slice of the no-turn wiggle, milliseconds.
pub const WIGGLE_TIME_MS: u64 = 500;
