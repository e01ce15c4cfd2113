use aura_primitives::{Address, BlockNumber, B256};

/// APOA consensus error.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ApoaError {
    /// A referenced block is not known locally.
    #[error("unknown block {0}")]
    UnknownBlock(B256),

    /// Genesis cannot be verified as a non-genesis block.
    #[error("genesis block is not verifiable")]
    GenesisUnverifiable,

    /// The header timestamp lies in the future.
    #[error("block {block_number} is from the future")]
    FutureBlock {
        /// Offending block height.
        block_number: BlockNumber,
    },

    /// The timestamp violates the configured period.
    #[error("invalid timestamp: {timestamp} before parent {parent_timestamp} + period {period}")]
    InvalidTimestamp {
        /// Header timestamp.
        timestamp: u64,
        /// Parent timestamp.
        parent_timestamp: u64,
        /// Configured minimum seconds between blocks.
        period: u64,
    },

    /// Difficulty is neither 1 nor 2.
    #[error("invalid difficulty")]
    InvalidDifficulty,

    /// Difficulty does not match the signer's turn.
    #[error("wrong difficulty for turn")]
    WrongDifficulty,

    /// The nonce is not one of the two vote markers, or votes at a
    /// checkpoint.
    #[error("invalid vote marker")]
    InvalidVote,

    /// The checkpoint signer list does not match the snapshot.
    #[error("checkpoint signer list mismatch")]
    InvalidCheckpointSigners,

    /// A non-checkpoint header carries signer bytes.
    #[error("non-checkpoint header carries extra signers")]
    ExtraSigners,

    /// The extra-data is shorter than the 32-byte vanity.
    #[error("missing extra-data vanity")]
    MissingVanity,

    /// The extra-data is shorter than vanity plus 65-byte seal.
    #[error("missing extra-data signature")]
    MissingSignature,

    /// The recovered signer is not in the authorized set.
    #[error("unauthorized signer {0}")]
    UnauthorizedSigner(Address),

    /// The signer produced a block within the recency window.
    #[error("signer {0} signed recently")]
    RecentlySigned(Address),

    /// The mix digest is not what the engine variant allows.
    #[error("invalid mix digest")]
    InvalidMixDigest,

    /// The gas limit is out of bounds or moved too fast.
    #[error("invalid gas limit {gas_limit}")]
    InvalidGasLimit {
        /// Declared gas limit.
        gas_limit: u64,
    },

    /// Gas used exceeds the gas limit.
    #[error("gas used {gas_used} above limit {gas_limit}")]
    InvalidGasUsed {
        /// Declared gas used.
        gas_used: u64,
        /// Declared gas limit.
        gas_limit: u64,
    },

    /// The base fee does not follow from the parent.
    #[error("invalid base fee")]
    InvalidBaseFee,

    /// The block has ommers, which PoA forbids.
    #[error("non-empty ommers hash")]
    NonEmptyOmmers,

    /// Signature recovery failed.
    #[error("signature recovery failed")]
    RecoveryFailed,

    /// Sealing was requested without an authorized local signer.
    #[error("no authorized local signer")]
    NoLocalSigner,

    /// A snapshot could not be applied onto its successor header.
    #[error("snapshot discontinuity at block {0}")]
    SnapshotGap(BlockNumber),

    /// Underlying store failure.
    #[error(transparent)]
    State(#[from] aura_state::StateError),

    /// Underlying database failure.
    #[error(transparent)]
    Database(#[from] aura_db::DatabaseError),

    /// A persisted snapshot failed to decode.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}
