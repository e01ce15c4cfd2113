use aura_primitives::{Address, B256, U256};
use aura_state::StateError;

/// A transaction that cannot be applied at all. In block context these
/// invalidate the block; in pool/RPC context they surface to the caller.
/// EVM-level failures (out of gas, revert) are not errors: they consume
/// gas and land in the receipt status.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum InvalidTransaction {
    /// The transaction nonce does not match the account.
    #[error("nonce mismatch: tx {tx}, state {state}")]
    NonceMismatch {
        /// Nonce carried by the transaction.
        tx: u64,
        /// Nonce expected by the account.
        state: u64,
    },

    /// The supplied gas does not cover the intrinsic cost.
    #[error("intrinsic gas too low: have {have}, need {need}")]
    IntrinsicGasTooLow {
        /// Gas supplied.
        have: u64,
        /// Intrinsic cost of the transaction.
        need: u64,
    },

    /// The sender cannot cover `gas * price + value`.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Sender balance.
        have: U256,
        /// Required balance.
        need: U256,
    },

    /// The max fee is below the block base fee.
    #[error("max fee per gas {max_fee} below base fee {base_fee}")]
    FeeCapTooLow {
        /// Declared fee cap.
        max_fee: u128,
        /// Block base fee.
        base_fee: u64,
    },

    /// The priority fee exceeds the max fee.
    #[error("priority fee {priority_fee} exceeds max fee {max_fee}")]
    PriorityFeeAboveMax {
        /// Declared priority fee.
        priority_fee: u128,
        /// Declared fee cap.
        max_fee: u128,
    },

    /// EIP-3607: the sender has deployed code.
    #[error("sender {0} is not an EOA")]
    SenderNotEoa(Address),

    /// Replay protection does not match this chain.
    #[error("chain id mismatch: tx {tx}, chain {chain}")]
    ChainIdMismatch {
        /// Chain id in the transaction.
        tx: u64,
        /// Chain id of this chain.
        chain: u64,
    },

    /// The transaction does not fit into the remaining block gas.
    #[error("gas limit {tx_gas_limit} exceeds remaining block gas {available}")]
    ExceedsBlockGasLimit {
        /// Gas limit of the transaction.
        tx_gas_limit: u64,
        /// Gas left in the block.
        available: u64,
    },

    /// A blob transaction without blobs, or targeting no one.
    #[error("malformed blob transaction")]
    MalformedBlobTransaction,

    /// EIP-3860: the init code exceeds the hard cap.
    #[error("init code of {size} bytes exceeds the maximum")]
    InitCodeTooLarge {
        /// Size of the offending init code.
        size: usize,
    },

    /// The sender cannot cover the blob fee.
    #[error("max fee per blob gas {max_fee} below blob gas price {price}")]
    BlobFeeCapTooLow {
        /// Declared blob fee cap.
        max_fee: u128,
        /// Current blob gas price.
        price: u128,
    },

    /// A blob versioned hash is not of version 0x01.
    #[error("invalid blob versioned hash {0}")]
    InvalidBlobVersionedHash(B256),
}

/// Block-level validation failure during execution.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum BlockExecutionError {
    /// A transaction failed preflight checks.
    #[error("transaction {index} invalid: {error}")]
    InvalidTransaction {
        /// Index of the offending transaction.
        index: usize,
        /// What went wrong.
        error: InvalidTransaction,
    },

    /// The block's declared gas used does not match execution.
    #[error("block gas used mismatch: got {got}, expected {expected}")]
    GasUsedMismatch {
        /// Gas consumed by execution.
        got: u64,
        /// Gas declared in the header.
        expected: u64,
    },

    /// The computed receipts root does not match the header.
    #[error("receipts root mismatch: got {got}, expected {expected}")]
    ReceiptRootMismatch {
        /// Computed root.
        got: B256,
        /// Declared root.
        expected: B256,
    },

    /// The computed logs bloom does not match the header.
    #[error("logs bloom mismatch")]
    BloomMismatch,

    /// Sender list and transaction list disagree.
    #[error("sender recovery failed")]
    SenderRecovery,

    /// The simulation deadline expired between opcodes.
    #[error("execution timed out")]
    Timeout,

    /// Underlying state failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// Interpreter produced something this chain does not run.
    #[error("internal execution error: {0}")]
    Internal(String),
}
