use alloy_primitives::Bytes;
use aura_evm::{ApplyError, BlockExecutionError, InvalidTransaction};
use aura_txpool::PoolError;

/// JSON-RPC error code for invalid params.
pub const INVALID_PARAMS_CODE: i64 = -32602;
/// JSON-RPC error code for execution failures and reverts.
pub const EXECUTION_ERROR_CODE: i64 = -32000;
/// JSON-RPC error code for a block that is not available.
pub const BLOCK_NOT_AVAILABLE_CODE: i64 = -32004;
/// JSON-RPC internal error code.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Failure of an `eth_`/`debug_` method, carrying its JSON-RPC mapping.
#[derive(Debug, thiserror::Error)]
pub enum EthApiError {
    /// The requested block does not exist locally.
    #[error("requested block not available")]
    UnknownBlock,

    /// Header exists but its body/receipts do not.
    #[error("block data not available")]
    BlockDataMissing,

    /// The request is malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Execution reverted; `data` is the raw revert payload.
    #[error("execution reverted{}", revert_suffix(.0))]
    Reverted(Bytes),

    /// Execution failed without revert data.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A transaction preflight failed.
    #[error("{0}")]
    InvalidTransaction(#[from] InvalidTransaction),

    /// The simulation hit its deadline.
    #[error("execution timed out")]
    Timeout,

    /// Gas estimation could not find a passing limit.
    #[error("gas required exceeds allowance ({0})")]
    GasCapExceeded(u64),

    /// Pool rejected the submitted transaction.
    #[error("{0}")]
    Pool(#[from] PoolError),

    /// Store failure.
    #[error(transparent)]
    Database(#[from] aura_db::DatabaseError),

    /// State failure.
    #[error(transparent)]
    State(#[from] aura_state::StateError),

    /// Consensus failure.
    #[error(transparent)]
    Consensus(#[from] aura_consensus::ApoaError),
}

fn revert_suffix(data: &Bytes) -> String {
    match alloy_sol_types::decode_revert_reason(data) {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

impl EthApiError {
    /// The JSON-RPC error code this failure maps to.
    pub const fn code(&self) -> i64 {
        match self {
            Self::UnknownBlock | Self::BlockDataMissing => BLOCK_NOT_AVAILABLE_CODE,
            Self::InvalidParams(_) => INVALID_PARAMS_CODE,
            Self::Reverted(_) |
            Self::Execution(_) |
            Self::InvalidTransaction(_) |
            Self::Timeout |
            Self::GasCapExceeded(_) |
            Self::Pool(_) => EXECUTION_ERROR_CODE,
            Self::Database(_) | Self::State(_) | Self::Consensus(_) => INTERNAL_ERROR_CODE,
        }
    }

    /// The `data` field of the JSON-RPC error, the raw revert payload.
    pub fn rpc_data(&self) -> Option<&Bytes> {
        match self {
            Self::Reverted(data) => Some(data),
            _ => None,
        }
    }
}

impl From<ApplyError> for EthApiError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Invalid(invalid) => Self::InvalidTransaction(invalid),
            ApplyError::Execution(BlockExecutionError::Timeout) => Self::Timeout,
            ApplyError::Execution(err) => Self::Execution(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;

    #[test]
    fn revert_reason_is_abi_decoded() {
        // Error(string) selector + "nope"
        let data = hex::decode(concat!(
            "08c379a0",
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000004",
            "6e6f706500000000000000000000000000000000000000000000000000000000",
        ))
        .unwrap();
        let err = EthApiError::Reverted(data.into());
        assert_eq!(err.code(), EXECUTION_ERROR_CODE);
        assert!(err.to_string().contains("nope"), "got: {err}");
    }

    #[test]
    fn codes_follow_the_boundary_mapping() {
        assert_eq!(EthApiError::UnknownBlock.code(), -32004);
        assert_eq!(EthApiError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(EthApiError::Reverted(Bytes::new()).code(), -32000);
    }
}
