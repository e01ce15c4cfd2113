//! Block-level execution: replays every transaction over the intra-block
//! state and assembles receipts.

use crate::{
    error::BlockExecutionError,
    host::BlockHashProvider,
    message::{apply_transaction, ApplyError},
};
use aura_chainspec::ChainSpec;
use aura_primitives::{
    calculate_receipt_root, BlockWithSenders, Bloom, Receipt, TxType,
};
use aura_state::IntraBlockState;
use metrics::counter;
use tracing::debug;

/// What executing a block produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// One receipt per transaction, in order.
    pub receipts: Vec<Receipt>,
    /// Total gas consumed.
    pub gas_used: u64,
}

/// Replays blocks deterministically over an [`IntraBlockState`].
#[derive(Debug, Clone, Copy)]
pub struct BlockExecutor<'s> {
    chain_spec: &'s ChainSpec,
}

impl<'s> BlockExecutor<'s> {
    /// Executor for the given chain.
    pub const fn new(chain_spec: &'s ChainSpec) -> Self {
        Self { chain_spec }
    }

    /// Executes all transactions of `block`. The caller commits the state
    /// afterwards (or drops it, for simulations).
    pub fn execute_block(
        &self,
        block: &BlockWithSenders,
        state: &mut IntraBlockState<'_>,
        block_hashes: &dyn BlockHashProvider,
    ) -> Result<ExecutionOutcome, BlockExecutionError> {
        let header = &block.block.header;
        let transactions = &block.block.body.transactions;
        if transactions.len() != block.senders.len() {
            return Err(BlockExecutionError::SenderRecovery);
        }

        let delete_empty = self.chain_spec.is_spurious_dragon_active_at_block(header.number);
        let mut cumulative_gas_used = 0u64;
        let mut receipts = Vec::with_capacity(transactions.len());

        for (index, (tx, sender)) in transactions.iter().zip(&block.senders).enumerate() {
            let available = header.gas_limit - cumulative_gas_used;
            if tx.gas_limit() > available {
                return Err(BlockExecutionError::InvalidTransaction {
                    index,
                    error: crate::error::InvalidTransaction::ExceedsBlockGasLimit {
                        tx_gas_limit: tx.gas_limit(),
                        available,
                    },
                });
            }

            let result = apply_transaction(
                self.chain_spec,
                header,
                state,
                block_hashes,
                tx,
                *sender,
                None,
                None,
            )
            .map_err(|err| match err {
                ApplyError::Invalid(error) => {
                    BlockExecutionError::InvalidTransaction { index, error }
                }
                ApplyError::Execution(error) => error,
            })?;

            state.finalize(delete_empty);

            cumulative_gas_used += result.gas_used;
            receipts.push(Receipt {
                tx_type: tx.tx_type(),
                success: result.success,
                cumulative_gas_used,
                logs: result.logs,
            });
        }

        // consensus-layer withdrawals credit balances after all transactions
        if let Some(withdrawals) = &block.block.body.withdrawals {
            for withdrawal in withdrawals {
                state
                    .add_balance(
                        withdrawal.address,
                        aura_primitives::U256::from(withdrawal.amount) *
                            aura_primitives::U256::from(
                                aura_primitives::constants::GWEI_TO_WEI,
                            ),
                    )
                    .map_err(BlockExecutionError::State)?;
            }
            state.finalize(delete_empty);
        }

        counter!("evm.blocks_executed").increment(1);
        debug!(
            target: "evm",
            number = header.number,
            txs = transactions.len(),
            gas_used = cumulative_gas_used,
            "block executed"
        );

        Ok(ExecutionOutcome { receipts, gas_used: cumulative_gas_used })
    }

    /// Executes the block and checks gas usage, receipts root and bloom
    /// against the header.
    pub fn execute_and_verify(
        &self,
        block: &BlockWithSenders,
        state: &mut IntraBlockState<'_>,
        block_hashes: &dyn BlockHashProvider,
    ) -> Result<ExecutionOutcome, BlockExecutionError> {
        let outcome = self.execute_block(block, state, block_hashes)?;
        let header = &block.block.header;

        if outcome.gas_used != header.gas_used {
            return Err(BlockExecutionError::GasUsedMismatch {
                got: outcome.gas_used,
                expected: header.gas_used,
            });
        }

        if self.chain_spec.is_byzantium_active_at_block(header.number) {
            let receipts_root = calculate_receipt_root(&outcome.receipts);
            if receipts_root != header.receipts_root {
                return Err(BlockExecutionError::ReceiptRootMismatch {
                    got: receipts_root,
                    expected: header.receipts_root,
                });
            }
            let bloom = outcome
                .receipts
                .iter()
                .fold(Bloom::ZERO, |bloom, receipt| bloom | receipt.bloom_slow());
            if bloom != header.logs_bloom {
                return Err(BlockExecutionError::BloomMismatch);
            }
        }

        Ok(outcome)
    }
}

/// Receipt consistency required of any assembled block: one receipt per
/// transaction with non-decreasing cumulative gas.
pub fn check_receipt_invariants(receipts: &[Receipt], tx_types: &[TxType]) -> bool {
    receipts.len() == tx_types.len() &&
        receipts.windows(2).all(|w| w[0].cumulative_gas_used <= w[1].cumulative_gas_used) &&
        receipts.iter().zip(tx_types).all(|(receipt, tx_type)| receipt.tx_type == *tx_type)
}
