//! Fee queries: `eth_gasPrice`, `eth_maxPriorityFeePerGas`,
//! `eth_feeHistory`.

use crate::{error::EthApiError, eth::EthApi, types::RpcFeeHistory};
use alloy_eips::eip4844::calc_blob_gasprice;
use alloy_rpc_types_eth::BlockNumberOrTag;
use aura_primitives::constants::{GAS_PER_BLOB, GWEI_TO_WEI};
use aura_state::ChainReader;

/// Limit on the `eth_feeHistory` window.
const MAX_FEE_HISTORY_BLOCKS: u64 = 1024;
/// Blocks sampled for tip suggestions.
const TIP_SAMPLE_BLOCKS: u64 = 20;
/// Fallback tip when the chain is idle.
const DEFAULT_TIP: u128 = GWEI_TO_WEI as u128;

impl EthApi {
    /// `eth_maxPriorityFeePerGas`: the median tip over recent blocks.
    pub fn max_priority_fee_per_gas(&self) -> Result<u128, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;

        let mut tips = Vec::new();
        let from = head.number().saturating_sub(TIP_SAMPLE_BLOCKS);
        for number in from..=head.number() {
            let Some(hash) = chain.canonical_hash(number)? else { continue };
            let Some(header) = chain.header(number, hash)? else { continue };
            let Some(body) = chain.body(number, hash)? else { continue };
            for transaction in &body.transactions {
                if let Some(tip) = transaction.effective_tip_per_gas(header.base_fee_per_gas) {
                    if tip > 0 {
                        tips.push(tip);
                    }
                }
            }
        }

        if tips.is_empty() {
            return Ok(DEFAULT_TIP);
        }
        tips.sort_unstable();
        Ok(tips[tips.len() / 2])
    }

    /// `eth_gasPrice`: next base fee plus the suggested tip.
    pub fn gas_price(&self) -> Result<u128, EthApiError> {
        let tip = self.max_priority_fee_per_gas()?;
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let base_fee = self.chain_spec.next_block_base_fee(&head).unwrap_or_default();
        Ok(base_fee as u128 + tip)
    }

    /// `eth_feeHistory`.
    pub fn fee_history(
        &self,
        block_count: u64,
        newest: BlockNumberOrTag,
        reward_percentiles: Option<Vec<f64>>,
    ) -> Result<RpcFeeHistory, EthApiError> {
        if block_count == 0 {
            return Ok(RpcFeeHistory::default());
        }
        if let Some(percentiles) = &reward_percentiles {
            let monotonic = percentiles.windows(2).all(|w| w[0] <= w[1]);
            if !monotonic || percentiles.iter().any(|p| !(0.0..=100.0).contains(p)) {
                return Err(EthApiError::InvalidParams("invalid reward percentiles".into()));
            }
        }

        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let newest = self.resolve_tag(&chain, &head, newest)?.number;
        let count = block_count.min(MAX_FEE_HISTORY_BLOCKS).min(newest + 1);
        let oldest = newest + 1 - count;

        let mut history = RpcFeeHistory {
            oldest_block: oldest,
            reward: reward_percentiles.as_ref().map(|_| Vec::new()),
            ..Default::default()
        };

        let mut last_header = None;
        for number in oldest..=newest {
            let hash = chain.canonical_hash(number)?.ok_or(EthApiError::UnknownBlock)?;
            let header = chain.header(number, hash)?.ok_or(EthApiError::UnknownBlock)?;

            history
                .base_fee_per_gas
                .push(header.base_fee_per_gas.unwrap_or_default() as u128);
            history
                .gas_used_ratio
                .push(header.gas_used as f64 / header.gas_limit.max(1) as f64);

            let excess = header.excess_blob_gas.unwrap_or_default();
            history.base_fee_per_blob_gas.push(calc_blob_gasprice(excess));
            let max_blob_gas = self
                .chain_spec
                .blob_params_at_timestamp(header.timestamp)
                .map(|params| params.max_blobs_per_block * GAS_PER_BLOB)
                .unwrap_or(1);
            history
                .blob_gas_used_ratio
                .push(header.blob_gas_used.unwrap_or_default() as f64 / max_blob_gas as f64);

            if let (Some(percentiles), Some(rewards)) =
                (reward_percentiles.as_ref(), history.reward.as_mut())
            {
                let body = chain.body(number, hash)?.ok_or(EthApiError::BlockDataMissing)?;
                rewards.push(block_rewards(
                    percentiles,
                    &body,
                    header.base_fee_per_gas,
                    header.gas_used,
                    chain.receipts(number)?.unwrap_or_default(),
                ));
            }

            last_header = Some(header);
        }

        // one extra entry: the fee of the block following the window
        if let Some(header) = last_header {
            history
                .base_fee_per_gas
                .push(self.chain_spec.next_block_base_fee(&header).unwrap_or_default() as u128);
            let next_excess = self
                .chain_spec
                .next_block_excess_blob_gas(&header, header.timestamp)
                .unwrap_or_default();
            history.base_fee_per_blob_gas.push(calc_blob_gasprice(next_excess));
        }

        Ok(history)
    }
}

/// Gas-weighted percentile tips of one block, geth's `feeHistory` shape.
fn block_rewards(
    percentiles: &[f64],
    body: &aura_primitives::BlockBody,
    base_fee: Option<u64>,
    block_gas_used: u64,
    receipts: Vec<aura_primitives::Receipt>,
) -> Vec<u128> {
    if body.transactions.is_empty() || block_gas_used == 0 {
        return vec![0; percentiles.len()];
    }

    let mut sorted: Vec<(u128, u64)> = body
        .transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| {
            let tip = tx.effective_tip_per_gas(base_fee).unwrap_or_default();
            let prev = if index == 0 { 0 } else { receipts[index - 1].cumulative_gas_used };
            let gas_used = receipts
                .get(index)
                .map(|receipt| receipt.cumulative_gas_used - prev)
                .unwrap_or_default();
            (tip, gas_used)
        })
        .collect();
    sorted.sort_unstable_by_key(|(tip, _)| *tip);

    percentiles
        .iter()
        .map(|percentile| {
            let threshold = (block_gas_used as f64 * percentile / 100.0) as u64;
            let mut cumulative = 0u64;
            for (tip, gas_used) in &sorted {
                cumulative += gas_used;
                if cumulative >= threshold {
                    return *tip;
                }
            }
            sorted.last().map(|(tip, _)| *tip).unwrap_or_default()
        })
        .collect()
}
