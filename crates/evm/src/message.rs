//! Single-transaction application: preflight checks, gas purchase, EVM
//! dispatch, refunds and fee credits.

use crate::{
    config::{fill_block_env, fill_cfg_env, fill_tx_env, spec_id_at_header},
    error::{BlockExecutionError, InvalidTransaction},
    frames::{execute_call_message, execute_create_message},
    host::{BlockHashProvider, EvmHost},
    tracer::StepTracer,
};
use alloy_eips::eip2930::AccessList;
use alloy_eips::eip4844::{calc_blob_gasprice, VERSIONED_HASH_VERSION_KZG};
use aura_chainspec::ChainSpec;
use aura_primitives::{
    constants::{
        INITCODE_WORD_GAS, MAX_INITCODE_SIZE, MAX_REFUND_QUOTIENT, TX_ACCESS_LIST_ADDRESS_GAS,
        TX_ACCESS_LIST_STORAGE_KEY_GAS, TX_BASE_GAS, TX_CREATE_GAS, TX_DATA_NON_ZERO_GAS,
        TX_DATA_ZERO_GAS,
    },
    Address, Bytes, Header, Log, TransactionSigned, U256,
};
use aura_state::{IntraBlockState, StateError};
use revm::{
    precompile::{PrecompileSpecId, Precompiles},
    primitives::{Env, SpecId, TxKind},
};
use std::time::Instant;
use tracing::trace;

/// Pre-London refund quotient.
const LEGACY_REFUND_QUOTIENT: u64 = 2;

/// Outcome of one applied transaction.
#[derive(Debug)]
pub struct MessageResult {
    /// Whether the EVM finished without an exceptional halt or revert.
    pub success: bool,
    /// Gas charged to the sender after refunds.
    pub gas_used: u64,
    /// Return data (or revert data).
    pub output: Bytes,
    /// Emitted logs; empty on failure.
    pub logs: Vec<Log>,
    /// Deployed contract address for successful creations.
    pub contract_address: Option<Address>,
    /// Gas handed back via the capped refund counter.
    pub gas_refunded: u64,
    /// Whether a failure was an explicit REVERT (carrying return data)
    /// rather than an exceptional halt.
    pub reverted: bool,
}

/// Failure of [`apply_transaction`].
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ApplyError {
    /// The transaction fails preflight and cannot be applied.
    #[error(transparent)]
    Invalid(#[from] InvalidTransaction),
    /// Execution infrastructure failed.
    #[error(transparent)]
    Execution(#[from] BlockExecutionError),
}

impl From<StateError> for ApplyError {
    fn from(err: StateError) -> Self {
        Self::Execution(BlockExecutionError::State(err))
    }
}

/// Intrinsic gas of a transaction: base cost, calldata bytes, creation
/// surcharge, access-list entries and (post-Shanghai) init-code words.
pub fn intrinsic_gas(
    input: &[u8],
    is_create: bool,
    access_list: Option<&AccessList>,
    is_shanghai: bool,
) -> u64 {
    let mut gas = TX_BASE_GAS;
    if is_create {
        gas += TX_CREATE_GAS;
    }

    let zero_bytes = input.iter().filter(|byte| **byte == 0).count() as u64;
    let nonzero_bytes = input.len() as u64 - zero_bytes;
    gas += zero_bytes * TX_DATA_ZERO_GAS;
    gas += nonzero_bytes * TX_DATA_NON_ZERO_GAS;

    if let Some(access_list) = access_list {
        for item in &access_list.0 {
            gas += TX_ACCESS_LIST_ADDRESS_GAS;
            gas += item.storage_keys.len() as u64 * TX_ACCESS_LIST_STORAGE_KEY_GAS;
        }
    }

    if is_create && is_shanghai {
        let words = (input.len() as u64 + 31) / 32;
        gas += words * INITCODE_WORD_GAS;
    }

    gas
}

/// Applies one transaction to `state`: nonce and fee preflight, gas
/// purchase, EVM dispatch, refund and fee credits. The sender is
/// recovered by the caller, which also invokes
/// [`IntraBlockState::finalize`] afterwards.
#[allow(clippy::too_many_arguments)]
pub fn apply_transaction(
    chain_spec: &ChainSpec,
    header: &Header,
    state: &mut IntraBlockState<'_>,
    block_hashes: &dyn BlockHashProvider,
    tx: &TransactionSigned,
    sender: Address,
    mut tracer: Option<&mut dyn StepTracer>,
    deadline: Option<Instant>,
) -> Result<MessageResult, ApplyError> {
    let base_fee = header.base_fee_per_gas;
    let spec_id = spec_id_at_header(chain_spec, header);

    // nonce and EOA-ness
    let sender_nonce = state.get_nonce(sender)?;
    if sender_nonce != tx.nonce() {
        return Err(InvalidTransaction::NonceMismatch { tx: tx.nonce(), state: sender_nonce }.into());
    }
    let sender_code_hash = state.get_code_hash(sender)?;
    if sender_code_hash != aura_primitives::constants::KECCAK_EMPTY &&
        sender_code_hash != aura_primitives::B256::ZERO
    {
        return Err(InvalidTransaction::SenderNotEoa(sender).into());
    }
    if let Some(chain_id) = tx.chain_id() {
        if chain_id != chain_spec.chain_id {
            return Err(
                InvalidTransaction::ChainIdMismatch { tx: chain_id, chain: chain_spec.chain_id }
                    .into(),
            );
        }
    }

    // fee caps
    if let Some(base_fee) = base_fee {
        if tx.max_fee_per_gas() < base_fee as u128 {
            return Err(
                InvalidTransaction::FeeCapTooLow { max_fee: tx.max_fee_per_gas(), base_fee }.into()
            );
        }
    }
    if let Some(priority_fee) = tx.max_priority_fee_per_gas() {
        if priority_fee > tx.max_fee_per_gas() {
            return Err(InvalidTransaction::PriorityFeeAboveMax {
                priority_fee,
                max_fee: tx.max_fee_per_gas(),
            }
            .into());
        }
    }

    // intrinsic gas
    let is_shanghai = chain_spec.is_shanghai_active_at_timestamp(header.timestamp);
    let intrinsic = intrinsic_gas(tx.input(), tx.is_create(), tx.access_list(), is_shanghai);
    if tx.gas_limit() < intrinsic {
        return Err(
            InvalidTransaction::IntrinsicGasTooLow { have: tx.gas_limit(), need: intrinsic }.into()
        );
    }
    let frame_gas = tx.gas_limit() - intrinsic;
    if is_shanghai && tx.is_create() && tx.input().len() > MAX_INITCODE_SIZE {
        return Err(InvalidTransaction::InitCodeTooLarge { size: tx.input().len() }.into());
    }

    // gas purchase (and blob gas for EIP-4844)
    let effective_price = tx.effective_gas_price(base_fee);
    let gas_cost = U256::from(tx.gas_limit()) * U256::from(effective_price);
    let mut upfront = gas_cost;
    if let Some(blob_gas) = tx.blob_gas() {
        if blob_gas == 0 {
            return Err(InvalidTransaction::MalformedBlobTransaction.into());
        }
        for hash in tx.blob_versioned_hashes().unwrap_or_default() {
            if hash.as_slice()[0] != VERSIONED_HASH_VERSION_KZG {
                return Err(InvalidTransaction::InvalidBlobVersionedHash(*hash).into());
            }
        }
        let blob_price = calc_blob_gasprice(header.excess_blob_gas.unwrap_or_default());
        if let Some(max_fee) = tx.max_fee_per_blob_gas() {
            if max_fee < blob_price {
                return Err(
                    InvalidTransaction::BlobFeeCapTooLow { max_fee, price: blob_price }.into()
                );
            }
        }
        upfront += U256::from(blob_gas) * U256::from(blob_price);
    }

    let balance = state.get_balance(sender)?;
    let required = upfront + tx.value();
    if balance < required {
        return Err(InvalidTransaction::InsufficientFunds { have: balance, need: required }.into());
    }
    state.sub_balance(sender, upfront)?;

    // nonce bump; creations bump inside the create frame so the created
    // address derives from the pre-bump nonce
    if !tx.is_create() {
        state.set_nonce(sender, sender_nonce + 1)?;
    }

    // warm set: sender, recipient, precompiles, EIP-2930 entries,
    // EIP-3651 coinbase
    let precompiles = Precompiles::new(PrecompileSpecId::from_spec_id(spec_id));
    let recipient = match tx.to() {
        TxKind::Call(to) => Some(to),
        TxKind::Create => None,
    };
    let entries: Vec<(Address, Vec<aura_primitives::B256>)> = tx
        .access_list()
        .map(|list| {
            list.0
                .iter()
                .map(|item| (item.address, item.storage_keys.clone()))
                .collect()
        })
        .unwrap_or_default();
    state.prepare_access_list(sender, recipient, precompiles.addresses().copied(), entries);
    if is_shanghai {
        state.add_address_to_access_list(header.beneficiary);
    }

    // interpreter environment
    let mut env = Env::default();
    fill_cfg_env(&mut env.cfg, chain_spec);
    fill_block_env(&mut env.block, header);
    fill_tx_env(&mut env.tx, tx, sender, base_fee);

    let mut host = EvmHost::new(state, env, spec_id, block_hashes);
    if let Some(tracer) = tracer.take() {
        host = host.with_tracer(tracer);
    }
    if let Some(deadline) = deadline {
        host = host.with_deadline(deadline);
    }

    let output = match tx.to() {
        TxKind::Call(to) => {
            execute_call_message(&mut host, sender, to, tx.value(), tx.input().clone(), frame_gas)
        }
        TxKind::Create => {
            execute_create_message(&mut host, sender, tx.value(), tx.input().clone(), frame_gas)
        }
    }
    .map_err(ApplyError::Execution)?;
    let logs = std::mem::take(&mut host.logs);
    drop(host);

    // refunds, capped at gas_used / quotient; exceptional halts consume
    // the whole frame allowance
    let success = output.is_success();
    let remaining =
        if success || output.result.is_revert() { output.gas.remaining() } else { 0 };
    let mut gas_used = tx.gas_limit() - remaining;
    let quotient = if spec_id.is_enabled_in(SpecId::LONDON) {
        MAX_REFUND_QUOTIENT
    } else {
        LEGACY_REFUND_QUOTIENT
    };
    if success {
        state.add_refund(output.gas.refunded().max(0) as u64);
    }
    let refund = state.get_refund().min(gas_used / quotient);
    gas_used -= refund;

    // return unused gas, pay the proposer
    let leftover = U256::from(tx.gas_limit() - gas_used) * U256::from(effective_price);
    state.add_balance(sender, leftover)?;
    let tip = tx.effective_tip_per_gas(base_fee).unwrap_or_default();
    state.add_balance(header.beneficiary, U256::from(gas_used) * U256::from(tip))?;

    trace!(
        target: "evm",
        tx = %tx.hash(),
        gas_used,
        refund,
        success,
        "transaction applied"
    );

    Ok(MessageResult {
        success,
        gas_used,
        output: output.output,
        logs: if success { logs } else { Vec::new() },
        contract_address: if success { output.created_address } else { None },
        gas_refunded: refund,
        reverted: output.result.is_revert(),
    })
}

/// An unsigned message, the shape `eth_call`, `eth_estimateGas` and
/// `debug_traceCall` execute.
#[derive(Debug, Clone)]
pub struct CallMessage {
    /// Caller; defaults to the zero address.
    pub from: Address,
    /// Call target or contract creation.
    pub to: TxKind,
    /// Gas limit the simulation runs with.
    pub gas_limit: u64,
    /// Effective gas price. Zero means gas is not paid for, the usual
    /// simulation mode.
    pub gas_price: u128,
    /// Transferred value.
    pub value: U256,
    /// Call data.
    pub input: Bytes,
    /// Optional EIP-2930 access list.
    pub access_list: Option<AccessList>,
}

/// Applies an unsigned call on top of `state`: no signature, nonce or
/// chain-id checks, no nonce bump at message level, and no fee transfers
/// when the gas price is zero. Gas metering and refunds behave exactly
/// like a real transaction so gas estimates are faithful.
#[allow(clippy::too_many_arguments)]
pub fn apply_call(
    chain_spec: &ChainSpec,
    header: &Header,
    state: &mut IntraBlockState<'_>,
    block_hashes: &dyn BlockHashProvider,
    msg: &CallMessage,
    mut tracer: Option<&mut dyn StepTracer>,
    deadline: Option<Instant>,
) -> Result<MessageResult, ApplyError> {
    let spec_id = spec_id_at_header(chain_spec, header);
    let is_shanghai = chain_spec.is_shanghai_active_at_timestamp(header.timestamp);
    let is_create = matches!(msg.to, TxKind::Create);

    let intrinsic = intrinsic_gas(&msg.input, is_create, msg.access_list.as_ref(), is_shanghai);
    if msg.gas_limit < intrinsic {
        return Err(
            InvalidTransaction::IntrinsicGasTooLow { have: msg.gas_limit, need: intrinsic }.into()
        );
    }
    let frame_gas = msg.gas_limit - intrinsic;

    // funded simulations still need to afford what they spend
    let gas_cost = U256::from(msg.gas_limit) * U256::from(msg.gas_price);
    if !gas_cost.is_zero() {
        let balance = state.get_balance(msg.from)?;
        let required = gas_cost + msg.value;
        if balance < required {
            return Err(
                InvalidTransaction::InsufficientFunds { have: balance, need: required }.into()
            );
        }
        state.sub_balance(msg.from, gas_cost)?;
    }

    let precompiles = Precompiles::new(PrecompileSpecId::from_spec_id(spec_id));
    let recipient = match msg.to {
        TxKind::Call(to) => Some(to),
        TxKind::Create => None,
    };
    let entries: Vec<(Address, Vec<aura_primitives::B256>)> = msg
        .access_list
        .as_ref()
        .map(|list| {
            list.0.iter().map(|item| (item.address, item.storage_keys.clone())).collect()
        })
        .unwrap_or_default();
    state.prepare_access_list(msg.from, recipient, precompiles.addresses().copied(), entries);
    if is_shanghai {
        state.add_address_to_access_list(header.beneficiary);
    }

    let mut env = Env::default();
    fill_cfg_env(&mut env.cfg, chain_spec);
    fill_block_env(&mut env.block, header);
    env.tx.caller = msg.from;
    env.tx.gas_limit = msg.gas_limit;
    env.tx.gas_price = U256::from(msg.gas_price);
    env.tx.transact_to = msg.to;
    env.tx.value = msg.value;
    env.tx.data = msg.input.clone();

    let mut host = EvmHost::new(state, env, spec_id, block_hashes);
    if let Some(tracer) = tracer.take() {
        host = host.with_tracer(tracer);
    }
    if let Some(deadline) = deadline {
        host = host.with_deadline(deadline);
    }

    let output = match msg.to {
        TxKind::Call(to) => {
            execute_call_message(&mut host, msg.from, to, msg.value, msg.input.clone(), frame_gas)
        }
        TxKind::Create => {
            execute_create_message(&mut host, msg.from, msg.value, msg.input.clone(), frame_gas)
        }
    }
    .map_err(ApplyError::Execution)?;
    let logs = std::mem::take(&mut host.logs);
    drop(host);

    let success = output.is_success();
    let remaining =
        if success || output.result.is_revert() { output.gas.remaining() } else { 0 };
    let mut gas_used = msg.gas_limit - remaining;
    let quotient = if spec_id.is_enabled_in(SpecId::LONDON) {
        MAX_REFUND_QUOTIENT
    } else {
        LEGACY_REFUND_QUOTIENT
    };
    if success {
        state.add_refund(output.gas.refunded().max(0) as u64);
    }
    let refund = state.get_refund().min(gas_used / quotient);
    gas_used -= refund;

    if !gas_cost.is_zero() {
        let leftover = U256::from(msg.gas_limit - gas_used) * U256::from(msg.gas_price);
        state.add_balance(msg.from, leftover)?;
    }

    Ok(MessageResult {
        success,
        gas_used,
        output: output.output,
        logs: if success { logs } else { Vec::new() },
        contract_address: if success { output.created_address } else { None },
        gas_refunded: refund,
        reverted: output.result.is_revert(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_eips::eip2930::AccessListItem;

    #[test]
    fn intrinsic_gas_matches_yellow_paper_costs() {
        // plain transfer
        assert_eq!(intrinsic_gas(&[], false, None, false), 21_000);
        // one zero byte, one non-zero byte
        assert_eq!(intrinsic_gas(&[0x00, 0x01], false, None, false), 21_000 + 4 + 16);
        // creation surcharge
        assert_eq!(intrinsic_gas(&[], true, None, false), 53_000);
        // shanghai charges init-code words
        assert_eq!(
            intrinsic_gas(&[0xff; 33], true, None, true),
            21_000 + 32_000 + 33 * 16 + 2 * 2
        );
    }

    #[test]
    fn intrinsic_gas_counts_access_list_entries() {
        let list = AccessList(vec![AccessListItem {
            address: Address::ZERO,
            storage_keys: vec![aura_primitives::B256::ZERO; 3],
        }]);
        assert_eq!(
            intrinsic_gas(&[], false, Some(&list), false),
            21_000 + 2_400 + 3 * 1_900
        );
    }
}
