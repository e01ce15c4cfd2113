//! `eth_call`, `eth_estimateGas` and `eth_createAccessList`: simulations
//! over an intra-block state that is discarded on completion.

use crate::{
    error::EthApiError,
    eth::{BlockAnchor, EthApi},
    types::RpcAccessListResult,
};
use alloy_eips::eip2930::{AccessList, AccessListItem};
use alloy_primitives::TxKind;
use alloy_rpc_types_eth::BlockId;
use aura_evm::{apply_call, precompile_addresses, CallMessage, EmptyBlockHashes, MessageResult};
use aura_primitives::{
    constants::TX_BASE_GAS, Address, Bytes, Header, B256, U256,
};
use aura_state::{ChainReader, HistoryStateReader, IntraBlockState, PlainStateReader};
use serde::Deserialize;
use std::collections::HashMap;

/// The `txArgs` shape accepted by call-family methods.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallRequest {
    /// Caller; zero address when omitted.
    pub from: Option<Address>,
    /// Target; a create simulation when omitted.
    pub to: Option<Address>,
    /// Gas limit; capped by the node's RPC gas cap.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub gas: Option<u64>,
    /// Legacy gas price.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub gas_price: Option<u128>,
    /// EIP-1559 fee cap.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 priority fee.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub max_priority_fee_per_gas: Option<u128>,
    /// Transferred value.
    pub value: Option<U256>,
    /// Call data.
    pub input: Option<Bytes>,
    /// Call data under its legacy name; `input` wins when both are set.
    pub data: Option<Bytes>,
    /// Sender nonce (ignored by simulations).
    #[serde(with = "alloy_serde::quantity::opt")]
    pub nonce: Option<u64>,
    /// EIP-2930 access list.
    pub access_list: Option<AccessList>,
}

impl CallRequest {
    /// The effective call data.
    pub fn call_data(&self) -> Bytes {
        self.input.clone().or_else(|| self.data.clone()).unwrap_or_default()
    }
}

/// One account's overrides in `eth_call`'s `stateOverride` parameter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountOverride {
    /// Balance replacement.
    pub balance: Option<U256>,
    /// Nonce replacement.
    #[serde(with = "alloy_serde::quantity::opt")]
    pub nonce: Option<u64>,
    /// Code replacement.
    pub code: Option<Bytes>,
    /// Full storage replacement: prior slots read as zero.
    pub state: Option<HashMap<B256, B256>>,
    /// Partial storage overrides.
    pub state_diff: Option<HashMap<B256, B256>>,
}

/// The `stateOverride` parameter.
pub type StateOverride = HashMap<Address, AccountOverride>;

impl EthApi {
    pub(crate) fn build_call_message(&self, request: &CallRequest, header: &Header) -> CallMessage {
        let gas_limit = request.gas.unwrap_or(self.gas_cap).min(self.gas_cap);
        let gas_price = if let Some(gas_price) = request.gas_price {
            gas_price
        } else if let Some(max_fee) = request.max_fee_per_gas {
            let base = header.base_fee_per_gas.unwrap_or_default() as u128;
            max_fee.min(base + request.max_priority_fee_per_gas.unwrap_or_default())
        } else {
            // free simulation: gas is metered but not paid for
            0
        };
        CallMessage {
            from: request.from.unwrap_or_default(),
            to: request.to.map_or(TxKind::Create, TxKind::Call),
            gas_limit,
            gas_price,
            value: request.value.unwrap_or_default(),
            input: request.call_data(),
            access_list: request.access_list.clone(),
        }
    }

    fn apply_overrides(
        state: &mut IntraBlockState<'_>,
        overrides: &StateOverride,
    ) -> Result<(), EthApiError> {
        for (address, account) in overrides {
            // a full state replacement starts a fresh storage generation
            if account.state.is_some() {
                let balance = state.get_balance(*address)?;
                state.create_account(*address, true)?;
                state.set_balance(*address, balance)?;
            }
            if let Some(balance) = account.balance {
                state.set_balance(*address, balance)?;
            }
            if let Some(nonce) = account.nonce {
                state.set_nonce(*address, nonce)?;
            }
            if let Some(code) = &account.code {
                state.set_code(*address, code.clone())?;
            }
            for slots in [&account.state, &account.state_diff].into_iter().flatten() {
                for (slot, value) in slots {
                    state.set_state(*address, *slot, U256::from_be_bytes(value.0))?;
                }
            }
        }
        Ok(())
    }

    /// Runs `f` over a fresh intra-block state anchored per the request:
    /// plain state at the tip, historical otherwise, tip plus mempool
    /// overlay for `pending`. Everything is discarded afterwards.
    pub(crate) fn with_call_state<T>(
        &self,
        block: Option<BlockId>,
        f: impl FnOnce(&mut IntraBlockState<'_>, &Header) -> Result<T, EthApiError>,
    ) -> Result<T, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let head = self.head(&chain)?;
        let anchor = self.resolve_block_id(&chain, &head, block)?;
        let header = self.anchor_header(&chain, &head, anchor)?;

        if anchor.pending {
            let plain = PlainStateReader::new(&tx);
            let mut state = self.pending_state(&plain, &head)?;
            return f(&mut state, &header);
        }
        if anchor.number == head.number() {
            let plain = PlainStateReader::new(&tx);
            let mut state = IntraBlockState::new(&plain);
            return f(&mut state, &header);
        }
        let history = HistoryStateReader::at_end_of(&tx, anchor.number);
        let mut state = IntraBlockState::new(&history);
        f(&mut state, &header)
    }

    fn run_call(
        &self,
        state: &mut IntraBlockState<'_>,
        header: &Header,
        msg: &CallMessage,
    ) -> Result<MessageResult, EthApiError> {
        Ok(apply_call(
            &self.chain_spec,
            header,
            state,
            &EmptyBlockHashes,
            msg,
            None,
            None,
        )?)
    }

    /// `eth_call`.
    pub fn call(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
        overrides: Option<StateOverride>,
    ) -> Result<Bytes, EthApiError> {
        self.with_call_state(block, |state, header| {
            if let Some(overrides) = &overrides {
                Self::apply_overrides(state, overrides)?;
            }
            let msg = self.build_call_message(&request, header);
            let result = self.run_call(state, header, &msg)?;
            if result.success {
                Ok(result.output)
            } else if result.reverted {
                Err(EthApiError::Reverted(result.output))
            } else {
                Err(EthApiError::Execution("execution halted".to_string()))
            }
        })
    }

    /// `eth_estimateGas`: the lowest gas limit the call succeeds with,
    /// found by bisection between the intrinsic floor and the gas cap.
    pub fn estimate_gas(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
        overrides: Option<StateOverride>,
    ) -> Result<u64, EthApiError> {
        self.with_call_state(block, |state, header| {
            if let Some(overrides) = &overrides {
                Self::apply_overrides(state, overrides)?;
            }
            let msg = self.build_call_message(&request, header);
            let cap = msg.gas_limit;

            let mut attempt = |gas: u64| -> Result<MessageResult, EthApiError> {
                let snapshot = state.snapshot();
                let result =
                    self.run_call(state, header, &CallMessage { gas_limit: gas, ..msg.clone() });
                state.revert_to_snapshot(snapshot);
                result
            };

            // feasibility at the cap decides between revert and estimate
            let at_cap = attempt(cap)?;
            if !at_cap.success {
                return if at_cap.reverted {
                    Err(EthApiError::Reverted(at_cap.output))
                } else {
                    Err(EthApiError::GasCapExceeded(cap))
                };
            }

            let mut lo = at_cap.gas_used.max(TX_BASE_GAS) - 1;
            let mut hi = cap;
            while lo + 1 < hi {
                let mid = lo + (hi - lo) / 2;
                match attempt(mid) {
                    Ok(result) if result.success => hi = mid,
                    _ => lo = mid,
                }
            }
            Ok(hi)
        })
    }

    /// `eth_createAccessList`: executes once to discover the warm set,
    /// then re-executes with that list attached for a representative gas
    /// figure.
    pub fn create_access_list(
        &self,
        mut request: CallRequest,
        block: Option<BlockId>,
    ) -> Result<RpcAccessListResult, EthApiError> {
        self.with_call_state(block, |state, header| {
            let discovery = self.build_call_message(&request, header);
            let snapshot = state.snapshot();
            let _ = self.run_call(state, header, &discovery)?;

            let excluded: Vec<Address> = precompile_addresses(&self.chain_spec, header)
                .into_iter()
                .chain([discovery.from])
                .chain(request.to)
                .collect();
            let access_list = AccessList(
                state
                    .access_list_content()
                    .into_iter()
                    .filter(|(address, _)| !excluded.contains(address))
                    .map(|(address, storage_keys)| AccessListItem { address, storage_keys })
                    .collect(),
            );
            state.revert_to_snapshot(snapshot);

            request.access_list = Some(access_list.clone());
            let msg = self.build_call_message(&request, header);
            let result = self.run_call(state, header, &msg)?;
            Ok(RpcAccessListResult {
                access_list,
                gas_used: result.gas_used,
                error: (!result.success).then(|| {
                    if result.reverted {
                        "execution reverted".to_string()
                    } else {
                        "execution halted".to_string()
                    }
                }),
            })
        })
    }
}
