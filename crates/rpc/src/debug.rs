//! `debug_trace*`: structured EVM step logs with a deadline.

use crate::{error::EthApiError, eth::{CallRequest, EthApi}};
use alloy_rpc_types_eth::{BlockId, BlockNumberOrTag};
use alloy_rpc_types_trace::geth::{DefaultFrame, StructLog};
use aura_evm::{apply_call, apply_transaction, EmptyBlockHashes, StructLogTracer, TraceConfig};
use aura_primitives::{Header, TransactionSigned, B256};
use aura_state::{ChainReader, HistoryStateReader, IntraBlockState};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default trace deadline.
pub const DEFAULT_TRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options accepted by the `debug_trace*` family (the legacy struct-logger
/// configuration).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceOptions {
    /// Skip storage capture.
    pub disable_storage: bool,
    /// Skip stack capture.
    pub disable_stack: bool,
    /// Capture memory contents.
    pub enable_memory: bool,
    /// Step cap; runaway traces are truncated.
    pub limit: Option<usize>,
    /// Deadline in `ParseDuration` syntax (`"10s"`, `"2m30s"`).
    pub timeout: Option<String>,
}

impl TraceOptions {
    fn tracer_config(&self) -> TraceConfig {
        let mut config = TraceConfig {
            enable_stack: !self.disable_stack,
            enable_memory: self.enable_memory,
            enable_storage: !self.disable_storage,
            ..Default::default()
        };
        if let Some(limit) = self.limit {
            config.step_limit = limit;
        }
        config
    }

    fn deadline(&self) -> Result<Instant, EthApiError> {
        let timeout = match &self.timeout {
            None => DEFAULT_TRACE_TIMEOUT,
            Some(raw) => humantime::parse_duration(raw)
                .map_err(|err| EthApiError::InvalidParams(format!("bad timeout: {err}")))?,
        };
        Ok(Instant::now() + timeout)
    }
}

/// One element of a `debug_traceBlockBy*` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceBlockItem {
    /// Traced transaction.
    pub tx_hash: B256,
    /// Its trace.
    pub result: DefaultFrame,
}

fn into_default_frame(
    logs: Vec<aura_evm::StructLog>,
    failed: bool,
    gas: u64,
    return_value: aura_primitives::Bytes,
) -> DefaultFrame {
    let struct_logs = logs
        .into_iter()
        .map(|log| StructLog {
            pc: log.pc,
            op: log.op.to_string(),
            gas: log.gas,
            gas_cost: log.gas_cost,
            depth: log.depth,
            stack: log.stack,
            memory: log.memory.map(|memory| {
                memory.chunks(32).map(alloy_primitives::hex::encode).collect()
            }),
            storage: log.storage,
            ..Default::default()
        })
        .collect();
    DefaultFrame { failed, gas, return_value, struct_logs }
}

impl EthApi {
    fn trace_applied_transaction(
        &self,
        header: &Header,
        state: &mut IntraBlockState<'_>,
        tx: &TransactionSigned,
        sender: aura_primitives::Address,
        opts: &TraceOptions,
    ) -> Result<DefaultFrame, EthApiError> {
        let mut tracer = StructLogTracer::new(opts.tracer_config());
        let result = apply_transaction(
            &self.chain_spec,
            header,
            state,
            &EmptyBlockHashes,
            tx,
            sender,
            Some(&mut tracer),
            Some(opts.deadline()?),
        )?;
        Ok(into_default_frame(
            tracer.into_logs(),
            !result.success,
            result.gas_used,
            result.output,
        ))
    }

    /// `debug_traceTransaction`: replays the containing block up to the
    /// target, then traces it.
    pub fn debug_trace_transaction(
        &self,
        hash: B256,
        opts: TraceOptions,
    ) -> Result<DefaultFrame, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let meta = chain.tx_meta(hash)?.ok_or(EthApiError::UnknownBlock)?;
        let block_hash =
            chain.canonical_hash(meta.block_number)?.ok_or(EthApiError::UnknownBlock)?;
        let block =
            chain.block(meta.block_number, block_hash)?.ok_or(EthApiError::BlockDataMissing)?;
        let senders =
            chain.senders(meta.block_number, block_hash)?.ok_or(EthApiError::BlockDataMissing)?;

        // anchor on the state the block started from
        let reader = HistoryStateReader::new(&tx, meta.block_number);
        let mut state = IntraBlockState::new(&reader);
        let delete_empty =
            self.chain_spec.is_spurious_dragon_active_at_block(block.header.number);

        for (index, (transaction, sender)) in
            block.body.transactions.iter().zip(&senders).enumerate()
        {
            if index as u32 == meta.tx_index {
                return self.trace_applied_transaction(
                    &block.header,
                    &mut state,
                    transaction,
                    *sender,
                    &opts,
                );
            }
            apply_transaction(
                &self.chain_spec,
                &block.header,
                &mut state,
                &EmptyBlockHashes,
                transaction,
                *sender,
                None,
                None,
            )?;
            state.finalize(delete_empty);
        }
        Err(EthApiError::UnknownBlock)
    }

    fn debug_trace_block(
        &self,
        number: u64,
        block_hash: B256,
        opts: &TraceOptions,
    ) -> Result<Vec<TraceBlockItem>, EthApiError> {
        let tx = self.db.tx()?;
        let chain = ChainReader::new(&tx);
        let block = chain.block(number, block_hash)?.ok_or(EthApiError::BlockDataMissing)?;
        let senders =
            chain.senders(number, block_hash)?.ok_or(EthApiError::BlockDataMissing)?;

        let reader = HistoryStateReader::new(&tx, number);
        let mut state = IntraBlockState::new(&reader);
        let delete_empty = self.chain_spec.is_spurious_dragon_active_at_block(number);

        let mut traces = Vec::with_capacity(block.body.transactions.len());
        for (transaction, sender) in block.body.transactions.iter().zip(&senders) {
            let frame = self.trace_applied_transaction(
                &block.header,
                &mut state,
                transaction,
                *sender,
                opts,
            )?;
            state.finalize(delete_empty);
            traces.push(TraceBlockItem { tx_hash: transaction.hash(), result: frame });
        }
        Ok(traces)
    }

    /// `debug_traceBlockByNumber`.
    pub fn debug_trace_block_by_number(
        &self,
        tag: BlockNumberOrTag,
        opts: TraceOptions,
    ) -> Result<Vec<TraceBlockItem>, EthApiError> {
        let (number, hash) = {
            let tx = self.db.tx()?;
            let chain = ChainReader::new(&tx);
            let head = self.head(&chain)?;
            let anchor = self.resolve_tag(&chain, &head, tag)?;
            let hash =
                chain.canonical_hash(anchor.number)?.ok_or(EthApiError::UnknownBlock)?;
            (anchor.number, hash)
        };
        self.debug_trace_block(number, hash, &opts)
    }

    /// `debug_traceBlockByHash`.
    pub fn debug_trace_block_by_hash(
        &self,
        hash: B256,
        opts: TraceOptions,
    ) -> Result<Vec<TraceBlockItem>, EthApiError> {
        let number = {
            let tx = self.db.tx()?;
            let chain = ChainReader::new(&tx);
            chain.header_number(hash)?.ok_or(EthApiError::UnknownBlock)?
        };
        self.debug_trace_block(number, hash, &opts)
    }

    /// `debug_traceCall`.
    pub fn debug_trace_call(
        &self,
        request: CallRequest,
        block: Option<BlockId>,
        opts: TraceOptions,
    ) -> Result<DefaultFrame, EthApiError> {
        self.with_call_state(block, |state, header| {
            let msg = self.build_call_message(&request, header);
            let mut tracer = StructLogTracer::new(opts.tracer_config());
            let result = apply_call(
                &self.chain_spec,
                header,
                state,
                &EmptyBlockHashes,
                &msg,
                Some(&mut tracer),
                Some(opts.deadline()?),
            )?;
            Ok(into_default_frame(
                tracer.into_logs(),
                !result.success,
                result.gas_used,
                result.output,
            ))
        })
    }
}
