//! Structured step tracing for `debug_trace*`.

use aura_primitives::{Address, B256, U256};
use std::collections::BTreeMap;

/// Per-opcode observer driven by the interpreter loop.
pub trait StepTracer {
    /// Called before each opcode executes.
    #[allow(clippy::too_many_arguments)]
    fn step(
        &mut self,
        pc: u64,
        opcode: u8,
        op_name: &'static str,
        gas: u64,
        depth: u64,
        stack: &[U256],
        memory: Option<&[u8]>,
        contract: Address,
    );

    /// Called right after the opcode executed, with the gas left.
    fn step_end(&mut self, gas_after: u64);
}

/// What the struct-log tracer captures per step.
#[derive(Debug, Clone, Copy)]
pub struct TraceConfig {
    /// Capture the stack.
    pub enable_stack: bool,
    /// Capture the current memory context.
    pub enable_memory: bool,
    /// Capture touched storage slots.
    pub enable_storage: bool,
    /// Hard cap on captured steps; traces of runaway loops stay bounded.
    pub step_limit: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { enable_stack: true, enable_memory: false, enable_storage: true, step_limit: 1 << 20 }
    }
}

/// One captured execution step, geth's `StructLog` shape.
#[derive(Debug, Clone)]
pub struct StructLog {
    /// Program counter.
    pub pc: u64,
    /// Opcode mnemonic.
    pub op: &'static str,
    /// Gas remaining before the step.
    pub gas: u64,
    /// Gas consumed by the step (children included for calls).
    pub gas_cost: u64,
    /// Call depth, 1-based.
    pub depth: u64,
    /// Stack, bottom first.
    pub stack: Option<Vec<U256>>,
    /// Memory of the current call context.
    pub memory: Option<Vec<u8>>,
    /// Storage slots touched so far in the traced contract.
    pub storage: Option<BTreeMap<B256, B256>>,
}

/// Collects [`StructLog`]s while execution runs.
#[derive(Debug, Default)]
pub struct StructLogTracer {
    config: TraceConfig,
    logs: Vec<StructLog>,
    storage: BTreeMap<Address, BTreeMap<B256, B256>>,
    truncated: bool,
}

impl StructLogTracer {
    /// Tracer with the given capture config.
    pub fn new(config: TraceConfig) -> Self {
        Self { config, ..Default::default() }
    }

    /// The captured steps.
    pub fn into_logs(self) -> Vec<StructLog> {
        self.logs
    }

    /// Whether the step limit truncated the trace.
    pub const fn truncated(&self) -> bool {
        self.truncated
    }
}

const fn opcode_is_storage(opcode: u8) -> bool {
    // SLOAD / SSTORE
    opcode == 0x54 || opcode == 0x55
}

impl StepTracer for StructLogTracer {
    fn step(
        &mut self,
        pc: u64,
        opcode: u8,
        op_name: &'static str,
        gas: u64,
        depth: u64,
        stack: &[U256],
        memory: Option<&[u8]>,
        contract: Address,
    ) {
        if self.logs.len() >= self.config.step_limit {
            self.truncated = true;
            return;
        }

        if self.config.enable_storage && opcode_is_storage(opcode) {
            if let Some(key) = stack.last() {
                // the value lands in storage after the step; recording the
                // key with a placeholder keeps the map shape geth-like
                self.storage
                    .entry(contract)
                    .or_default()
                    .entry(B256::from(*key))
                    .or_insert(B256::ZERO);
            }
        }

        self.logs.push(StructLog {
            pc,
            op: op_name,
            gas,
            gas_cost: 0,
            depth,
            stack: self.config.enable_stack.then(|| stack.to_vec()),
            memory: self.config.enable_memory.then(|| memory.unwrap_or_default().to_vec()),
            storage: self
                .config
                .enable_storage
                .then(|| self.storage.get(&contract).cloned().unwrap_or_default()),
        });
    }

    fn step_end(&mut self, gas_after: u64) {
        if let Some(last) = self.logs.last_mut() {
            last.gas_cost = last.gas.saturating_sub(gas_after);
        }
    }
}
