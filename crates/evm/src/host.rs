//! The interpreter host: bridges revm's instruction set onto the
//! journaled [`IntraBlockState`], which owns warm/cold tracking, transient
//! storage and the refund-relevant storage views.

use crate::tracer::StepTracer;
use aura_primitives::B256;
use aura_state::{IntraBlockState, StateError};
use revm::{
    interpreter::{
        AccountLoad, Eip7702CodeLoad, Host, SStoreResult, SelfDestructResult,
    },
    primitives::{Address, Bytes, Env, Log, SpecId, StateLoad, U256},
};
use std::time::Instant;

/// Resolves the BLOCKHASH opcode; absent hashes resolve to zero upstream.
pub trait BlockHashProvider {
    /// Hash of the canonical block at `number`, if known.
    fn block_hash(&self, number: u64) -> Option<B256>;
}

/// Provider for contexts without chain access (simulations on fresh
/// state, unit tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlockHashes;

impl BlockHashProvider for EmptyBlockHashes {
    fn block_hash(&self, _number: u64) -> Option<B256> {
        None
    }
}

/// How often the deadline is polled, in executed opcodes.
const DEADLINE_POLL_INTERVAL: u64 = 256;

/// The revm [`Host`] carrying this chain's intra-block state.
pub struct EvmHost<'a, 'r> {
    pub(crate) state: &'a mut IntraBlockState<'r>,
    pub(crate) env: Env,
    pub(crate) spec_id: SpecId,
    block_hashes: &'a dyn BlockHashProvider,
    pub(crate) logs: Vec<Log>,
    pub(crate) tracer: Option<&'a mut dyn StepTracer>,
    pub(crate) depth: u64,
    pub(crate) db_error: Option<StateError>,
    deadline: Option<Instant>,
    steps: u64,
    pub(crate) timed_out: bool,
}

impl<'a, 'r> std::fmt::Debug for EvmHost<'a, 'r> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmHost")
            .field("spec_id", &self.spec_id)
            .field("depth", &self.depth)
            .field("logs", &self.logs.len())
            .finish()
    }
}

impl<'a, 'r> EvmHost<'a, 'r> {
    /// Host over `state` with a fully filled [`Env`].
    pub fn new(
        state: &'a mut IntraBlockState<'r>,
        env: Env,
        spec_id: SpecId,
        block_hashes: &'a dyn BlockHashProvider,
    ) -> Self {
        Self {
            state,
            env,
            spec_id,
            block_hashes,
            logs: Vec::new(),
            tracer: None,
            depth: 0,
            db_error: None,
            deadline: None,
            steps: 0,
            timed_out: false,
        }
    }

    /// Attaches a step tracer.
    pub fn with_tracer(mut self, tracer: &'a mut dyn StepTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Aborts execution between opcodes once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Polls the deadline; called from the instruction wrapper.
    pub(crate) fn poll_deadline(&mut self) -> bool {
        self.steps += 1;
        if self.steps % DEADLINE_POLL_INTERVAL == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.timed_out = true;
                }
            }
        }
        self.timed_out
    }

    fn stash<T>(&mut self, result: Result<T, StateError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.db_error = Some(err);
                None
            }
        }
    }

    /// Warms `address`, reporting whether it was cold before.
    pub(crate) fn warm_address(&mut self, address: Address) -> bool {
        !self.state.add_address_to_access_list(address)
    }

    /// Feeds the step tracer before an opcode executes.
    pub(crate) fn trace_step(&mut self, interpreter: &revm::interpreter::Interpreter) {
        let depth = self.depth;
        let Some(tracer) = self.tracer.as_deref_mut() else { return };
        let opcode = interpreter.current_opcode();
        let name = revm::interpreter::OpCode::new(opcode).map_or("INVALID", |op| op.as_str());
        tracer.step(
            interpreter.program_counter() as u64,
            opcode,
            name,
            interpreter.gas.remaining(),
            depth + 1,
            interpreter.stack.data(),
            Some(interpreter.shared_memory.context_memory()),
            interpreter.contract.target_address,
        );
    }

    /// Feeds the step tracer after the opcode executed.
    pub(crate) fn trace_step_end(&mut self, interpreter: &revm::interpreter::Interpreter) {
        if let Some(tracer) = self.tracer.as_deref_mut() {
            tracer.step_end(interpreter.gas.remaining());
        }
    }
}

impl<'a, 'r> Host for EvmHost<'a, 'r> {
    fn env(&self) -> &Env {
        &self.env
    }

    fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    fn load_account_delegated(&mut self, address: Address) -> Option<AccountLoad> {
        let is_cold = self.warm_address(address);
        let is_empty = self.stash(self.state.empty(address))?;
        Some(AccountLoad {
            load: Eip7702CodeLoad::new_not_delegated((), is_cold),
            is_empty,
        })
    }

    fn block_hash(&mut self, number: u64) -> Option<B256> {
        Some(self.block_hashes.block_hash(number).unwrap_or_default())
    }

    fn balance(&mut self, address: Address) -> Option<StateLoad<U256>> {
        let is_cold = self.warm_address(address);
        let balance = self.stash(self.state.get_balance(address))?;
        Some(StateLoad::new(balance, is_cold))
    }

    fn code(&mut self, address: Address) -> Option<Eip7702CodeLoad<Bytes>> {
        let is_cold = self.warm_address(address);
        let code = self.stash(self.state.get_code(address))?.unwrap_or_default();
        Some(Eip7702CodeLoad::new_not_delegated(code, is_cold))
    }

    fn code_hash(&mut self, address: Address) -> Option<Eip7702CodeLoad<B256>> {
        let is_cold = self.warm_address(address);
        // EXTCODEHASH of a non-existent or empty account is zero
        let empty = self.stash(self.state.empty(address))?;
        if empty {
            return Some(Eip7702CodeLoad::new_not_delegated(B256::ZERO, is_cold));
        }
        let hash = self.stash(self.state.get_code_hash(address))?;
        Some(Eip7702CodeLoad::new_not_delegated(hash, is_cold))
    }

    fn sload(&mut self, address: Address, index: U256) -> Option<StateLoad<U256>> {
        let key = B256::from(index);
        let (_, slot_was_warm) = self.state.add_slot_to_access_list(address, key);
        let value = self.stash(self.state.get_state(address, key))?;
        Some(StateLoad::new(value, !slot_was_warm))
    }

    fn sstore(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Option<StateLoad<SStoreResult>> {
        let key = B256::from(index);
        let (_, slot_was_warm) = self.state.add_slot_to_access_list(address, key);
        let original_value = self.stash(self.state.get_committed_state(address, key))?;
        let present_value = self.stash(self.state.get_state(address, key))?;
        self.stash(self.state.set_state(address, key, value))?;
        Some(StateLoad::new(
            SStoreResult { original_value, present_value, new_value: value },
            !slot_was_warm,
        ))
    }

    fn tload(&mut self, address: Address, index: U256) -> U256 {
        self.state.get_transient_state(address, B256::from(index))
    }

    fn tstore(&mut self, address: Address, index: U256, value: U256) {
        self.state.set_transient_state(address, B256::from(index), value);
    }

    fn log(&mut self, log: Log) {
        self.logs.push(log);
    }

    fn selfdestruct(
        &mut self,
        address: Address,
        target: Address,
    ) -> Option<StateLoad<SelfDestructResult>> {
        let is_cold = self.warm_address(target);
        let target_exists = self.stash(self.state.exist(target))?;
        let previously_destroyed = self.state.has_self_destructed(address);
        let balance = self.stash(self.state.get_balance(address))?;
        let had_value = !balance.is_zero();

        // the balance always moves, even when EIP-6780 skips the deletion
        self.stash(self.state.sub_balance(address, balance))?;
        if target != address {
            self.stash(self.state.add_balance(target, balance))?;
        }

        let destroy = !self.spec_id.is_enabled_in(SpecId::CANCUN) ||
            self.state.created_in_transaction(address);
        if destroy {
            self.stash(self.state.self_destruct(address))?;
        }

        Some(StateLoad::new(
            SelfDestructResult { had_value, target_exists, previously_destroyed },
            is_cold,
        ))
    }
}
