//! Call-frame machinery: drives the revm interpreter through nested calls
//! and creates, with value transfers, precompiles, depth limits and code
//! deposit handled against the intra-block state.

use crate::{error::BlockExecutionError, host::EvmHost};
use aura_primitives::constants::{MAX_CODE_SIZE, MAX_INITCODE_SIZE};
use revm::{
    interpreter::{
        table::make_instruction_table, CallInputs, CallOutcome, CallScheme, CallValue, Contract,
        CreateInputs, CreateOutcome, Gas, InstructionResult, Interpreter, InterpreterAction,
        InterpreterResult, SharedMemory,
    },
    precompile::{Precompile, PrecompileError, PrecompileErrors, PrecompileSpecId, Precompiles},
    primitives::{
        spec_to_generic, Address, Bytecode, Bytes, CreateScheme, Spec, SpecId, B256, U256,
    },
};

const CALL_STACK_LIMIT: u64 = 1024;
/// Gas charged per byte of deployed code.
const CODE_DEPOSIT_GAS_PER_BYTE: u64 = 200;

/// Final outcome of a top-level message frame.
#[derive(Debug)]
pub(crate) struct CallOutput {
    pub result: InstructionResult,
    pub gas: Gas,
    pub output: Bytes,
    pub created_address: Option<Address>,
}

impl CallOutput {
    /// Whether execution finished without an exceptional halt or revert.
    pub(crate) fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

enum FrameInput {
    Call(Box<CallInputs>),
    Create(Box<CreateInputs>),
}

enum FrameResult {
    Call(CallOutcome),
    Create(CreateOutcome),
}

enum FrameData {
    Call { return_memory_offset: std::ops::Range<usize> },
    Create { created_address: Address },
}

struct Frame {
    interpreter: Interpreter,
    checkpoint: usize,
    logs_checkpoint: usize,
    data: FrameData,
}

enum FrameOrResult {
    Frame(Frame),
    Result(FrameResult),
}

/// Runs a top-level CALL message.
pub(crate) fn execute_call_message(
    host: &mut EvmHost<'_, '_>,
    caller: Address,
    target: Address,
    value: U256,
    input: Bytes,
    gas_limit: u64,
) -> Result<CallOutput, BlockExecutionError> {
    let inputs = CallInputs {
        input,
        return_memory_offset: 0..0,
        gas_limit,
        bytecode_address: target,
        target_address: target,
        caller,
        value: CallValue::Transfer(value),
        scheme: CallScheme::Call,
        is_static: false,
        is_eof: false,
    };
    match execute_frames(host, FrameInput::Call(Box::new(inputs)))? {
        FrameResult::Call(outcome) => Ok(CallOutput {
            result: outcome.result.result,
            gas: outcome.result.gas,
            output: outcome.result.output,
            created_address: None,
        }),
        FrameResult::Create(_) => {
            Err(BlockExecutionError::Internal("call message produced a create result".into()))
        }
    }
}

/// Runs a top-level CREATE message.
pub(crate) fn execute_create_message(
    host: &mut EvmHost<'_, '_>,
    caller: Address,
    value: U256,
    init_code: Bytes,
    gas_limit: u64,
) -> Result<CallOutput, BlockExecutionError> {
    let inputs =
        CreateInputs { caller, scheme: CreateScheme::Create, value, init_code, gas_limit };
    match execute_frames(host, FrameInput::Create(Box::new(inputs)))? {
        FrameResult::Create(outcome) => Ok(CallOutput {
            result: outcome.result.result,
            gas: outcome.result.gas,
            output: outcome.result.output,
            created_address: outcome.address,
        }),
        FrameResult::Call(_) => {
            Err(BlockExecutionError::Internal("create message produced a call result".into()))
        }
    }
}

fn execute_frames(
    host: &mut EvmHost<'_, '_>,
    first: FrameInput,
) -> Result<FrameResult, BlockExecutionError> {
    let spec_id = host.spec_id;
    spec_to_generic!(spec_id, execute_frames_inner::<SPEC>(host, first))
}

fn execute_frames_inner<SPEC: Spec>(
    host: &mut EvmHost<'_, '_>,
    first: FrameInput,
) -> Result<FrameResult, BlockExecutionError> {
    let plain_table = make_instruction_table::<EvmHost<'_, '_>, SPEC>();
    let table = core::array::from_fn::<_, 256, _>(|index| {
        let plain = &plain_table;
        move |interpreter: &mut Interpreter, host: &mut EvmHost<'_, '_>| {
            if host.poll_deadline() {
                interpreter.instruction_result = InstructionResult::FatalExternalError;
                return;
            }
            host.trace_step(interpreter);
            (plain[index])(interpreter, host);
            host.trace_step_end(interpreter);
        }
    });

    let mut shared_memory = SharedMemory::new();
    let mut stack: Vec<Frame> = Vec::new();

    let mut current = match make_frame::<SPEC>(host, first)? {
        FrameOrResult::Frame(frame) => frame,
        FrameOrResult::Result(result) => return Ok(result),
    };

    loop {
        let action = current.interpreter.run(shared_memory, &table, host);
        shared_memory = current.interpreter.take_memory();

        if host.timed_out {
            return Err(BlockExecutionError::Timeout);
        }
        if let Some(err) = host.db_error.take() {
            return Err(err.into());
        }

        match action {
            InterpreterAction::Call { inputs } => {
                match make_frame::<SPEC>(host, FrameInput::Call(inputs))? {
                    FrameOrResult::Frame(frame) => {
                        host.depth += 1;
                        shared_memory.new_context();
                        stack.push(current);
                        current = frame;
                    }
                    FrameOrResult::Result(FrameResult::Call(outcome)) => {
                        current.interpreter.insert_call_outcome(&mut shared_memory, outcome);
                    }
                    FrameOrResult::Result(FrameResult::Create(_)) => {
                        return Err(BlockExecutionError::Internal(
                            "call frame produced a create result".into(),
                        ));
                    }
                }
            }
            InterpreterAction::Create { inputs } => {
                match make_frame::<SPEC>(host, FrameInput::Create(inputs))? {
                    FrameOrResult::Frame(frame) => {
                        host.depth += 1;
                        shared_memory.new_context();
                        stack.push(current);
                        current = frame;
                    }
                    FrameOrResult::Result(FrameResult::Create(outcome)) => {
                        current.interpreter.insert_create_outcome(outcome);
                    }
                    FrameOrResult::Result(FrameResult::Call(_)) => {
                        return Err(BlockExecutionError::Internal(
                            "create frame produced a call result".into(),
                        ));
                    }
                }
            }
            InterpreterAction::Return { result } => {
                let frame_result = finish_frame::<SPEC>(host, &current, result);
                match stack.pop() {
                    Some(mut parent) => {
                        host.depth -= 1;
                        shared_memory.free_context();
                        match frame_result {
                            FrameResult::Call(outcome) => {
                                parent.interpreter.insert_call_outcome(&mut shared_memory, outcome);
                            }
                            FrameResult::Create(outcome) => {
                                parent.interpreter.insert_create_outcome(outcome);
                            }
                        }
                        current = parent;
                    }
                    None => return Ok(frame_result),
                }
            }
            InterpreterAction::EOFCreate { .. } => {
                return Err(BlockExecutionError::Internal("EOF is not enabled".into()));
            }
            InterpreterAction::None => {
                return Err(BlockExecutionError::Internal("interpreter yielded no action".into()));
            }
        }
    }
}

fn make_frame<SPEC: Spec>(
    host: &mut EvmHost<'_, '_>,
    input: FrameInput,
) -> Result<FrameOrResult, BlockExecutionError> {
    match input {
        FrameInput::Call(inputs) => make_call_frame::<SPEC>(host, &inputs),
        FrameInput::Create(inputs) => make_create_frame::<SPEC>(host, &inputs),
    }
}

fn call_result(
    result: InstructionResult,
    gas: Gas,
    output: Bytes,
    memory_offset: std::ops::Range<usize>,
) -> FrameOrResult {
    FrameOrResult::Result(FrameResult::Call(CallOutcome::new(
        InterpreterResult { result, output, gas },
        memory_offset,
    )))
}

fn create_result(result: InstructionResult, gas: Gas) -> FrameOrResult {
    FrameOrResult::Result(FrameResult::Create(CreateOutcome::new(
        InterpreterResult { result, output: Bytes::new(), gas },
        None,
    )))
}

fn make_call_frame<SPEC: Spec>(
    host: &mut EvmHost<'_, '_>,
    inputs: &CallInputs,
) -> Result<FrameOrResult, BlockExecutionError> {
    let gas = Gas::new(inputs.gas_limit);
    let memory_offset = inputs.return_memory_offset.clone();

    if host.depth >= CALL_STACK_LIMIT {
        return Ok(call_result(InstructionResult::CallTooDeep, gas, Bytes::new(), memory_offset));
    }

    let checkpoint = host.state.snapshot();
    let logs_checkpoint = host.logs.len();

    if let CallValue::Transfer(value) = inputs.value {
        if value.is_zero() {
            host.state.touch(inputs.target_address)?;
        } else {
            if host.state.get_balance(inputs.caller)? < value {
                return Ok(call_result(
                    InstructionResult::OutOfFunds,
                    gas,
                    Bytes::new(),
                    memory_offset,
                ));
            }
            host.state.sub_balance(inputs.caller, value)?;
            host.state.add_balance(inputs.target_address, value)?;
        }
    }

    let precompiles = Precompiles::new(PrecompileSpecId::from_spec_id(SPEC::SPEC_ID));
    if let Some(precompile) = precompiles.get(&inputs.bytecode_address) {
        let outcome =
            run_precompile(host, precompile, &inputs.input, inputs.gas_limit, memory_offset);
        if !outcome.result.result.is_ok() {
            host.state.revert_to_snapshot(checkpoint);
            host.logs.truncate(logs_checkpoint);
        }
        return Ok(FrameOrResult::Result(FrameResult::Call(outcome)));
    }

    let code = host.state.get_code(inputs.bytecode_address)?.unwrap_or_default();
    if code.is_empty() {
        return Ok(call_result(InstructionResult::Stop, gas, Bytes::new(), memory_offset));
    }
    let code_hash = host.state.get_code_hash(inputs.bytecode_address)?;

    let contract = Contract::new(
        inputs.input.clone(),
        Bytecode::new_raw(code),
        Some(code_hash),
        inputs.target_address,
        Some(inputs.bytecode_address),
        inputs.caller,
        inputs.value.get(),
    );
    Ok(FrameOrResult::Frame(Frame {
        interpreter: Interpreter::new(contract, inputs.gas_limit, inputs.is_static),
        checkpoint,
        logs_checkpoint,
        data: FrameData::Call { return_memory_offset: inputs.return_memory_offset.clone() },
    }))
}

fn make_create_frame<SPEC: Spec>(
    host: &mut EvmHost<'_, '_>,
    inputs: &CreateInputs,
) -> Result<FrameOrResult, BlockExecutionError> {
    let gas = Gas::new(inputs.gas_limit);

    if host.depth >= CALL_STACK_LIMIT {
        return Ok(create_result(InstructionResult::CallTooDeep, gas));
    }

    if SPEC::enabled(SpecId::SHANGHAI) && inputs.init_code.len() > MAX_INITCODE_SIZE {
        return Ok(create_result(InstructionResult::CreateInitCodeSizeLimit, gas));
    }

    if host.state.get_balance(inputs.caller)? < inputs.value {
        return Ok(create_result(InstructionResult::OutOfFunds, gas));
    }

    // the caller nonce bump survives a failed create
    let old_nonce = host.state.get_nonce(inputs.caller)?;
    if old_nonce == u64::MAX {
        return Ok(create_result(InstructionResult::Return, gas));
    }
    host.state.set_nonce(inputs.caller, old_nonce + 1)?;

    let created_address = inputs.created_address(old_nonce);
    host.state.add_address_to_access_list(created_address);

    // address collision: anything with code or a nonce lives there already
    let existing_nonce = host.state.get_nonce(created_address)?;
    let existing_hash = host.state.get_code_hash(created_address)?;
    if existing_nonce != 0 ||
        (existing_hash != aura_primitives::constants::KECCAK_EMPTY &&
            existing_hash != B256::ZERO)
    {
        return Ok(create_result(InstructionResult::CreateCollision, gas));
    }

    let checkpoint = host.state.snapshot();
    let logs_checkpoint = host.logs.len();

    host.state.create_account(created_address, true)?;
    if SPEC::enabled(SpecId::SPURIOUS_DRAGON) {
        host.state.set_nonce(created_address, 1)?;
    }

    if !inputs.value.is_zero() {
        host.state.sub_balance(inputs.caller, inputs.value)?;
        host.state.add_balance(created_address, inputs.value)?;
    }

    let contract = Contract::new(
        Bytes::new(),
        Bytecode::new_raw(inputs.init_code.clone()),
        None,
        created_address,
        None,
        inputs.caller,
        inputs.value,
    );
    Ok(FrameOrResult::Frame(Frame {
        interpreter: Interpreter::new(contract, inputs.gas_limit, false),
        checkpoint,
        logs_checkpoint,
        data: FrameData::Create { created_address },
    }))
}

fn finish_frame<SPEC: Spec>(
    host: &mut EvmHost<'_, '_>,
    frame: &Frame,
    mut result: InterpreterResult,
) -> FrameResult {
    match &frame.data {
        FrameData::Call { return_memory_offset } => {
            if !result.result.is_ok() {
                host.state.revert_to_snapshot(frame.checkpoint);
                host.logs.truncate(frame.logs_checkpoint);
            }
            FrameResult::Call(CallOutcome::new(result, return_memory_offset.clone()))
        }
        FrameData::Create { created_address } => {
            let created_address = *created_address;
            if result.result.is_ok() {
                let code = std::mem::take(&mut result.output);

                if SPEC::enabled(SpecId::LONDON) && code.first() == Some(&0xEF) {
                    host.state.revert_to_snapshot(frame.checkpoint);
                    host.logs.truncate(frame.logs_checkpoint);
                    result.result = InstructionResult::CreateContractStartingWithEF;
                    return FrameResult::Create(CreateOutcome::new(result, Some(created_address)));
                }
                if SPEC::enabled(SpecId::SPURIOUS_DRAGON) && code.len() > MAX_CODE_SIZE {
                    host.state.revert_to_snapshot(frame.checkpoint);
                    host.logs.truncate(frame.logs_checkpoint);
                    result.result = InstructionResult::CreateContractSizeLimit;
                    return FrameResult::Create(CreateOutcome::new(result, Some(created_address)));
                }

                let deposit_cost = code.len() as u64 * CODE_DEPOSIT_GAS_PER_BYTE;
                if !result.gas.record_cost(deposit_cost) {
                    if SPEC::enabled(SpecId::HOMESTEAD) {
                        host.state.revert_to_snapshot(frame.checkpoint);
                        host.logs.truncate(frame.logs_checkpoint);
                        result.result = InstructionResult::OutOfGas;
                        return FrameResult::Create(CreateOutcome::new(
                            result,
                            Some(created_address),
                        ));
                    }
                    // pre-Homestead: the contract keeps empty code
                } else if let Err(err) = host.state.set_code(created_address, code) {
                    host.db_error = Some(err);
                    result.result = InstructionResult::FatalExternalError;
                    return FrameResult::Create(CreateOutcome::new(result, Some(created_address)));
                }

                result.result = InstructionResult::Return;
            } else {
                host.state.revert_to_snapshot(frame.checkpoint);
                host.logs.truncate(frame.logs_checkpoint);
            }
            FrameResult::Create(CreateOutcome::new(result, Some(created_address)))
        }
    }
}

fn run_precompile(
    host: &mut EvmHost<'_, '_>,
    precompile: &Precompile,
    input: &Bytes,
    gas_limit: u64,
    memory_offset: std::ops::Range<usize>,
) -> CallOutcome {
    let outcome = match precompile {
        Precompile::Standard(f) => f(input, gas_limit),
        Precompile::Env(f) => f(input, gas_limit, &host.env),
        _ => Err(PrecompileErrors::Fatal { msg: "stateful precompiles are not used".into() }),
    };

    let mut gas = Gas::new(gas_limit);
    let (result, output) = match outcome {
        Ok(output) => {
            if gas.record_cost(output.gas_used) {
                (InstructionResult::Return, output.bytes)
            } else {
                let _ = gas.record_cost(gas.remaining());
                (InstructionResult::PrecompileOOG, Bytes::new())
            }
        }
        Err(PrecompileErrors::Error(err)) => {
            let result = if matches!(err, PrecompileError::OutOfGas) {
                InstructionResult::PrecompileOOG
            } else {
                InstructionResult::PrecompileError
            };
            // failed precompiles consume the forwarded gas entirely
            let _ = gas.record_cost(gas_limit);
            (result, Bytes::new())
        }
        Err(PrecompileErrors::Fatal { .. }) => {
            let _ = gas.record_cost(gas_limit);
            (InstructionResult::FatalExternalError, Bytes::new())
        }
    };

    CallOutcome::new(InterpreterResult { result, output, gas }, memory_offset)
}
