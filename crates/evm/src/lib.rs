//! The execution engine: applies transactions deterministically over an
//! [`aura_state::IntraBlockState`], driving the revm interpreter through a
//! host that carries the journaled state, access lists and transient
//! storage of this chain.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod blob;
mod config;
mod error;
mod executor;
mod frames;
mod host;
mod message;
mod tracer;

pub use blob::{validate_blob_header, validate_blob_transaction, BlobError};
pub use config::{
    fill_block_env, fill_cfg_env, fill_tx_env, precompile_addresses, spec_id_at_header,
};
pub use error::{BlockExecutionError, InvalidTransaction};
pub use executor::{check_receipt_invariants, BlockExecutor, ExecutionOutcome};
pub use host::{BlockHashProvider, EmptyBlockHashes, EvmHost};
pub use message::{
    apply_call, apply_transaction, intrinsic_gas, ApplyError, CallMessage, MessageResult,
};
pub use tracer::{StepTracer, StructLog, StructLogTracer, TraceConfig};
