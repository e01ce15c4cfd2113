//! Ethereum JSON-RPC method semantics over the state plane.
//!
//! This crate implements what the methods *do*: block-tag resolution onto
//! the plain or historical readers, simulations over a throwaway
//! intra-block state, receipts/log assembly and the filter registry.
//! Transport framing and dispatch are external collaborators; the error
//! type carries the JSON-RPC code each failure maps to.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod debug;
pub mod ens;
mod error;
mod eth;
mod net;
pub mod types;

pub use debug::{TraceBlockItem, TraceOptions, DEFAULT_TRACE_TIMEOUT};
pub use error::{
    EthApiError, BLOCK_NOT_AVAILABLE_CODE, EXECUTION_ERROR_CODE, INTERNAL_ERROR_CODE,
    INVALID_PARAMS_CODE,
};
pub use eth::{
    AccountOverride, CallRequest, EthApi, FilterChanges, FilterStore, StateOverride,
};
pub use net::CLIENT_VERSION;
