//! Chain specifications: chain ids, genesis definitions, hardfork
//! schedules and the PoA consensus parameters.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod spec;

pub use spec::{
    seal_extra_data, AuraChain, BaseFeeParams, BlobParams, ChainSpec, ConsensusKind,
    ForkCondition, Hardfork, PoaConfig, UnknownChain, DEV_PERIOD, INITIAL_BASE_FEE, MAINNET,
    TESTNET,
};
