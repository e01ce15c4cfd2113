//! The CL-facing Engine API core: payload ingestion and validation,
//! payload building, forkchoice updates, blob serving and capability
//! discovery. Transport (JWT, HTTP framing) is an external collaborator.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod payload;

pub use payload::{
    block_into_payload, body_versioned_hashes, decode_payload_transactions,
    execution_requests_hash, try_payload_into_block, validate_execution_requests, PayloadError,
};

use alloy_eips::eip4844::{Blob, Bytes48};
use alloy_primitives::{Bytes, B256, U256};
use alloy_rpc_types_engine::{
    ExecutionPayloadEnvelopeV3, ExecutionPayloadV3, ForkchoiceState, ForkchoiceUpdated,
    PayloadAttributes, PayloadId, PayloadStatus, PayloadStatusEnum,
};
use aura_chainspec::{BlobParams, ChainSpec, ConsensusKind};
use aura_consensus::{ApoaError, Engine};
use aura_db::DatabaseEnv;
use aura_evm::{
    apply_transaction, validate_blob_header, validate_blob_transaction, BlockExecutor,
    BlockHashProvider,
};
use aura_primitives::{
    calculate_receipt_root, constants::GAS_PER_BLOB, recover_signers, Bloom, Header, SealedBlock,
    SealedHeader, U256 as PrimU256,
};
use aura_state::{
    ChainReader, ChainWriter, CommitmentWriter, IntraBlockState, PlainStateReader,
    PlainStateWriter,
};
use aura_txpool::TxPool;
use parking_lot::RwLock;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};

/// Sequence-bucket key of payload ids.
const PAYLOAD_ID_SEQUENCE: &str = "PayloadId";

/// Internal Engine API failure; payload-shape problems surface through
/// [`PayloadStatus`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineApiError {
    /// `engine_getPayload` with an unknown id.
    #[error("unknown payload")]
    UnknownPayload,

    /// Store failure.
    #[error(transparent)]
    Database(#[from] aura_db::DatabaseError),

    /// State layer failure.
    #[error(transparent)]
    State(#[from] aura_state::StateError),

    /// Consensus failure that is not a payload verdict.
    #[error(transparent)]
    Consensus(#[from] ApoaError),

    /// Mempool failure while building a payload.
    #[error(transparent)]
    Pool(#[from] aura_txpool::PoolError),
}

impl EngineApiError {
    /// Whether the failure is an exhausted store, which shuts the node
    /// down cleanly rather than being retried.
    pub fn is_disk_full(&self) -> bool {
        match self {
            Self::Database(err) => matches!(err, aura_db::DatabaseError::DiskFull),
            Self::State(aura_state::StateError::Database(err)) => {
                matches!(err, aura_db::DatabaseError::DiskFull)
            }
            Self::Consensus(aura_consensus::ApoaError::Database(err)) => {
                matches!(err, aura_db::DatabaseError::DiskFull)
            }
            _ => false,
        }
    }
}

/// A locally built payload awaiting `engine_getPayload` (or the node's
/// own sealing loop). The seal is still zeroed: signing happens at
/// delivery, or through the consensus engine's slot-aware `seal`.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    /// The assembled, not yet sealed block.
    pub block: SealedBlock,
    /// Total proposer fees, in wei.
    pub fees: U256,
}

/// `engine_getBlobsV1` response element.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobAndProofV1 {
    /// The blob payload.
    pub blob: Box<Blob>,
    /// Its KZG proof.
    pub proof: Bytes48,
}

/// One fork's entry of `engine_getBlobScheduleV1`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobScheduleEntryV1 {
    /// Target blobs per block.
    pub target: u64,
    /// Maximum blobs per block.
    pub max: u64,
    /// Blob base fee update fraction.
    pub base_fee_update_fraction: u64,
}

impl From<BlobParams> for BlobScheduleEntryV1 {
    fn from(params: BlobParams) -> Self {
        Self {
            target: params.target_blobs_per_block,
            max: params.max_blobs_per_block,
            base_fee_update_fraction: params.base_fee_update_fraction,
        }
    }
}

/// `engine_getBlobScheduleV1` response.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobScheduleV1 {
    /// The Cancun schedule.
    pub cancun: BlobScheduleEntryV1,
    /// The Pectra schedule.
    pub prague: BlobScheduleEntryV1,
}

/// `engine_getPayloadV4` envelope: the V3 envelope plus the EIP-7685
/// execution requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayloadEnvelopeV4 {
    /// The V3 envelope.
    #[serde(flatten)]
    pub envelope_inner: ExecutionPayloadEnvelopeV3,
    /// Type-prefixed execution-request entries.
    pub execution_requests: Vec<Bytes>,
}

struct ChainHashes<'a, 'tx, K: libmdbx::TransactionKind> {
    reader: &'a ChainReader<'tx, K>,
}

impl<'a, 'tx, K: libmdbx::TransactionKind> BlockHashProvider for ChainHashes<'a, 'tx, K> {
    fn block_hash(&self, number: u64) -> Option<B256> {
        self.reader.canonical_hash(number).ok().flatten()
    }
}

/// The Engine API surface.
pub struct EngineApi {
    chain_spec: Arc<ChainSpec>,
    db: Arc<DatabaseEnv>,
    engine: Arc<dyn Engine>,
    pool: Arc<TxPool>,
    payloads: RwLock<HashMap<PayloadId, BuiltPayload>>,
}

impl std::fmt::Debug for EngineApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineApi").field("chain", &self.chain_spec.chain).finish()
    }
}

fn invalid(reason: impl ToString) -> PayloadStatus {
    PayloadStatus::new(
        PayloadStatusEnum::Invalid { validation_error: reason.to_string() },
        None,
    )
}

impl EngineApi {
    /// New API over the node's components.
    pub fn new(
        chain_spec: Arc<ChainSpec>,
        db: Arc<DatabaseEnv>,
        engine: Arc<dyn Engine>,
        pool: Arc<TxPool>,
    ) -> Self {
        Self { chain_spec, db, engine, pool, payloads: RwLock::new(HashMap::new()) }
    }

    /// `engine_newPayloadV3`.
    pub fn new_payload_v3(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
    ) -> Result<PayloadStatus, EngineApiError> {
        self.new_payload_inner(payload, versioned_hashes, parent_beacon_block_root, None)
    }

    /// `engine_newPayloadV4`: V3 plus the EIP-7685 requests array, whose
    /// commitment must match the block.
    pub fn new_payload_v4(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
        execution_requests: Vec<Bytes>,
    ) -> Result<PayloadStatus, EngineApiError> {
        if let Err(err) = validate_execution_requests(&execution_requests) {
            return Ok(invalid(err));
        }
        let requests_hash = execution_requests_hash(&execution_requests);
        self.new_payload_inner(
            payload,
            versioned_hashes,
            parent_beacon_block_root,
            Some(requests_hash),
        )
    }

    fn new_payload_inner(
        &self,
        payload: ExecutionPayloadV3,
        versioned_hashes: Vec<B256>,
        parent_beacon_block_root: B256,
        requests_hash: Option<B256>,
    ) -> Result<PayloadStatus, EngineApiError> {
        let block =
            match try_payload_into_block(&payload, parent_beacon_block_root, requests_hash) {
                Ok(block) => block,
                Err(err) => return Ok(invalid(err)),
            };

        if body_versioned_hashes(&block.body) != versioned_hashes {
            return Ok(invalid(PayloadError::VersionedHashesMismatch));
        }

        // parent must be locally known and, without a block tree, canonical
        let parent = {
            let tx = self.db.tx()?;
            let reader = ChainReader::new(&tx);
            let Some(parent) = reader.header_by_hash(block.header.parent_hash)? else {
                debug!(target: "engine", hash = %block.hash(), "parent unknown, syncing");
                return Ok(PayloadStatus::from_status(PayloadStatusEnum::Syncing));
            };
            let head = reader.head_header_hash()?;
            if head != Some(parent.hash()) {
                debug!(target: "engine", hash = %block.hash(), "side-branch payload accepted, not executed");
                return Ok(PayloadStatus::from_status(PayloadStatusEnum::Accepted));
            }
            parent
        };

        if let Err(err) = self.engine.verify_header(&block.header, &parent) {
            return Ok(invalid(err));
        }
        if let Err(err) = validate_blob_header(&self.chain_spec, &parent, &block.header) {
            return Ok(invalid(err));
        }
        let unsealed = block.clone().unseal();
        if let Err(err) = validate_blob_transaction(&self.chain_spec, &unsealed) {
            return Ok(invalid(err));
        }

        match self.import_block(&block, &parent) {
            Ok(()) => {
                info!(target: "engine", number = block.number(), hash = %block.hash(), "payload imported");
                Ok(PayloadStatus::new(
                    PayloadStatusEnum::Valid,
                    Some(block.hash()),
                ))
            }
            Err(ImportError::Invalid(reason)) => Ok(invalid(reason)),
            Err(ImportError::Internal(err)) => Err(err),
        }
    }

    /// Executes and commits a payload whose parent is the canonical tip.
    fn import_block(
        &self,
        block: &SealedBlock,
        parent: &SealedHeader,
    ) -> Result<(), ImportError> {
        let senders = recover_signers(&block.body.transactions)
            .map_err(|_| ImportError::Invalid("sender recovery failed".into()))?;
        let with_senders = aura_primitives::BlockWithSenders {
            block: block.clone().unseal(),
            senders: senders.clone(),
        };

        let tx = self.db.tx_mut().map_err(|e| ImportError::Internal(e.into()))?;
        {
            let reader = ChainReader::new(&tx);
            let plain = PlainStateReader::new(&tx);
            let mut state = IntraBlockState::new(&plain);
            let hashes = ChainHashes { reader: &reader };

            let executor = BlockExecutor::new(&self.chain_spec);
            let outcome = executor
                .execute_and_verify(&with_senders, &mut state, &hashes)
                .map_err(|err| ImportError::Invalid(err.to_string()))?;

            let mut writer =
                PlainStateWriter::new(&tx, block.number(), parent.state_root);
            let state_root =
                state.commit_block(&mut writer).map_err(|e| ImportError::Internal(e.into()))?;
            if state_root != block.header.state_root {
                return Err(ImportError::Invalid(format!(
                    "state root mismatch: got {state_root}, declared {}",
                    block.header.state_root
                )));
            }

            let writer = ChainWriter::new(&tx);
            let parent_td = reader
                .td(parent.number(), parent.hash())
                .map_err(|e| ImportError::Internal(e.into()))?
                .unwrap_or(parent.difficulty);
            let td = parent_td + block.header.difficulty;
            writer
                .write_block(&block.header, &block.body, &senders, td)
                .map_err(|e| ImportError::Internal(e.into()))?;
            writer
                .write_receipts(block.number(), &outcome.receipts)
                .map_err(|e| ImportError::Internal(e.into()))?;
        }
        tx.commit().map_err(|e| ImportError::Internal(EngineApiError::Database(e)))?;

        // mined transactions leave the pool
        self.pool
            .remove_transactions(block.body.transactions.iter().map(|tx| tx.hash()));
        Ok(())
    }

    /// `engine_forkchoiceUpdatedV3` (V4 shares the semantics).
    pub fn forkchoice_updated_v3(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineApiError> {
        let head_hash = state.head_block_hash;
        if head_hash.is_zero() {
            return Ok(ForkchoiceUpdated::new(PayloadStatus::from_status(
                PayloadStatusEnum::Invalid { validation_error: "zero head block hash".into() },
            )));
        }

        let head = {
            let tx = self.db.tx()?;
            let reader = ChainReader::new(&tx);
            let Some(head) = reader.header_by_hash(head_hash)? else {
                debug!(target: "engine", %head_hash, "forkchoice head unknown, syncing");
                return Ok(ForkchoiceUpdated::new(PayloadStatus::from_status(
                    PayloadStatusEnum::Syncing,
                )));
            };
            // without a block tree only canonical blocks can become head
            if reader.canonical_hash(head.number())? != Some(head.hash()) {
                return Ok(ForkchoiceUpdated::new(PayloadStatus::from_status(
                    PayloadStatusEnum::Syncing,
                )));
            }
            head
        };

        self.db.update(|tx| {
            let writer = ChainWriter::new(tx);
            writer.set_head_header(head.hash()).map_err(|_| {
                aura_db::DatabaseError::Internal("failed to move head".into())
            })?;
            writer.set_head_block(head.hash()).map_err(|_| {
                aura_db::DatabaseError::Internal("failed to move head".into())
            })?;
            Ok(())
        })?;

        let mut response =
            ForkchoiceUpdated::new(PayloadStatus::new(PayloadStatusEnum::Valid, Some(head.hash())));
        if let Some(attrs) = attrs {
            match self.build_payload(&head, attrs) {
                Ok(payload_id) => response = response.with_payload_id(payload_id),
                Err(err) => {
                    warn!(target: "engine", %err, "payload build failed");
                    return Err(err);
                }
            }
        }
        Ok(response)
    }

    /// `engine_forkchoiceUpdatedV4`: V3 semantics with V4 payload
    /// building.
    pub fn forkchoice_updated_v4(
        &self,
        state: ForkchoiceState,
        attrs: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineApiError> {
        self.forkchoice_updated_v3(state, attrs)
    }

    /// Builds a payload on `head` from pool content and remembers it under
    /// a fresh id.
    fn build_payload(
        &self,
        head: &SealedHeader,
        attrs: PayloadAttributes,
    ) -> Result<PayloadId, EngineApiError> {
        let mut header = Header::default();
        self.engine.prepare(head, &mut header)?;
        header.timestamp = attrs.timestamp;
        header.gas_limit = head.gas_limit;
        header.base_fee_per_gas = self.chain_spec.next_block_base_fee(head);
        header.parent_beacon_block_root = attrs.parent_beacon_block_root;
        if self.chain_spec.is_cancun_active_at_timestamp(header.timestamp) {
            header.excess_blob_gas =
                self.chain_spec.next_block_excess_blob_gas(head, header.timestamp);
        }

        let withdrawals = attrs.withdrawals.unwrap_or_default();
        let max_blob_gas = self
            .chain_spec
            .blob_params_at_timestamp(header.timestamp)
            .map(|params| params.max_blobs_per_block * GAS_PER_BLOB)
            .unwrap_or_default();

        let tx = self.db.tx()?;
        let reader = ChainReader::new(&tx);
        let plain = PlainStateReader::new(&tx);
        let hashes = ChainHashes { reader: &reader };
        let mut state = IntraBlockState::new(&plain);

        let delete_empty =
            self.chain_spec.is_spurious_dragon_active_at_block(header.number);
        let mut included = Vec::new();
        let mut senders = Vec::new();
        let mut receipts = Vec::new();
        let mut fees = U256::ZERO;
        let mut cumulative_gas = 0u64;
        let mut blob_gas = 0u64;

        for pooled in self.pool.best_transactions(&plain, header.base_fee_per_gas)? {
            if cumulative_gas + pooled.tx.gas_limit() > header.gas_limit {
                continue;
            }
            let tx_blob_gas = pooled.tx.blob_gas().unwrap_or_default();
            if blob_gas + tx_blob_gas > max_blob_gas {
                continue;
            }

            let snapshot = state.snapshot();
            match apply_transaction(
                &self.chain_spec,
                &header,
                &mut state,
                &hashes,
                &pooled.tx,
                pooled.sender,
                None,
                None,
            ) {
                Ok(result) => {
                    state.finalize(delete_empty);
                    cumulative_gas += result.gas_used;
                    blob_gas += tx_blob_gas;
                    let tip =
                        pooled.tx.effective_tip_per_gas(header.base_fee_per_gas).unwrap_or_default();
                    fees += U256::from(result.gas_used) * U256::from(tip);
                    receipts.push(aura_primitives::Receipt {
                        tx_type: pooled.tx.tx_type(),
                        success: result.success,
                        cumulative_gas_used: cumulative_gas,
                        logs: result.logs,
                    });
                    senders.push(pooled.sender);
                    included.push(pooled.tx.clone());
                }
                Err(err) => {
                    state.revert_to_snapshot(snapshot);
                    debug!(target: "engine", tx = %pooled.tx.hash(), %err, "transaction skipped");
                }
            }
        }

        for withdrawal in &withdrawals {
            state.add_balance(
                withdrawal.address,
                PrimU256::from(withdrawal.amount) *
                    PrimU256::from(aura_primitives::constants::GWEI_TO_WEI),
            )?;
        }
        state.finalize(delete_empty);

        let mut writer = CommitmentWriter::new(head.state_root);
        let state_root = state.commit_block(&mut writer)?;
        drop(state);
        tx.commit()?;

        let body = aura_primitives::BlockBody {
            transactions: included,
            withdrawals: Some(withdrawals.clone()),
        };
        header.state_root = state_root;
        header.gas_used = cumulative_gas;
        header.transactions_root = body.calculate_tx_root();
        header.receipts_root = calculate_receipt_root(&receipts);
        header.logs_bloom =
            receipts.iter().fold(Bloom::ZERO, |bloom, receipt| bloom | receipt.bloom_slow());
        header.withdrawals_root =
            Some(alloy_consensus::proofs::calculate_withdrawals_root(&withdrawals));
        if self.chain_spec.is_cancun_active_at_timestamp(header.timestamp) {
            header.blob_gas_used = Some(blob_gas);
        }
        if self.chain_spec.is_prague_active_at_timestamp(header.timestamp) {
            header.requests_hash = Some(execution_requests_hash(&[]));
        }
        // the staked variant commits the pre-reward state root in the mix
        // digest; plain PoA keeps it zero
        header.mix_hash = match self.engine.kind() {
            ConsensusKind::Apos => state_root,
            _ => B256::ZERO,
        };
        debug_assert!(aura_evm::check_receipt_invariants(
            &receipts,
            &body.transactions.iter().map(|tx| tx.tx_type()).collect::<Vec<_>>(),
        ));

        // the seal stays zeroed here: `get_payload` signs at delivery and
        // the node's sealing loop goes through the engine's slot-aware
        // `seal`, which owns the no-turn wiggle
        let block = SealedBlock {
            header: SealedHeader::seal_slow(header),
            body,
        };
        let payload_id = {
            let seq = self.db.update(|tx| tx.increment_sequence(PAYLOAD_ID_SEQUENCE, 1))?;
            PayloadId::new(seq.to_be_bytes())
        };
        info!(
            target: "engine",
            id = %payload_id,
            number = block.number(),
            txs = block.body.transactions.len(),
            "payload built"
        );
        self.payloads.write().insert(payload_id, BuiltPayload { block, fees });
        Ok(payload_id)
    }

    /// The raw (unsealed) built payload, for the in-process sealing loop,
    /// which signs through the consensus engine instead of at delivery.
    pub fn built_payload(&self, payload_id: PayloadId) -> Option<BuiltPayload> {
        self.payloads.read().get(&payload_id).cloned()
    }

    /// `engine_getPayloadV3`. The header is signed at delivery; signing is
    /// deterministic, so repeated fetches return the same block hash.
    pub fn get_payload_v3(
        &self,
        payload_id: PayloadId,
    ) -> Result<ExecutionPayloadEnvelopeV3, EngineApiError> {
        let payload =
            self.payloads.read().get(&payload_id).cloned().ok_or(EngineApiError::UnknownPayload)?;

        let mut header = payload.block.header.into_header();
        match self.engine.sign_prepared(&mut header) {
            Ok(()) => {}
            Err(ApoaError::NoLocalSigner) => {
                debug!(target: "engine", "no local signer, payload delivered unsealed");
            }
            Err(err) => return Err(err.into()),
        }
        let block =
            SealedBlock { header: SealedHeader::seal_slow(header), body: payload.block.body };

        let mut blobs_bundle = alloy_rpc_types_engine::BlobsBundleV1 {
            commitments: Vec::new(),
            proofs: Vec::new(),
            blobs: Vec::new(),
        };
        for tx in &block.body.transactions {
            if let Some(sidecar) = self.pool.sidecar(&tx.hash()) {
                blobs_bundle.commitments.extend(sidecar.commitments.iter().copied());
                blobs_bundle.proofs.extend(sidecar.proofs.iter().copied());
                blobs_bundle.blobs.extend(sidecar.blobs.iter().copied());
            }
        }

        Ok(ExecutionPayloadEnvelopeV3 {
            execution_payload: block_into_payload(&block),
            block_value: payload.fees,
            blobs_bundle,
            should_override_builder: false,
        })
    }

    /// `engine_getPayloadV4`.
    pub fn get_payload_v4(
        &self,
        payload_id: PayloadId,
    ) -> Result<ExecutionPayloadEnvelopeV4, EngineApiError> {
        Ok(ExecutionPayloadEnvelopeV4 {
            envelope_inner: self.get_payload_v3(payload_id)?,
            // local payloads carry no CL-bound requests
            execution_requests: Vec::new(),
        })
    }

    /// `engine_getBlobsV1`.
    pub fn get_blobs_v1(&self, versioned_hashes: Vec<B256>) -> Vec<Option<BlobAndProofV1>> {
        self.pool
            .blobs_by_versioned_hashes(&versioned_hashes)
            .into_iter()
            .map(|entry| {
                entry.map(|(blob, proof)| BlobAndProofV1 { blob: Box::new(blob), proof })
            })
            .collect()
    }

    /// `engine_getBlobScheduleV1`.
    pub fn get_blob_schedule_v1(&self) -> BlobScheduleV1 {
        BlobScheduleV1 {
            cancun: BlobParams::cancun().into(),
            prague: BlobParams::prague().into(),
        }
    }

    /// `engine_getClientCapabilitiesV1`.
    pub fn get_client_capabilities_v1(&self) -> Vec<&'static str> {
        vec![
            "engine_newPayloadV3",
            "engine_newPayloadV4",
            "engine_getPayloadV3",
            "engine_getPayloadV4",
            "engine_forkchoiceUpdatedV3",
            "engine_forkchoiceUpdatedV4",
            "engine_getBlobsV1",
            "engine_getBlobScheduleV1",
            "engine_getClientCapabilitiesV1",
        ]
    }
}

enum ImportError {
    Invalid(String),
    Internal(EngineApiError),
}
