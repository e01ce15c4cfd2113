//! Node assembly: store, consensus engine, mempool, Engine API and the
//! self-driving sealing loop.

use crate::config::NodeConfig;
use alloy_rpc_types_engine::{ForkchoiceState, PayloadAttributes, PayloadStatusEnum};
use aura_chainspec::{AuraChain, ChainSpec, ConsensusKind, MAINNET, TESTNET};
use aura_consensus::{Apoa, Engine, Faker, SealOutcome, SealTask};
use aura_db::{DatabaseEnv, EnvKind};
use aura_engine_api::{block_into_payload, body_versioned_hashes, EngineApi, EngineApiError};
use aura_primitives::{SealedBlock, SealedHeader, B256};
use aura_rpc::EthApi;
use aura_state::{init_genesis, ChainReader};
use aura_txpool::TxPool;
use eyre::{eyre, Context};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, SystemTime},
};
use tracing::{error, info, warn};

fn resolve_chain_spec(
    config: &NodeConfig,
    genesis_path: Option<&Path>,
) -> eyre::Result<Arc<ChainSpec>> {
    let chain: AuraChain = config
        .chain
        .as_deref()
        .unwrap_or("mainnet")
        .parse()
        .map_err(|err| eyre!("{err}"))?;

    let mut spec = match chain {
        AuraChain::Mainnet => (*MAINNET).clone(),
        AuraChain::Testnet => (*TESTNET).clone(),
        AuraChain::Private => {
            let path = genesis_path
                .map(Path::to_path_buf)
                .or_else(|| config.genesis.clone())
                .ok_or_else(|| eyre!("private chain requires a genesis file"))?;
            let raw = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("reading genesis at {}", path.display()))?;
            let genesis: alloy_genesis::Genesis = serde_json::from_str(&raw)?;
            Arc::new(ChainSpec::from_genesis(genesis))
        }
    };

    // consensus overrides apply to operator-run chains
    if config.consensus.period.is_some() || config.consensus.epoch.is_some() {
        let mut owned = (*spec).clone();
        if let Some(period) = config.consensus.period {
            owned.poa.period = period;
        }
        if let Some(epoch) = config.consensus.epoch {
            owned.poa.epoch = epoch;
        }
        spec = Arc::new(owned);
    }
    Ok(spec)
}

fn data_dir(config: &NodeConfig, spec: &ChainSpec) -> PathBuf {
    config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".aura"))
        .join(spec.chain.name())
}

fn open_store(config: &NodeConfig, spec: &ChainSpec) -> eyre::Result<Arc<DatabaseEnv>> {
    let path = data_dir(config, spec);
    std::fs::create_dir_all(&path)?;
    Ok(Arc::new(DatabaseEnv::open(&path, EnvKind::RW)?))
}

fn build_engine(
    spec: Arc<ChainSpec>,
    db: Arc<DatabaseEnv>,
    config: &NodeConfig,
) -> eyre::Result<Arc<dyn Engine>> {
    match spec.poa.kind {
        ConsensusKind::Faker => Ok(Arc::new(Faker)),
        ConsensusKind::Apoa | ConsensusKind::Apos => {
            let engine = Apoa::new(spec, db);
            if let (Some(etherbase), Some(secret_file)) =
                (config.miner.etherbase, &config.miner.secret_file)
            {
                let raw = std::fs::read_to_string(secret_file)?;
                let secret: B256 = raw.trim().parse()?;
                engine.authorize(etherbase, secret);
                info!(target: "node", %etherbase, "sealing identity loaded");
            }
            Ok(Arc::new(engine))
        }
    }
}

/// `aura init`: create the store and write genesis.
pub fn init(config: &NodeConfig, genesis_path: Option<&Path>) -> eyre::Result<()> {
    let spec = resolve_chain_spec(config, genesis_path)?;
    let db = open_store(config, &spec)?;
    let genesis = init_genesis(&db, &spec)?;
    info!(
        target: "node",
        chain = spec.chain.name(),
        hash = %genesis.hash(),
        "genesis ready"
    );
    Ok(())
}

/// `aura node`: run the node until the process is terminated.
pub fn run(config: &NodeConfig, mine: bool) -> eyre::Result<()> {
    let spec = resolve_chain_spec(config, None)?;
    let db = open_store(config, &spec)?;
    let genesis = init_genesis(&db, &spec)?;
    let engine = build_engine(spec.clone(), db.clone(), config)?;
    let pool = Arc::new(TxPool::new(spec.clone()));

    let engine_api = Arc::new(EngineApi::new(
        spec.clone(),
        db.clone(),
        engine.clone(),
        pool.clone(),
    ));
    let eth_api = Arc::new(EthApi::new(
        spec.clone(),
        db.clone(),
        pool.clone(),
        engine.clone(),
        config.miner.etherbase,
    ));

    info!(
        target: "node",
        chain = spec.chain.name(),
        genesis = %genesis.hash(),
        http = %format!("{}:{}", config.rpc.http.addr, config.rpc.http.port),
        authrpc = %format!("{}:{}", config.authrpc.addr, config.authrpc.port),
        "node started; transports attach externally"
    );
    // the transports borrow these handles; keep them alive here
    let _ = &eth_api;

    // ctrl-c flips the flag and wakes whatever is waiting
    let shutdown = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            let _ = shutdown_tx.send(());
        })?;
    }

    if mine {
        sealing_loop(&spec, &db, engine, engine_api, shutdown, shutdown_rx)?;
    } else {
        let _ = shutdown_rx.recv();
    }
    info!(target: "node", "shut down cleanly");
    Ok(())
}

fn tip(db: &DatabaseEnv) -> eyre::Result<SealedHeader> {
    let tx = db.tx()?;
    let reader = ChainReader::new(&tx);
    reader.head_header()?.ok_or_else(|| eyre!("no chain head"))
}

/// Drives block production through the node's own Engine API: build a
/// payload on the tip, seal it through the consensus engine (which waits
/// out the slot and the no-turn wiggle), import it, repeat.
///
/// Ctrl-c and a full disk both drain the sealer thread through its stop
/// channel; open read-write transactions are scoped and abort on drop.
fn sealing_loop(
    spec: &ChainSpec,
    db: &DatabaseEnv,
    engine: Arc<dyn Engine>,
    engine_api: Arc<EngineApi>,
    shutdown: Arc<AtomicBool>,
    shutdown_rx: mpsc::Receiver<()>,
) -> eyre::Result<()> {
    let period = Duration::from_secs(spec.poa.period.max(1));
    let (out_tx, out_rx) = mpsc::channel();
    let task = SealTask::spawn(engine, out_tx);

    // wake an in-flight seal wait when ctrl-c fires
    let stop_handle = task.stop_handle();
    std::thread::spawn(move || {
        let _ = shutdown_rx.recv();
        let _ = stop_handle.send(());
    });

    info!(target: "node", period = period.as_secs(), "sealing loop started");

    // a disk-full verdict ends the loop cleanly instead of bubbling up
    let mut disk_full = false;

    while !shutdown.load(Ordering::SeqCst) && !disk_full {
        let head = tip(db)?;

        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs();
        let attrs = PayloadAttributes {
            timestamp: now.max(head.timestamp + spec.poa.period),
            prev_randao: B256::ZERO,
            suggested_fee_recipient: Default::default(),
            withdrawals: spec
                .is_shanghai_active_at_timestamp(now)
                .then(Vec::new),
            parent_beacon_block_root: spec
                .is_cancun_active_at_timestamp(now)
                .then_some(B256::ZERO),
        };

        let forkchoice = ForkchoiceState {
            head_block_hash: head.hash(),
            safe_block_hash: head.hash(),
            finalized_block_hash: head.hash(),
        };
        let Some(updated) =
            check(engine_api.forkchoice_updated_v3(forkchoice, Some(attrs)), &mut disk_full)?
        else {
            break;
        };
        let Some(payload_id) = updated.payload_id else {
            warn!(target: "node", "no payload id returned, skipping slot");
            std::thread::sleep(period);
            continue;
        };
        let Some(built) = engine_api.built_payload(payload_id) else {
            warn!(target: "node", %payload_id, "built payload vanished, skipping slot");
            std::thread::sleep(period);
            continue;
        };

        // the engine owns the timing: it waits out the declared timestamp
        // and, off-turn, the randomized wiggle, and skips the slot when
        // the local signer sealed too recently
        if !task.submit(built.block.header.clone().into_header()) {
            break;
        }
        let sealed = match out_rx.recv() {
            Ok(SealOutcome::Sealed(sealed)) => sealed,
            Ok(SealOutcome::Skipped) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(period);
                continue;
            }
            Err(_) => break,
        };

        let block = SealedBlock { header: sealed, body: built.block.body.clone() };
        let payload = block_into_payload(&block);
        let versioned_hashes = body_versioned_hashes(&block.body);
        let Some(status) = check(
            engine_api.new_payload_v3(payload, versioned_hashes, B256::ZERO),
            &mut disk_full,
        )?
        else {
            break;
        };
        match status.status {
            PayloadStatusEnum::Valid => {}
            other => {
                warn!(target: "node", status = ?other, "own payload rejected, skipping slot");
                std::thread::sleep(period);
                continue;
            }
        }

        let next_head = status.latest_valid_hash.unwrap_or_else(|| block.hash());
        if check(
            engine_api.forkchoice_updated_v3(
                ForkchoiceState {
                    head_block_hash: next_head,
                    safe_block_hash: head.hash(),
                    finalized_block_hash: head.hash(),
                },
                None,
            ),
            &mut disk_full,
        )?
        .is_none()
        {
            break;
        }
    }

    // dropping the task closes its work channel and joins the thread
    drop(task);
    info!(target: "node", "sealer drained");
    Ok(())
}

/// Unwraps an Engine API result, converting a full store into a clean
/// shutdown verdict instead of an error.
fn check<T>(
    result: Result<T, EngineApiError>,
    disk_full: &mut bool,
) -> eyre::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_disk_full() => {
            error!(target: "node", %err, "store is full, shutting down");
            *disk_full = true;
            Ok(None)
        }
        Err(err) => Err(eyre::Report::from(err)),
    }
}
