//! aura node binary: configuration, store bootstrap and component wiring.
//! P2P networking and the RPC/engine transports attach as external
//! collaborators; this binary owns the state plane and the sealing loop.

mod config;
mod node;

use clap::{Parser, Subcommand};
use config::NodeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "aura", version, about = "aura PoA chain node")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file.
    #[arg(long, global = true)]
    datadir: Option<PathBuf>,

    /// Chain to run: mainnet, testnet or private.
    #[arg(long, global = true)]
    chain: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize the data directory and write the genesis block.
    Init {
        /// Genesis JSON of a private chain.
        #[arg(long)]
        genesis: Option<PathBuf>,
    },
    /// Run the node.
    Node {
        /// Produce blocks with the configured miner identity.
        #[arg(long)]
        mine: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn load_config(cli: &Cli) -> eyre::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(datadir) = &cli.datadir {
        config.data_dir = Some(datadir.clone());
    }
    if let Some(chain) = &cli.chain {
        config.chain = Some(chain.clone());
    }
    Ok(config)
}

fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Init { genesis } => node::init(&config, genesis.as_deref()),
        Command::Node { mine } => node::run(&config, mine),
    }
}
