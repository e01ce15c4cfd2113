//! Node configuration file.

use aura_primitives::Address;
use serde::Deserialize;
use std::path::PathBuf;

/// Top-level node configuration, loaded from a TOML file with CLI
/// overrides applied on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Location of the KV store.
    pub data_dir: Option<PathBuf>,
    /// `mainnet` | `testnet` | `private`.
    pub chain: Option<String>,
    /// Genesis file of a `private` chain.
    pub genesis: Option<PathBuf>,
    /// Consensus overrides.
    pub consensus: ConsensusConfig,
    /// RPC surfaces (served by the external transport).
    pub rpc: RpcConfig,
    /// JWT-secured engine API endpoint (served externally).
    pub authrpc: AuthRpcConfig,
    /// Networking knobs, consumed by the external networking stack.
    pub p2p: P2pConfig,
    /// Block production identity.
    pub miner: MinerConfig,
}

/// `[consensus]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsensusConfig {
    /// Minimum seconds between blocks.
    pub period: Option<u64>,
    /// Blocks per epoch.
    pub epoch: Option<u64>,
}

/// `[rpc]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    /// HTTP endpoint.
    pub http: RpcEndpointConfig,
    /// WebSocket endpoint.
    pub ws: RpcWsConfig,
}

/// `[rpc.http]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcEndpointConfig {
    /// Bind address.
    pub addr: String,
    /// Bind port.
    pub port: u16,
    /// Enabled namespaces.
    pub api: Vec<String>,
}

impl Default for RpcEndpointConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".into(),
            port: 8545,
            api: vec!["eth".into(), "net".into(), "web3".into()],
        }
    }
}

/// `[rpc.ws]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcWsConfig {
    /// Bind address.
    pub addr: String,
    /// Bind port.
    pub port: u16,
    /// Enabled namespaces.
    pub api: Vec<String>,
    /// Allowed origins.
    pub origins: Vec<String>,
}

impl Default for RpcWsConfig {
    fn default() -> Self {
        Self { addr: "127.0.0.1".into(), port: 8546, api: vec!["eth".into()], origins: vec![] }
    }
}

/// `[authrpc]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthRpcConfig {
    /// Bind address.
    pub addr: String,
    /// Bind port.
    pub port: u16,
    /// Path to the JWT secret file.
    pub jwtsecret: Option<PathBuf>,
}

impl Default for AuthRpcConfig {
    fn default() -> Self {
        Self { addr: "127.0.0.1".into(), port: 8551, jwtsecret: None }
    }
}

/// `[p2p]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct P2pConfig {
    /// TCP listen port.
    pub tcp_port: u16,
    /// UDP discovery port.
    pub udp_port: u16,
    /// Peer cap.
    pub max_peers: usize,
    /// Static bootnodes.
    pub bootnodes: Vec<String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self { tcp_port: 30303, udp_port: 30303, max_peers: 50, bootnodes: vec![] }
    }
}

/// `[miner]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinerConfig {
    /// Signing address when acting as a PoA proposer.
    pub etherbase: Option<Address>,
    /// File holding the 32-byte hex signing key for `etherbase`.
    pub secret_file: Option<PathBuf>,
}

impl NodeConfig {
    /// Loads the TOML config at `path`.
    pub fn load(path: &std::path::Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_parse() {
        let config: NodeConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/aura"
            chain = "testnet"

            [consensus]
            period = 4
            epoch = 30000

            [rpc.http]
            addr = "0.0.0.0"
            port = 8545
            api = ["eth", "debug"]

            [authrpc]
            addr = "127.0.0.1"
            port = 8551

            [p2p]
            tcp_port = 30404
            udp_port = 30404
            max_peers = 25

            [miner]
            etherbase = "0x1111111111111111111111111111111111111111"
            "#,
        )
        .unwrap();
        assert_eq!(config.chain.as_deref(), Some("testnet"));
        assert_eq!(config.consensus.period, Some(4));
        assert_eq!(config.rpc.http.api, vec!["eth", "debug"]);
        assert_eq!(config.p2p.tcp_port, 30404);
        assert!(config.miner.etherbase.is_some());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<NodeConfig>("unknown_key = 1").is_err());
    }
}
