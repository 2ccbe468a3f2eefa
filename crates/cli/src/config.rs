//! Operator configuration from the environment

use std::env;
use std::path::PathBuf;

use alloy_primitives::Address;
use railgun_core::{Chain, SEPOLIA_CHAIN_ID};
use railgun_orchestrator::{
    EncryptionKey, FallbackProviderConfig, LifecycleConfig, Mnemonic, OrchestratorError,
    OrchestratorResult, ProviderConnector,
};

pub const DEFAULT_NETWORK_ID: u64 = SEPOLIA_CHAIN_ID;
pub const DEFAULT_MNEMONIC: &str = "test test test test test test test test test test test junk";
pub const DEFAULT_TOKEN: &str = "0xb7F1CAD2080fA7EfF168eB1d3CD25a6094FD4A99";
pub const DEFAULT_POI_NODE_URL: &str = "https://ppoi-agg.horsewithsixlegs.xyz";
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:3030";

/// Everything the operator binary reads from `.env` and the process environment
///
/// No `Debug`: the mnemonic and encryption key live here.
#[derive(Clone)]
pub struct OperatorConfig {
    pub rpc_url: String,
    pub network_id: u64,
    pub mnemonic: Mnemonic,
    pub encryption_key: EncryptionKey,
    pub token: Address,
    pub amount: String,
    pub wallet_source: String,
    pub poi_node_url: String,
    pub db_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub engine_url: String,
    pub engine_ws_url: Option<String>,
    /// 0zk recipient for transfers and shield-data exports
    pub recipient_railgun_address: Option<String>,
    /// Smart account that relays shield-data payloads
    pub account_address: Option<Address>,
    pub account_index: Option<u32>,
    pub memo: Option<String>,
}

impl OperatorConfig {
    pub fn from_env() -> OrchestratorResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> OrchestratorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let rpc_url = get("RAILGUN_TEST_RPC").ok_or_else(|| {
            OrchestratorError::Configuration("RAILGUN_TEST_RPC is not set".into())
        })?;

        let network_id = match get("RAILGUN_NETWORK_ID") {
            Some(raw) => raw.parse().map_err(|_| {
                OrchestratorError::Configuration(format!("RAILGUN_NETWORK_ID is not a chain id: {}", raw))
            })?,
            None => DEFAULT_NETWORK_ID,
        };

        let mnemonic = Mnemonic::parse(&get("RAILGUN_TEST_MNEMONIC").unwrap_or_else(|| DEFAULT_MNEMONIC.into()))?;
        let encryption_key =
            EncryptionKey::parse(&get("RAILGUN_ENCRYPTION_KEY").unwrap_or_else(|| "01".repeat(32)))?;

        let token = parse_address(
            "ERC20_TOKEN_ADDRESS",
            &get("ERC20_TOKEN_ADDRESS").unwrap_or_else(|| DEFAULT_TOKEN.into()),
        )?;
        let account_address = get("ACCOUNT_ADDRESS")
            .map(|raw| parse_address("ACCOUNT_ADDRESS", &raw))
            .transpose()?;
        let account_index = get("ACCOUNT_INDEX")
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    OrchestratorError::Configuration(format!("ACCOUNT_INDEX is not an index: {}", raw))
                })
            })
            .transpose()?;

        Ok(Self {
            rpc_url,
            network_id,
            mnemonic,
            encryption_key,
            token,
            amount: get("SHIELD_AMOUNT").unwrap_or_else(|| "1".into()),
            wallet_source: get("RAILGUN_WALLET_SOURCE").unwrap_or_else(|| "railguntest".into()),
            poi_node_url: get("RAILGUN_POI_NODE_URL").unwrap_or_else(|| DEFAULT_POI_NODE_URL.into()),
            db_path: get("RAILGUN_DB_PATH")
                .unwrap_or_else(|| "./engine.db".into())
                .into(),
            artifacts_dir: get("RAILGUN_ARTIFACTS_DIR")
                .unwrap_or_else(|| "./artifacts".into())
                .into(),
            engine_url: get("RAILGUN_ENGINE_URL").unwrap_or_else(|| DEFAULT_ENGINE_URL.into()),
            engine_ws_url: get("RAILGUN_ENGINE_WS_URL"),
            recipient_railgun_address: get("RECIPIENT_RAILGUN_ADDRESS"),
            account_address,
            account_index,
            memo: get("MEMO"),
        })
    }

    pub fn chain(&self) -> Chain {
        Chain::evm(self.network_id)
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig::new(
            self.wallet_source.clone(),
            self.db_path.clone(),
            self.artifacts_dir.clone(),
        )
        .with_poi_nodes(vec![self.poi_node_url.clone()])
    }

    pub fn provider_config(&self) -> FallbackProviderConfig {
        ProviderConnector::for_single_url(self.network_id, self.rpc_url.clone())
    }
}

fn parse_address(key: &str, raw: &str) -> OrchestratorResult<Address> {
    raw.parse()
        .map_err(|_| OrchestratorError::Configuration(format!("{} is not an address: {}", key, raw)))
}
