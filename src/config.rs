// =============================================================================
// CROSSFILL - Configuration
// =============================================================================
//
// JSON file, by default ~/.crossfill/config.json:
//
//   {
//     "src": { "family": "evm", "chain_id": 1, "rpc_url": "...", ... },
//     "dst": { "family": "move", "chain_id": 101, "rpc_url": "...", ... },
//     "poller_interval_secs": 5
//   }
//
// Environment overrides: SRC_CHAIN_RPC, DST_CHAIN_RPC, CROSSFILL_DATA_DIR.
//
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::chain::evm::EvmRpcAdapter;
use crate::chain::sui::{SuiRpcAdapter, TxSigner, WatchOnlySigner};
use crate::chain::{ChainAdapter, ChainFamily, SubmissionQueue};
use crate::factory::EscrowFactory;
use crate::resolver::{Resolver, ResolverSettings, DEFAULT_LOOKBACK_BLOCKS};

pub const DATA_DIR: &str = ".crossfill";
pub const CONFIG_FILE: &str = "config.json";
pub const REGISTRY_DIR: &str = "orders";
pub const JOURNAL_DIR: &str = "swaps";

pub const ENV_SRC_RPC: &str = "SRC_CHAIN_RPC";
pub const ENV_DST_RPC: &str = "DST_CHAIN_RPC";
pub const ENV_DATA_DIR: &str = "CROSSFILL_DATA_DIR";

const DEFAULT_EVM_POLL_MS: u64 = 1_000;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "Config I/O error: {}", s),
            ConfigError::Parse(s) => write!(f, "Config parse error: {}", s),
            ConfigError::Invalid(s) => write!(f, "Invalid config: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// Chain Config
// =============================================================================

fn default_confirm_timeout() -> u64 {
    crate::DEFAULT_CONFIRM_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_EVM_POLL_MS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub family: ChainFamily,
    pub chain_id: u64,
    pub rpc_url: String,
    /// Submitting account (EVM) or Sui address (Move)
    pub signer: Address,
    /// Resolver contract the EVM factory records as taker
    #[serde(default)]
    pub resolver_contract: Option<Address>,
    /// Factory contract (EVM) or escrow package (Move)
    pub escrow_factory: Address,
    /// EscrowSrc implementation for CREATE2 derivation (EVM)
    #[serde(default)]
    pub escrow_src_implementation: Option<Address>,
    /// Token object -> Move coin type
    #[serde(default)]
    pub coin_types: HashMap<Address, String>,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl ChainConfig {
    fn validate(&self, leg: &str) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{}: rpc_url is empty", leg)));
        }
        if self.confirm_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!("{}: confirm_timeout_secs is zero", leg)));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(format!("{}: poll_interval_ms is zero", leg)));
        }
        if self.family == ChainFamily::Evm {
            if self.resolver_contract.is_none() {
                return Err(ConfigError::Invalid(format!("{}: EVM legs need resolver_contract", leg)));
            }
            if !self.signer.is_evm() || !self.escrow_factory.is_evm() {
                return Err(ConfigError::Invalid(format!("{}: EVM legs need 20-byte addresses", leg)));
            }
        }
        Ok(())
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Adapter for this chain. Move legs get `signer` as the key holder;
    /// without one they are watch-only.
    pub fn connect(&self, signer: Option<Arc<dyn TxSigner>>) -> Result<Arc<dyn ChainAdapter>, ConfigError> {
        match self.family {
            ChainFamily::Evm => {
                let resolver = self
                    .resolver_contract
                    .ok_or_else(|| ConfigError::Invalid("EVM legs need resolver_contract".into()))?;
                let adapter = EvmRpcAdapter::new(
                    &self.rpc_url,
                    self.chain_id,
                    self.signer,
                    resolver,
                    self.confirm_timeout(),
                )
                .with_poll_interval(Duration::from_millis(self.poll_interval_ms));
                Ok(Arc::new(adapter))
            }
            ChainFamily::Move => {
                let signer = signer.unwrap_or_else(|| Arc::new(WatchOnlySigner(self.signer)));
                if signer.address() != self.signer {
                    return Err(ConfigError::Invalid(format!(
                        "signer key is {}, config names {}",
                        signer.address(),
                        self.signer
                    )));
                }
                Ok(Arc::new(SuiRpcAdapter::new(
                    &self.rpc_url,
                    self.chain_id,
                    self.escrow_factory,
                    self.coin_types.clone(),
                    signer,
                    self.confirm_timeout(),
                )))
            }
        }
    }

    pub fn factory(&self, adapter: Arc<dyn ChainAdapter>, counterpart: ChainFamily) -> EscrowFactory {
        EscrowFactory::new(adapter, self.escrow_factory, self.escrow_src_implementation, counterpart)
    }
}

// =============================================================================
// Resolver Config
// =============================================================================

fn default_poller_interval() -> u64 {
    crate::DEFAULT_POLLER_INTERVAL_SECS
}

fn default_stage_poll() -> u64 {
    crate::DEFAULT_STAGE_POLL_MS
}

fn default_lookback() -> u64 {
    DEFAULT_LOOKBACK_BLOCKS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub src: ChainConfig,
    pub dst: ChainConfig,
    #[serde(default = "default_poller_interval")]
    pub poller_interval_secs: u64,
    #[serde(default = "default_stage_poll")]
    pub stage_poll_interval_ms: u64,
    #[serde(default = "default_lookback")]
    pub lookback_blocks: u64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl ResolverConfig {
    /// ~/.crossfill
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(DATA_DIR)
    }

    /// ~/.crossfill/config.json
    pub fn default_path() -> PathBuf {
        Self::default_data_dir().join(CONFIG_FILE)
    }

    /// Load, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let json = fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_json(&json)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from `var` (the process environment in `load`)
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(url) = var(ENV_SRC_RPC) {
            self.src.rpc_url = url;
        }
        if let Some(url) = var(ENV_DST_RPC) {
            self.dst.rpc_url = url;
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.src.validate("src")?;
        self.dst.validate("dst")?;
        if self.src.chain_id == self.dst.chain_id {
            return Err(ConfigError::Invalid(format!("both legs use chain {}", self.src.chain_id)));
        }
        if self.src.family == ChainFamily::Evm && self.src.escrow_src_implementation.is_none() {
            return Err(ConfigError::Invalid(
                "src: EVM source needs escrow_src_implementation".into(),
            ));
        }
        if self.poller_interval_secs == 0 || self.stage_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(Self::default_data_dir)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir().join(REGISTRY_DIR)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir().join(JOURNAL_DIR)
    }

    pub fn poller_interval(&self) -> Duration {
        Duration::from_secs(self.poller_interval_secs)
    }

    pub fn settings(&self) -> ResolverSettings {
        ResolverSettings {
            stage_poll_interval: Duration::from_millis(self.stage_poll_interval_ms),
            lookback_blocks: self.lookback_blocks,
        }
    }

    /// Resolver over both configured chains; Move legs use `move_signer`
    /// or stay watch-only
    pub fn build_resolver(&self, move_signer: Option<Arc<dyn TxSigner>>) -> Result<Resolver, ConfigError> {
        let signer_for = |family: ChainFamily| match family {
            ChainFamily::Move => move_signer.clone(),
            ChainFamily::Evm => None,
        };
        let src = self.src.connect(signer_for(self.src.family))?;
        let dst = self.dst.connect(signer_for(self.dst.family))?;
        let src_factory = self.src.factory(src, self.dst.family);
        let dst_factory = self.dst.factory(dst, self.src.family);
        Ok(Resolver::new(src_factory, dst_factory, SubmissionQueue::new()).with_settings(self.settings()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "src": {
            "family": "evm",
            "chain_id": 1,
            "rpc_url": "http://127.0.0.1:8545",
            "signer": "0x00000000000000000000000000000000000000aa",
            "resolver_contract": "0x00000000000000000000000000000000000000bb",
            "escrow_factory": "0x00000000000000000000000000000000000000cc",
            "escrow_src_implementation": "0x00000000000000000000000000000000000000dd"
        },
        "dst": {
            "family": "sui",
            "chain_id": 101,
            "rpc_url": "http://127.0.0.1:9000",
            "signer": "0xaa",
            "escrow_factory": "0xfe",
            "coin_types": { "0x44": "0xfe::usdc::USDC" }
        }
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.dst.family, ChainFamily::Move);
        assert_eq!(config.src.confirm_timeout_secs, crate::DEFAULT_CONFIRM_TIMEOUT_SECS);
        assert_eq!(config.poller_interval_secs, crate::DEFAULT_POLLER_INTERVAL_SECS);
        assert_eq!(config.lookback_blocks, DEFAULT_LOOKBACK_BLOCKS);
        let coin = Address::parse("0x44").unwrap();
        assert_eq!(config.dst.coin_types.get(&coin).map(String::as_str), Some("0xfe::usdc::USDC"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.apply_overrides(|key| match key {
            ENV_DST_RPC => Some("http://sui.local:9000".to_string()),
            ENV_DATA_DIR => Some("/tmp/crossfill".to_string()),
            _ => None,
        });
        assert_eq!(config.src.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.dst.rpc_url, "http://sui.local:9000");
        assert_eq!(config.journal_path(), PathBuf::from("/tmp/crossfill/swaps"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.dst.rpc_url = " ".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.src.confirm_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.src.resolver_contract = None;
        assert!(config.validate().is_err());

        let mut config = ResolverConfig::from_json(SAMPLE).unwrap();
        config.dst.chain_id = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_and_build() {
        let config = ResolverConfig::from_json(SAMPLE).unwrap();
        let again = ResolverConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);

        let resolver = config.build_resolver(None).unwrap();
        assert_eq!(resolver.adapter(crate::timelocks::Leg::Src).chain_id(), 1);
        assert_eq!(resolver.adapter(crate::timelocks::Leg::Dst).family(), ChainFamily::Move);
    }

    #[test]
    fn test_missing_file() {
        let err = ResolverConfig::load(Some(Path::new("/nonexistent/crossfill.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
