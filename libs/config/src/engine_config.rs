//! Engine Configuration Module
//!
//! Loads limits, defaults and pool definitions for a StableSwap engine from
//! a TOML file, with `STABLESWAP_`-prefixed environment overrides.

use crate::defaults;
use anyhow::{bail, ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use stableswap_math::{RampLimits, MAX_A, MAX_ADMIN_FEE, MAX_SWAP_FEE};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main engine configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Amplification ramp bounds
    pub ramp: RampSettings,

    /// Meta pool behaviour
    pub meta: MetaSettings,

    /// Flash loan pricing given to new pools
    pub flash_loan: FlashLoanSettings,

    /// Snapshot persistence
    pub storage: StorageSettings,

    /// Pools created at startup, in order
    pub pools: Vec<PoolDefinition>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct RampSettings {
    pub min_ramp_time_secs: u64,
    pub min_ramp_interval_secs: u64,
    pub max_a_change: u64,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            min_ramp_time_secs: defaults::ramp::MIN_RAMP_TIME_SECS,
            min_ramp_interval_secs: defaults::ramp::MIN_RAMP_INTERVAL_SECS,
            max_a_change: defaults::ramp::MAX_A_CHANGE,
        }
    }
}

impl RampSettings {
    pub fn limits(&self) -> RampLimits {
        RampLimits {
            min_ramp_time_secs: self.min_ramp_time_secs,
            min_ramp_interval_secs: self.min_ramp_interval_secs,
            max_a_change: u128::from(self.max_a_change),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MetaSettings {
    /// How long a meta pool trusts its cached base virtual price
    pub base_cache_expiry_secs: u64,
}

impl Default for MetaSettings {
    fn default() -> Self {
        Self {
            base_cache_expiry_secs: defaults::meta::BASE_CACHE_EXPIRY_SECS,
        }
    }
}

/// Flash loan pricing, in basis points
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FlashLoanSettings {
    pub fee_bps: u64,
    pub protocol_share_bps: u64,
}

impl Default for FlashLoanSettings {
    fn default() -> Self {
        Self {
            fee_bps: defaults::flash_loan::FEE_BPS,
            protocol_share_bps: defaults::flash_loan::PROTOCOL_SHARE_BPS,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory of pool snapshot files; `$VAR` references are expanded
    pub snapshot_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: defaults::storage::SNAPSHOT_DIR.to_string(),
        }
    }
}

impl StorageSettings {
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.snapshot_dir)
    }
}

/// Pooled token as written in configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TokenDefinition {
    /// Hex address, `0x` prefix optional
    pub address: String,
    pub decimals: u8,
}

/// A pool to create at startup
///
/// For a meta pool (`base_pool` set) `tokens` lists only the outer tokens;
/// the base pool's LP token is appended as the last slot.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PoolDefinition {
    pub name: String,
    pub lp_name: String,
    pub lp_symbol: String,
    pub a: u64,
    pub swap_fee: u64,
    #[serde(default)]
    pub admin_fee: u64,
    pub owner: String,
    #[serde(default)]
    pub base_pool: Option<String>,
    pub tokens: Vec<TokenDefinition>,
}

impl PoolDefinition {
    pub fn is_meta(&self) -> bool {
        self.base_pool.is_some()
    }
}

impl EngineConfig {
    /// Load configuration from a file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(defaults::CONFIG_PATH));
        debug!("Loading engine config: {:?}", path);

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            // STABLESWAP_FLASH_LOAN__FEE_BPS=5 -> flash_loan.fee_bps
            .add_source(
                Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Expand environment variables in path values
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let expanded = shellexpand::env(&self.storage.snapshot_dir)
            .context("Failed to expand snapshot directory")?;
        self.storage.snapshot_dir = expanded.to_string();
        Ok(())
    }

    /// Reject limits and pool definitions no pool could be built from
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.ramp.min_ramp_time_secs > 0,
            "ramp.min_ramp_time_secs must be positive"
        );
        ensure!(self.ramp.max_a_change >= 1, "ramp.max_a_change must be at least 1");
        ensure!(
            self.meta.base_cache_expiry_secs > 0,
            "meta.base_cache_expiry_secs must be positive"
        );
        ensure!(
            (1..=defaults::flash_loan::BPS_DENOMINATOR).contains(&self.flash_loan.fee_bps),
            "flash_loan.fee_bps {} out of range",
            self.flash_loan.fee_bps
        );
        ensure!(
            self.flash_loan.protocol_share_bps <= defaults::flash_loan::BPS_DENOMINATOR,
            "flash_loan.protocol_share_bps {} out of range",
            self.flash_loan.protocol_share_bps
        );

        let mut plain = HashSet::new();
        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.name.as_str()) {
                bail!("Duplicate pool name: {}", pool.name);
            }
            let min_tokens = if pool.is_meta() { 1 } else { 2 };
            ensure!(
                pool.tokens.len() >= min_tokens && pool.tokens.len() <= defaults::MAX_TOKENS,
                "Pool {} has {} tokens",
                pool.name,
                pool.tokens.len()
            );
            for token in &pool.tokens {
                ensure!(
                    token.decimals <= defaults::MAX_DECIMALS,
                    "Pool {}: token {} has {} decimals",
                    pool.name,
                    token.address,
                    token.decimals
                );
            }
            ensure!(
                pool.a > 0 && u128::from(pool.a) < MAX_A,
                "Pool {}: A {} out of range",
                pool.name,
                pool.a
            );
            ensure!(
                pool.swap_fee <= MAX_SWAP_FEE,
                "Pool {}: swap fee {} above {}",
                pool.name,
                pool.swap_fee,
                MAX_SWAP_FEE
            );
            ensure!(
                pool.admin_fee <= MAX_ADMIN_FEE,
                "Pool {}: admin fee {} above {}",
                pool.name,
                pool.admin_fee,
                MAX_ADMIN_FEE
            );
            match &pool.base_pool {
                Some(base) => ensure!(
                    plain.contains(base.as_str()),
                    "Pool {}: base pool {} must be a plain pool defined earlier",
                    pool.name,
                    base
                ),
                None => {
                    plain.insert(pool.name.as_str());
                }
            }
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write configuration to {:?}", path))
    }
}

/// Load, expand and validate the engine configuration
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(path)?;
    config.expand_env_vars()?;
    config.validate()?;
    info!(
        pools = config.pools.len(),
        snapshot_dir = %config.storage.snapshot_dir,
        "Engine configuration loaded"
    );
    Ok(config)
}
