//! # StableSwap Engine Configuration
//!
//! Centralized configuration and defaults for StableSwap engines.
//!
//! ## Features
//!
//! - **Limits**: amplification ramp bounds, flash loan pricing, meta pool
//!   base price cache lifetime
//! - **Pool Definitions**: plain and meta pools created at startup
//! - **Storage**: where pool snapshots are persisted
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use stableswap_config::load_config;
//!
//! let config = load_config(Some(Path::new("config/stableswap.toml"))).unwrap();
//! let limits = config.ramp.limits();
//! ```

pub mod defaults;
pub mod engine_config;

// Re-export commonly used types
pub use engine_config::{
    load_config, EngineConfig, FlashLoanSettings, MetaSettings, PoolDefinition, RampSettings,
    StorageSettings, TokenDefinition,
};
