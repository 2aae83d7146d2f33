//! Engine defaults
//!
//! Values used when a configuration file leaves a setting out.

/// Configuration file read when no path is given
pub const CONFIG_PATH: &str = "config/stableswap.toml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "STABLESWAP";

/// Largest pool, in tokens
pub const MAX_TOKENS: usize = 32;

/// Highest token precision a pool accepts
pub const MAX_DECIMALS: u8 = 18;

/// Amplification ramp bounds
pub mod ramp {
    /// A ramp must last at least two weeks
    pub const MIN_RAMP_TIME_SECS: u64 = 14 * 24 * 60 * 60;

    /// One day between ramp starts
    pub const MIN_RAMP_INTERVAL_SECS: u64 = 24 * 60 * 60;

    /// Future A within 2x of current A, either direction
    pub const MAX_A_CHANGE: u64 = 2;
}

/// Meta pool defaults
pub mod meta {
    /// Base virtual price cache lifetime (10 minutes)
    pub const BASE_CACHE_EXPIRY_SECS: u64 = 10 * 60;
}

/// Flash loan defaults
pub mod flash_loan {
    pub const BPS_DENOMINATOR: u64 = 10_000;

    /// 0.08% of the borrowed amount
    pub const FEE_BPS: u64 = 8;

    /// Entire fee left to liquidity providers
    pub const PROTOCOL_SHARE_BPS: u64 = 0;
}

/// Persistence defaults
pub mod storage {
    pub const SNAPSHOT_DIR: &str = "./data/pools";
}
