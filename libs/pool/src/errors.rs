//! Pool error taxonomy

use crate::ledger::LedgerError;
use crate::types::Address;
use stableswap_math::{MathError, RampError};
use thiserror::Error;

/// Every way a pool operation can fail
///
/// A failed operation leaves pool state, ledger balances and the event stream
/// exactly as they were before the call.
#[derive(Debug, Error)]
pub enum PoolError {
    // Configuration
    #[error("Pool needs between {min} and {max} tokens, got {count}")]
    InvalidTokenCount { count: usize, min: usize, max: usize },

    #[error("Token at index {index} has the zero address")]
    ZeroAddress { index: usize },

    #[error("Duplicate token {0}")]
    DuplicateToken(Address),

    #[error("Last meta pool token must be the base LP token {expected}, found {found}")]
    BaseLpMismatch { expected: Address, found: Address },

    #[error("Base pool has no liquidity")]
    BasePoolNotSeeded,

    #[error("Snapshot belongs to pool {found}, expected {expected}")]
    SnapshotMismatch { expected: Address, found: Address },

    // Preconditions
    #[error("Deadline {deadline} passed (now {now})")]
    DeadlineExpired { deadline: u64, now: u64 },

    #[error("Token index {index} out of range for {len} tokens")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Cannot swap token {index} for itself")]
    SameToken { index: usize },

    #[error("Token {0} is not in this pool")]
    TokenNotFound(Address),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient {token} balance: needed {needed}, available {available}")]
    InsufficientBalance {
        token: Address,
        needed: u128,
        available: u128,
    },

    #[error("First deposit must supply every token")]
    MustSupplyAllTokens,

    #[error("Deposit did not increase the invariant")]
    InvariantDidNotIncrease,

    #[error("Expected {expected} amounts, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Amount {amount} exceeds LP supply {supply}")]
    ExceedsTotalSupply { amount: u128, supply: u128 },

    #[error("Burning the entire LP supply of {supply} requires a proportional withdrawal")]
    FullExitNotProportional { supply: u128 },

    #[error("Fee {value} out of range (max {max})")]
    FeeOutOfRange { value: u128, max: u128 },

    #[error("{caller} is not the pool owner")]
    Unauthorized { caller: Address },

    #[error("Flash loan of {amount} is too small to carry a fee")]
    FlashLoanTooSmall { amount: u128 },

    #[error("Flash loan receiver staged an op other than its own transfer")]
    InvalidRepayment,

    #[error("Flash loan receiver failed: {0:#}")]
    ReceiverFailed(anyhow::Error),

    // Slippage and thresholds
    #[error("Output {actual} below minimum {min}")]
    SlippageExceeded { min: u128, actual: u128 },

    #[error("Minted {actual} LP below minimum {min}")]
    MintBelowMinimum { min: u128, actual: u128 },

    #[error("Cannot mint 0")]
    CannotMintZero,

    #[error("Withdrawal of token {index} is {actual}, below minimum {min}")]
    MinAmountNotMet { index: usize, min: u128, actual: u128 },

    #[error("Burnt amount cannot be zero")]
    ZeroBurn,

    #[error("Burn of {actual} LP exceeds maximum {max}")]
    BurnExceedsMaximum { max: u128, actual: u128 },

    #[error("Flash loan repaid {repaid}, required {required}")]
    FlashLoanFeeNotMet { required: u128, repaid: u128 },

    // Concurrency
    #[error("Reentrant call into a pool with an operation in flight")]
    ReentrantCall,

    // Nested failures
    #[error("Amplification ramp: {0}")]
    Ramp(#[from] RampError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Base pool: {source}")]
    BasePool {
        #[source]
        source: Box<PoolError>,
    },
}

impl PoolError {
    /// Attribute a failure to the base pool of a meta pool
    pub fn base(source: PoolError) -> Self {
        PoolError::BasePool {
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through base-pool wrapping
    pub fn root(&self) -> &PoolError {
        match self {
            PoolError::BasePool { source } => source.root(),
            other => other,
        }
    }
}
