//! Persisted pool state

use crate::lp_token::LpToken;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use stableswap_config::FlashLoanSettings;
use stableswap_math::{to_decimal, AmplificationState};

/// Pooled token and its native precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: Address,
    pub decimals: u8,
}

/// Flash loan pricing, in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanFees {
    /// Fee charged on the borrowed amount
    pub fee_bps: u128,
    /// Share of the fee credited to admin balances
    pub protocol_share_bps: u128,
}

impl Default for FlashLoanFees {
    fn default() -> Self {
        Self {
            fee_bps: 8,
            protocol_share_bps: 0,
        }
    }
}

impl From<&FlashLoanSettings> for FlashLoanFees {
    fn from(settings: &FlashLoanSettings) -> Self {
        Self {
            fee_bps: u128::from(settings.fee_bps),
            protocol_share_bps: u128::from(settings.protocol_share_bps),
        }
    }
}

/// Where a pool is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Created, never deposited into
    Uninitialized,
    /// LP supply outstanding
    Seeded,
    /// Every share burned; the next deposit must again supply all tokens
    Drained,
}

/// Complete state of a single pool
///
/// `balances` exclude admin fees; the pool's ledger holdings of token `i` are
/// `balances[i] + admin_balances[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub address: Address,
    pub owner: Address,
    pub lp_token: LpToken,
    pub tokens: Vec<TokenRef>,
    pub multipliers: Vec<u128>,
    pub balances: Vec<u128>,
    pub admin_balances: Vec<u128>,
    pub lp_supply: u128,
    pub seeded: bool,
    pub swap_fee: u64,
    pub admin_fee: u64,
    pub amp: AmplificationState,
    pub flash_loan: FlashLoanFees,
}

impl PoolState {
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn token_index(&self, token: &Address) -> Option<usize> {
        self.tokens.iter().position(|t| t.address == *token)
    }

    /// `amount` of token `index` in whole units, for logs and reports
    ///
    /// Falls back to the raw native amount when it cannot be rendered.
    pub fn display_amount(&self, index: usize, amount: u128) -> String {
        self.tokens
            .get(index)
            .and_then(|token| to_decimal(amount, token.decimals))
            .map(|value| value.normalize().to_string())
            .unwrap_or_else(|| amount.to_string())
    }

    pub fn phase(&self) -> PoolPhase {
        match (self.lp_supply, self.seeded) {
            (0, false) => PoolPhase::Uninitialized,
            (0, true) => PoolPhase::Drained,
            _ => PoolPhase::Seeded,
        }
    }
}
