//! Fee constants and fee arithmetic
//!
//! Fees are expressed in units of [`FEE_DENOMINATOR`] (`10^10` = 100%).

use crate::fixed_point::{checked_div, checked_mul, mul_div};
use crate::MathError;
use primitive_types::U256;

/// Denominator of every swap/admin fee value
pub const FEE_DENOMINATOR: u64 = 10_000_000_000;

/// Maximum swap fee: 1% of notional
pub const MAX_SWAP_FEE: u64 = 100_000_000;

/// Maximum admin fee: 100% of the swap fee
pub const MAX_ADMIN_FEE: u64 = 10_000_000_000;

/// Denominator of flash-loan fee values (basis points)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fee charged per token on the imbalanced part of a deposit or withdrawal
///
/// `swap_fee * n / (4 * (n - 1))`: for two tokens this is half the swap fee,
/// which makes an imbalanced deposit cost the same as depositing balanced and
/// swapping the excess.
pub fn fee_per_token(swap_fee: u64, num_tokens: usize) -> Result<U256, MathError> {
    if num_tokens < 2 {
        return Err(MathError::DivisionByZero);
    }
    let n = U256::from(num_tokens);
    checked_div(
        checked_mul(U256::from(swap_fee), n)?,
        checked_mul(n - U256::one(), U256::from(4u64))?,
    )
}

/// `amount * fee / FEE_DENOMINATOR`, rounded down
pub fn fee_amount(amount: U256, fee: U256) -> Result<U256, MathError> {
    mul_div(amount, fee, U256::from(FEE_DENOMINATOR))
}
