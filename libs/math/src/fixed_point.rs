//! Fixed-point helpers for cross-token arithmetic
//!
//! Balances are stored as `u128` in each token's native precision. Before any
//! cross-token arithmetic they are scaled to the 18-decimal working precision
//! through a per-token *rate*:
//!
//! - plain token: `rate = 10^(18 - decimals) * 10^18`
//! - base-pool LP token inside a meta pool: `rate = multiplier * base_virtual_price`
//!
//! so `xp = balance * rate / 10^18`. Scaling back down always rounds toward zero.
//!
//! ## Design Principles
//!
//! - **No Floating Point**: only integer math; `Decimal` is used for display only
//! - **Checked Arithmetic**: every operation returns [`MathError`] on overflow
//! - **Explicit Rounding**: callers choose where the lost unit goes

use crate::MathError;
use primitive_types::U256;
use rust_decimal::Decimal;

/// Working precision of the invariant, in decimals
pub const POOL_PRECISION_DECIMALS: u8 = 18;

/// `10^18`, the scale of rates and of the virtual price
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

/// Multiplier that lifts a token with `decimals` to the working precision
///
/// # Examples
/// ```
/// use stableswap_math::precision_multiplier;
///
/// assert_eq!(precision_multiplier(6).unwrap(), 1_000_000_000_000);
/// assert_eq!(precision_multiplier(18).unwrap(), 1);
/// ```
pub fn precision_multiplier(decimals: u8) -> Result<u128, MathError> {
    if decimals > POOL_PRECISION_DECIMALS {
        return Err(MathError::UnsupportedDecimals { decimals });
    }
    Ok(10u128.pow(u32::from(POOL_PRECISION_DECIMALS - decimals)))
}

/// Rate of a plain token with the given precision multiplier
pub fn plain_rate(multiplier: u128) -> Result<U256, MathError> {
    checked_mul(U256::from(multiplier), U256::from(PRECISION))
}

/// True when `a` and `b` differ by at most one unit
#[inline]
pub fn within1(a: U256, b: U256) -> bool {
    difference(a, b) <= U256::one()
}

/// Absolute difference of two values
#[inline]
pub fn difference(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[inline]
pub fn checked_add(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

#[inline]
pub fn checked_sub(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow)
}

#[inline]
pub fn checked_mul(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_mul(b).ok_or(MathError::Overflow)
}

#[inline]
pub fn checked_div(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_div(b).ok_or(MathError::DivisionByZero)
}

/// `a * b / c`, rounded down
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256, MathError> {
    checked_div(checked_mul(a, b)?, c)
}

/// Narrow a 256-bit value back to `u128`
pub fn to_u128(value: U256) -> Result<u128, MathError> {
    if value > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(value.as_u128())
}

/// Scale a native amount to working precision: `amount * rate / 10^18`
pub fn to_working(amount: u128, rate: U256) -> Result<U256, MathError> {
    mul_div(U256::from(amount), rate, U256::from(PRECISION))
}

/// Scale a working-precision amount back to native units, rounding down
pub fn from_working(amount: U256, rate: U256) -> Result<u128, MathError> {
    to_u128(mul_div(amount, U256::from(PRECISION), rate)?)
}

/// Balances in working precision
pub fn xp(balances: &[u128], rates: &[U256]) -> Result<Vec<U256>, MathError> {
    if balances.len() != rates.len() {
        return Err(MathError::IndexOutOfRange {
            index: rates.len(),
            len: balances.len(),
        });
    }
    balances
        .iter()
        .zip(rates)
        .map(|(balance, rate)| to_working(*balance, *rate))
        .collect()
}

/// Render a native amount as a decimal for logs and reports
///
/// Returns `None` when the amount does not fit `Decimal`'s 96-bit mantissa.
/// Never feed the result back into pool arithmetic.
pub fn to_decimal(amount: u128, decimals: u8) -> Option<Decimal> {
    let mantissa = i128::try_from(amount).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(decimals)).ok()
}
