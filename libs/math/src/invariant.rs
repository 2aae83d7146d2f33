//! StableSwap invariant solver
//!
//! The invariant for `n` balances `x_i` (working precision) reads
//!
//! `A * n^n * S + D = A * D * n^n + D^(n+1) / (n^n * P)`
//!
//! with `S = Σ x_i` and `P = Π x_i`. The amplification is carried as
//! `a_precise = A * A_PRECISION` and enters as `nA = a_precise * n`.
//!
//! All three solvers are Newton iterations that stop once two successive
//! iterates are within one unit of each other and fail with
//! [`MathError::DidNotConverge`] after [`MAX_LOOP_LIMIT`] rounds. They never
//! return an approximation.
//!
//! A zero balance next to non-zero ones has no finite `D`; `get_d` then fails
//! with [`MathError::DivisionByZero`] before iterating.

use crate::amplification::A_PRECISION;
use crate::fixed_point::{checked_add, checked_div, checked_mul, checked_sub, mul_div, within1};
use crate::MathError;
use primitive_types::U256;
use tracing::debug;

/// Iteration bound for every Newton loop
pub const MAX_LOOP_LIMIT: usize = 256;

/// Invariant `D` for balances `xp` at precise amplification `a_precise`
///
/// Returns zero for an empty or all-zero pool.
pub fn get_d(xp: &[U256], a_precise: u128) -> Result<U256, MathError> {
    let num_tokens = U256::from(xp.len());
    let s = xp
        .iter()
        .try_fold(U256::zero(), |acc, x| checked_add(acc, *x))?;
    if s.is_zero() {
        return Ok(U256::zero());
    }

    let a_precision = U256::from(A_PRECISION);
    let n_a = checked_mul(U256::from(a_precise), num_tokens)?;
    let n_a_less_one = checked_sub(n_a, a_precision)?;
    let n_plus_one = checked_add(num_tokens, U256::one())?;
    let ann_s = checked_div(checked_mul(n_a, s)?, a_precision)?;

    let mut d = s;
    for iteration in 0..MAX_LOOP_LIMIT {
        // dP = D^(n+1) / (n^n * P), built one balance at a time
        let mut d_p = d;
        for x in xp {
            d_p = mul_div(d_p, d, checked_mul(*x, num_tokens)?)?;
        }
        let prev_d = d;

        let numerator = checked_mul(checked_add(ann_s, checked_mul(d_p, num_tokens)?)?, d)?;
        let denominator = checked_add(
            checked_div(checked_mul(n_a_less_one, d)?, a_precision)?,
            checked_mul(n_plus_one, d_p)?,
        )?;
        d = checked_div(numerator, denominator)?;

        if within1(d, prev_d) {
            debug!(iterations = iteration + 1, d = %d, "invariant converged");
            return Ok(d);
        }
    }

    Err(MathError::DidNotConverge {
        iterations: MAX_LOOP_LIMIT,
    })
}

/// New balance of `token_index_to` after `token_index_from` moves to `x`
///
/// `D` is held at its value for the current `xp`, so the result is the
/// post-swap balance of the output token before fees.
pub fn get_y(
    a_precise: u128,
    token_index_from: usize,
    token_index_to: usize,
    x: U256,
    xp: &[U256],
) -> Result<U256, MathError> {
    let len = xp.len();
    if token_index_from == token_index_to {
        return Err(MathError::SameIndex {
            index: token_index_from,
        });
    }
    for index in [token_index_from, token_index_to] {
        if index >= len {
            return Err(MathError::IndexOutOfRange { index, len });
        }
    }

    let d = get_d(xp, a_precise)?;
    let others = xp.iter().enumerate().filter_map(|(i, balance)| {
        if i == token_index_from {
            Some(x)
        } else if i == token_index_to {
            None
        } else {
            Some(*balance)
        }
    });
    solve_y(a_precise, len, others, d)
}

/// Balance of `token_index` that satisfies the invariant at target `d`
///
/// Used for single-token withdrawals, where `d` is the invariant reduced by
/// the burned share of supply.
pub fn get_y_d(
    a_precise: u128,
    token_index: usize,
    xp: &[U256],
    d: U256,
) -> Result<U256, MathError> {
    let len = xp.len();
    if token_index >= len {
        return Err(MathError::IndexOutOfRange {
            index: token_index,
            len,
        });
    }
    let others = xp
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != token_index)
        .map(|(_, balance)| *balance);
    solve_y(a_precise, len, others, d)
}

/// Newton iteration `y = (y^2 + c) / (2y + b - D)` shared by both y-solvers
fn solve_y(
    a_precise: u128,
    num_tokens: usize,
    others: impl Iterator<Item = U256>,
    d: U256,
) -> Result<U256, MathError> {
    let n = U256::from(num_tokens);
    let a_precision = U256::from(A_PRECISION);
    let n_a = checked_mul(U256::from(a_precise), n)?;

    let mut c = d;
    let mut s = U256::zero();
    for balance in others {
        s = checked_add(s, balance)?;
        c = mul_div(c, d, checked_mul(balance, n)?)?;
    }
    c = checked_div(
        checked_mul(checked_mul(c, d)?, a_precision)?,
        checked_mul(n_a, n)?,
    )?;
    let b = checked_add(s, checked_div(checked_mul(d, a_precision)?, n_a)?)?;

    let mut y = d;
    for iteration in 0..MAX_LOOP_LIMIT {
        let y_prev = y;
        let numerator = checked_add(checked_mul(y, y)?, c)?;
        let denominator = checked_sub(checked_add(checked_mul(y, U256::from(2))?, b)?, d)?;
        y = checked_div(numerator, denominator)?;
        if within1(y, y_prev) {
            debug!(iterations = iteration + 1, y = %y, "y converged");
            return Ok(y);
        }
    }

    Err(MathError::DidNotConverge {
        iterations: MAX_LOOP_LIMIT,
    })
}
