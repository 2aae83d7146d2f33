//! # StableSwap Math - Invariant Solver and Fixed-Point Engine
//!
//! ## Purpose
//!
//! Stateless numerical core shared by every pool instance: scaling between each
//! token's native precision and the 18-decimal working precision, the
//! amplification coefficient ramp, and the Newton's-method routines that solve
//! the StableSwap invariant for `D` and for a single unknown balance `y`.
//!
//! ## Integration Points
//!
//! - **Input Sources**: Pool balances (native precision), per-token rates, the
//!   current precise amplification coefficient
//! - **Output Destinations**: Pool accounting (swap, deposit, withdrawal), meta-pool
//!   routing, read-only quote functions
//! - **Precision**: 18-decimal working precision, 256-bit intermediates
//! - **Validation**: Every multiplication, subtraction and division is checked;
//!   failures surface as [`MathError`] rather than wrapped or saturated values
//!
//! ## Architecture Role
//!
//! ```text
//! Pool balances ──► fixed_point::xp ──► invariant::get_d ──► invariant::get_y / get_y_d
//!                         ▲                    ▲
//!                 per-token rates      amplification::get_a_precise
//! ```
//!
//! Rounding always leaves value inside the pool: outputs are computed one unit
//! short and divided down, burns are rounded up by the callers.

pub mod amplification;
pub mod errors;
pub mod fees;
pub mod fixed_point;
pub mod invariant;

pub use amplification::{AmplificationState, RampError, RampLimits, RampUpdate, A_PRECISION, MAX_A};
pub use errors::MathError;
pub use fees::{
    fee_amount, fee_per_token, BPS_DENOMINATOR, FEE_DENOMINATOR, MAX_ADMIN_FEE, MAX_SWAP_FEE,
};
pub use fixed_point::{
    difference, from_working, mul_div, plain_rate, precision_multiplier, to_decimal, to_u128,
    to_working, within1, xp, PRECISION,
};
pub use invariant::{get_d, get_y, get_y_d, MAX_LOOP_LIMIT};

/// 256-bit unsigned integer used for every intermediate product
pub use primitive_types::U256;
