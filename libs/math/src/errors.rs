//! Error types for fixed-point arithmetic and the invariant solver

use thiserror::Error;

/// Errors that can occur in StableSwap arithmetic
///
/// None of these are recoverable by retrying with the same inputs. A
/// `DidNotConverge` on a live pool should be treated as possible state
/// corruption or adversarial input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MathError {
    /// Intermediate value exceeds 256 bits or a result exceeds its target type
    #[error("Overflow in fixed-point arithmetic")]
    Overflow,

    /// Subtraction would produce a negative value
    #[error("Underflow in fixed-point arithmetic")]
    Underflow,

    /// Division by zero, usually a zero balance inside the invariant
    #[error("Division by zero in fixed-point arithmetic")]
    DivisionByZero,

    /// Newton's method exceeded the iteration bound
    #[error("Solver did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize },

    /// Token index outside the balance vector
    #[error("Token index {index} out of range for {len} tokens")]
    IndexOutOfRange { index: usize, len: usize },

    /// Solver called with the same index on both sides
    #[error("Token index {index} used as both input and output")]
    SameIndex { index: usize },

    /// Token precision finer than the working precision
    #[error("Token decimals {decimals} exceed pool precision of 18")]
    UnsupportedDecimals { decimals: u8 },
}
