//! Flash loans against pool balances
//!
//! The borrowed amount is staged out of the pool, the receiver stages its
//! repayment into the same [`LedgerTx`], and the pool settles the whole thing
//! only if the repayment covers principal plus fee and the invariant did not
//! shrink. Any failure leaves the pool, the ledger and the event stream as
//! they were.
//!
//! While the receiver runs the pool is locked; a receiver that calls back into
//! the pool through a [`StableSwapPool`](crate::StableSwapPool) handle gets
//! [`PoolError::ReentrantCall`].

use crate::errors::PoolError;
use crate::events::PoolEvent;
use crate::ledger::{LedgerOp, LedgerTx};
use crate::swap::{add_u128, sub_u128, Swap};
use crate::types::Address;
use stableswap_math::fixed_point::checked_mul;
use stableswap_math::{get_d, to_u128, xp, BPS_DENOMINATOR, U256};
use tracing::{debug, info};

/// Everything a receiver needs to act on a loan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLoanTerms {
    pub pool: Address,
    pub initiator: Address,
    pub token: Address,
    pub token_index: usize,
    pub amount: u128,
    /// Minimum fee owed on top of `amount`
    pub fee: u128,
    pub params: Vec<u8>,
}

/// Borrower callback
///
/// On entry the borrowed tokens are already staged to [`address`](Self::address).
/// The receiver may only stage transfers out of its own address; the pool
/// counts the ones sending the loan token back to it as repayment.
pub trait FlashLoanReceiver {
    fn address(&self) -> Address;

    fn execute_operation(&self, terms: &FlashLoanTerms, tx: &mut LedgerTx) -> anyhow::Result<()>;
}

fn bps_of(amount: u128, bps: u128) -> Result<u128, PoolError> {
    let scaled = checked_mul(U256::from(amount), U256::from(bps))? / U256::from(BPS_DENOMINATOR);
    Ok(to_u128(scaled)?)
}

impl Swap {
    /// Lend `amount` of `token` to `receiver` for the duration of one call
    pub fn flash_loan(
        &mut self,
        caller: Address,
        receiver: &dyn FlashLoanReceiver,
        token: Address,
        amount: u128,
        params: &[u8],
    ) -> Result<(), PoolError> {
        let index = self.get_token_index(&token)?;
        if amount == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let available = self.state.balances[index];
        if amount > available {
            return Err(PoolError::InsufficientBalance {
                token,
                needed: amount,
                available,
            });
        }
        let pricing = self.state.flash_loan;
        let fee = bps_of(amount, pricing.fee_bps)?;
        if fee == 0 {
            return Err(PoolError::FlashLoanTooSmall { amount });
        }

        let rates = self.plain_rates()?;
        let a = self.get_a_precise();
        let d0 = get_d(&xp(&self.state.balances, &rates)?, a)?;
        let borrower = receiver.address();

        self.transact(|pool, tx, events| {
            let address = pool.state.address;
            tx.transfer(token, address, borrower, amount);
            let start = tx.len();

            let terms = FlashLoanTerms {
                pool: address,
                initiator: caller,
                token,
                token_index: index,
                amount,
                fee,
                params: params.to_vec(),
            };
            debug!(pool = %address, receiver = %borrower, amount, fee, "flash loan issued");
            receiver
                .execute_operation(&terms, tx)
                .map_err(PoolError::ReceiverFailed)?;

            let mut repaid = 0u128;
            for op in &tx.ops()[start..] {
                match op {
                    LedgerOp::Transfer {
                        token: sent,
                        from,
                        to,
                        amount,
                    } if *from == borrower => {
                        if *sent == token && *to == address {
                            repaid = add_u128(repaid, *amount)?;
                        }
                    }
                    _ => return Err(PoolError::InvalidRepayment),
                }
            }
            let required = add_u128(amount, fee)?;
            if repaid < required {
                return Err(PoolError::FlashLoanFeeNotMet { required, repaid });
            }

            let amount_fee = sub_u128(repaid, amount)?;
            let protocol_fee = bps_of(amount_fee, pricing.protocol_share_bps)?;
            let state = &mut pool.state;
            state.balances[index] =
                add_u128(state.balances[index], sub_u128(amount_fee, protocol_fee)?)?;
            state.admin_balances[index] = add_u128(state.admin_balances[index], protocol_fee)?;

            let d1 = get_d(&xp(&pool.state.balances, &rates)?, a)?;
            if d1 < d0 {
                return Err(PoolError::InvariantDidNotIncrease);
            }

            info!(pool = %address, receiver = %borrower, index, amount, amount_fee, protocol_fee, "flash loan repaid");
            events.push(PoolEvent::FlashLoan {
                pool: address,
                receiver: borrower,
                token_index: index,
                amount,
                amount_fee,
                protocol_fee,
            });
            Ok(())
        })
    }
}
