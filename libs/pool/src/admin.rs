//! Owner-only pool administration
//!
//! Fee changes, admin fee withdrawal, amplification ramps and flash loan
//! pricing. Every call is rejected with [`PoolError::Unauthorized`] unless it
//! comes from the pool owner.

use crate::errors::PoolError;
use crate::events::PoolEvent;
use crate::swap::Swap;
use crate::types::Address;
use stableswap_math::{BPS_DENOMINATOR, MAX_ADMIN_FEE, MAX_SWAP_FEE};
use tracing::info;

impl Swap {
    pub fn set_swap_fee(&mut self, caller: Address, new_swap_fee: u64) -> Result<(), PoolError> {
        self.check_owner(caller)?;
        if new_swap_fee > MAX_SWAP_FEE {
            return Err(PoolError::FeeOutOfRange {
                value: u128::from(new_swap_fee),
                max: u128::from(MAX_SWAP_FEE),
            });
        }
        self.transact(|pool, _tx, events| {
            pool.state.swap_fee = new_swap_fee;
            info!(pool = %pool.state.address, new_swap_fee, "swap fee updated");
            events.push(PoolEvent::NewSwapFee {
                pool: pool.state.address,
                new_swap_fee,
            });
            Ok(())
        })
    }

    pub fn set_admin_fee(&mut self, caller: Address, new_admin_fee: u64) -> Result<(), PoolError> {
        self.check_owner(caller)?;
        if new_admin_fee > MAX_ADMIN_FEE {
            return Err(PoolError::FeeOutOfRange {
                value: u128::from(new_admin_fee),
                max: u128::from(MAX_ADMIN_FEE),
            });
        }
        self.transact(|pool, _tx, events| {
            pool.state.admin_fee = new_admin_fee;
            info!(pool = %pool.state.address, new_admin_fee, "admin fee updated");
            events.push(PoolEvent::NewAdminFee {
                pool: pool.state.address,
                new_admin_fee,
            });
            Ok(())
        })
    }

    /// Transfer every accrued admin balance to `to`; returns the amounts sent
    pub fn withdraw_admin_fees(&mut self, caller: Address, to: Address) -> Result<Vec<u128>, PoolError> {
        self.check_owner(caller)?;
        self.transact(|pool, tx, events| {
            let address = pool.state.address;
            let amounts = std::mem::replace(
                &mut pool.state.admin_balances,
                vec![0; pool.state.tokens.len()],
            );
            for (token, amount) in pool.state.tokens.iter().zip(&amounts) {
                tx.transfer(token.address, address, to, *amount);
            }
            info!(pool = %address, %to, ?amounts, "admin fees withdrawn");
            events.push(PoolEvent::AdminFeesWithdrawn {
                pool: address,
                to,
                amounts: amounts.clone(),
            });
            Ok(amounts)
        })
    }

    /// Ramp `A` linearly from its current value to `future_a` at `future_time`
    pub fn ramp_a(&mut self, caller: Address, future_a: u128, future_time: u64) -> Result<(), PoolError> {
        self.check_owner(caller)?;
        let now = self.now();
        let limits = self.env.ramp_limits;
        self.transact(|pool, _tx, events| {
            let update = pool.state.amp.ramp(future_a, future_time, now, &limits)?;
            info!(
                pool = %pool.state.address,
                old_a = update.initial_a_precise,
                new_a = update.future_a_precise,
                future_time,
                "amplification ramp started"
            );
            events.push(PoolEvent::RampA {
                pool: pool.state.address,
                old_a: update.initial_a_precise,
                new_a: update.future_a_precise,
                initial_time: update.initial_time,
                future_time: update.future_time,
            });
            Ok(())
        })
    }

    /// Freeze `A` at its current interpolated value
    pub fn stop_ramp_a(&mut self, caller: Address) -> Result<(), PoolError> {
        self.check_owner(caller)?;
        let now = self.now();
        self.transact(|pool, _tx, events| {
            let current_a = pool.state.amp.stop(now)?;
            info!(pool = %pool.state.address, current_a, "amplification ramp stopped");
            events.push(PoolEvent::StopRampA {
                pool: pool.state.address,
                current_a,
                time: now,
            });
            Ok(())
        })
    }

    /// Flash loan fee and the share of it kept as admin fees, both in basis points
    pub fn set_flash_loan_fees(
        &mut self,
        caller: Address,
        fee_bps: u128,
        protocol_share_bps: u128,
    ) -> Result<(), PoolError> {
        self.check_owner(caller)?;
        if fee_bps == 0 || fee_bps > BPS_DENOMINATOR {
            return Err(PoolError::FeeOutOfRange {
                value: fee_bps,
                max: BPS_DENOMINATOR,
            });
        }
        if protocol_share_bps > BPS_DENOMINATOR {
            return Err(PoolError::FeeOutOfRange {
                value: protocol_share_bps,
                max: BPS_DENOMINATOR,
            });
        }
        self.state.flash_loan.fee_bps = fee_bps;
        self.state.flash_loan.protocol_share_bps = protocol_share_bps;
        info!(pool = %self.state.address, fee_bps, protocol_share_bps, "flash loan fees updated");
        Ok(())
    }
}
