//! Shareable, reentrancy-guarded pool handle
//!
//! [`StableSwapPool`] is what callers hold: it can be wrapped in an `Arc` and
//! used from any thread. Mutating calls take the pool exclusively; reads are
//! served concurrently with other reads from the same thread and serialized
//! across threads.

use crate::errors::PoolError;
use crate::flash_loan::FlashLoanReceiver;
use crate::guard::Guarded;
use crate::state::PoolState;
use crate::swap::{InitParams, PoolEnv, Swap};
use crate::types::Address;

pub type StableSwapPool = Guarded<Swap>;

impl Guarded<Swap> {
    pub fn create(params: InitParams, env: PoolEnv) -> Result<Self, PoolError> {
        Ok(Guarded::new(Swap::initialize(params, env)?))
    }

    pub fn address(&self) -> Result<Address, PoolError> {
        self.read(|pool| Ok(pool.address()))
    }

    /// Copy of the current state
    pub fn state(&self) -> Result<PoolState, PoolError> {
        self.read(|pool| Ok(pool.state().clone()))
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, PoolError> {
        self.read(|pool| pool.snapshot())
    }

    pub fn restore(&self, snapshot: &[u8]) -> Result<(), PoolError> {
        self.write(|pool| pool.restore(snapshot))
    }

    pub fn swap(
        &self,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|pool| pool.swap(caller, i, j, dx, min_dy, deadline))
    }

    pub fn add_liquidity(
        &self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|pool| pool.add_liquidity(caller, amounts, min_mint, deadline))
    }

    pub fn remove_liquidity(
        &self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.write(|pool| pool.remove_liquidity(caller, shares, min_amounts, deadline))
    }

    pub fn remove_liquidity_one_token(
        &self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|pool| pool.remove_liquidity_one_token(caller, shares, index, min_amount, deadline))
    }

    pub fn remove_liquidity_imbalance(
        &self,
        caller: Address,
        amounts: &[u128],
        max_burn: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|pool| pool.remove_liquidity_imbalance(caller, amounts, max_burn, deadline))
    }

    pub fn flash_loan(
        &self,
        caller: Address,
        receiver: &dyn FlashLoanReceiver,
        token: Address,
        amount: u128,
        params: &[u8],
    ) -> Result<(), PoolError> {
        self.write(|pool| pool.flash_loan(caller, receiver, token, amount, params))
    }

    pub fn set_swap_fee(&self, caller: Address, new_swap_fee: u64) -> Result<(), PoolError> {
        self.write(|pool| pool.set_swap_fee(caller, new_swap_fee))
    }

    pub fn set_admin_fee(&self, caller: Address, new_admin_fee: u64) -> Result<(), PoolError> {
        self.write(|pool| pool.set_admin_fee(caller, new_admin_fee))
    }

    pub fn withdraw_admin_fees(&self, caller: Address, to: Address) -> Result<Vec<u128>, PoolError> {
        self.write(|pool| pool.withdraw_admin_fees(caller, to))
    }

    pub fn ramp_a(&self, caller: Address, future_a: u128, future_time: u64) -> Result<(), PoolError> {
        self.write(|pool| pool.ramp_a(caller, future_a, future_time))
    }

    pub fn stop_ramp_a(&self, caller: Address) -> Result<(), PoolError> {
        self.write(|pool| pool.stop_ramp_a(caller))
    }

    pub fn set_flash_loan_fees(
        &self,
        caller: Address,
        fee_bps: u128,
        protocol_share_bps: u128,
    ) -> Result<(), PoolError> {
        self.write(|pool| pool.set_flash_loan_fees(caller, fee_bps, protocol_share_bps))
    }

    pub fn get_a(&self) -> Result<u128, PoolError> {
        self.read(|pool| Ok(pool.get_a()))
    }

    pub fn get_a_precise(&self) -> Result<u128, PoolError> {
        self.read(|pool| Ok(pool.get_a_precise()))
    }

    pub fn get_virtual_price(&self) -> Result<u128, PoolError> {
        self.read(|pool| pool.get_virtual_price())
    }

    pub fn get_token(&self, index: usize) -> Result<Address, PoolError> {
        self.read(|pool| pool.get_token(index))
    }

    pub fn get_token_index(&self, token: &Address) -> Result<usize, PoolError> {
        self.read(|pool| pool.get_token_index(token))
    }

    pub fn get_token_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.read(|pool| pool.get_token_balance(index))
    }

    pub fn get_admin_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.read(|pool| pool.get_admin_balance(index))
    }

    pub fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_swap(i, j, dx))
    }

    pub fn calculate_swap_input(&self, i: usize, j: usize, dy: u128) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_swap_input(i, j, dy))
    }

    pub fn relative_price(&self, i: usize, j: usize) -> Result<u128, PoolError> {
        self.read(|pool| pool.relative_price(i, j))
    }

    pub fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_token_amount(amounts, deposit))
    }

    pub fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError> {
        self.read(|pool| pool.calculate_remove_liquidity(shares))
    }

    pub fn calculate_remove_liquidity_one_token(
        &self,
        shares: u128,
        index: usize,
    ) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_remove_liquidity_one_token(shares, index))
    }
}
