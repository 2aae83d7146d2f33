//! Meta pools
//!
//! A meta pool is a plain pool whose last token is the LP token of another
//! (base) pool. It prices that slot at the base pool's virtual price, cached
//! for `expiry_secs`, and exposes an *underlying* index space in which the
//! base LP slot is replaced by the base pool's own tokens:
//!
//! ```text
//! meta tokens:        [ USDX | baseLP ]
//! underlying tokens:  [ USDX | DAI | USDC | USDT ]
//!                       0      1     2      3
//! ```
//!
//! Underlying operations drive both pools inside one composite transaction:
//! the base pool's guard is held for the whole call through a [`BaseSession`],
//! both pools stage into the same [`LedgerTx`], and a failure anywhere rolls
//! back both. The two pools must therefore share one [`TokenLedger`](crate::TokenLedger).

use crate::errors::PoolError;
use crate::events::PoolEvent;
use crate::guard::Guarded;
use crate::ledger::LedgerTx;
use crate::state::{PoolState, TokenRef};
use crate::swap::{InitParams, PoolEnv, Swap};
use crate::types::Address;
use parking_lot::ReentrantMutexGuard;
use serde::{Deserialize, Serialize};
use stableswap_math::fixed_point::{checked_mul, checked_sub};
use stableswap_math::{plain_rate, to_u128, FEE_DENOMINATOR, U256};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default lifetime of the cached base virtual price
pub const BASE_CACHE_EXPIRES_SECS: u64 = 10 * 60;

/// What a meta pool needs from the pool underneath it
pub trait BasePool: Send + Sync {
    fn address(&self) -> Result<Address, PoolError>;

    fn lp_token(&self) -> Result<Address, PoolError>;

    fn tokens(&self) -> Result<Vec<TokenRef>, PoolError>;

    fn swap_fee(&self) -> Result<u64, PoolError>;

    fn get_virtual_price(&self) -> Result<u128, PoolError>;

    fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError>;

    fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError>;

    fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError>;

    fn calculate_remove_liquidity_one_token(&self, shares: u128, index: usize) -> Result<u128, PoolError>;

    /// Lock the base pool for a composite operation
    fn begin(&self) -> Result<Box<dyn BaseSession + '_>, PoolError>;
}

/// Base pool locked for the duration of one composite meta operation
///
/// Operations stage into the caller's transaction. Dropping the session
/// without [`commit`](Self::commit) restores the base pool's state.
pub trait BaseSession {
    fn swap(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
    ) -> Result<u128, PoolError>;

    fn add_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
    ) -> Result<u128, PoolError>;

    fn remove_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
    ) -> Result<Vec<u128>, PoolError>;

    fn remove_liquidity_one_token(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
    ) -> Result<u128, PoolError>;

    /// Keep the staged changes and deliver the base pool's events
    fn commit(self: Box<Self>);
}

struct SwapSession<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<Swap>>,
    saved: Option<PoolState>,
    events: Vec<PoolEvent>,
}

impl SwapSession<'_> {
    fn run<R>(
        &mut self,
        op: impl FnOnce(&mut Swap, &[U256], &mut Vec<PoolEvent>) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let mut pool = self
            .guard
            .try_borrow_mut()
            .map_err(|_| PoolError::ReentrantCall)?;
        let rates = pool.plain_rates()?;
        op(&mut *pool, &rates, &mut self.events)
    }
}

impl BaseSession for SwapSession<'_> {
    fn swap(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
    ) -> Result<u128, PoolError> {
        self.run(|pool, rates, events| pool.apply_swap(tx, events, rates, caller, i, j, dx, min_dy))
    }

    fn add_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
    ) -> Result<u128, PoolError> {
        self.run(|pool, rates, events| pool.apply_add_liquidity(tx, events, rates, caller, amounts, min_mint))
    }

    fn remove_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
    ) -> Result<Vec<u128>, PoolError> {
        self.run(|pool, _rates, events| pool.apply_remove_liquidity(tx, events, caller, shares, min_amounts))
    }

    fn remove_liquidity_one_token(
        &mut self,
        tx: &mut LedgerTx,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
    ) -> Result<u128, PoolError> {
        self.run(|pool, rates, events| {
            pool.apply_remove_liquidity_one_token(tx, events, rates, caller, shares, index, min_amount)
        })
    }

    fn commit(mut self: Box<Self>) {
        self.saved = None;
        let events = std::mem::take(&mut self.events);
        if let Ok(pool) = self.guard.try_borrow() {
            for event in events {
                pool.emit(event);
            }
        }
    }
}

impl Drop for SwapSession<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Ok(mut pool) = self.guard.try_borrow_mut() {
                debug!(pool = %saved.address, "base pool session rolled back");
                pool.state = saved;
            }
        }
    }
}

impl BasePool for Guarded<Swap> {
    fn address(&self) -> Result<Address, PoolError> {
        self.read(|pool| Ok(pool.address()))
    }

    fn lp_token(&self) -> Result<Address, PoolError> {
        self.read(|pool| Ok(pool.lp_token().address))
    }

    fn tokens(&self) -> Result<Vec<TokenRef>, PoolError> {
        self.read(|pool| Ok(pool.state().tokens.clone()))
    }

    fn swap_fee(&self) -> Result<u64, PoolError> {
        self.read(|pool| Ok(pool.state().swap_fee))
    }

    fn get_virtual_price(&self) -> Result<u128, PoolError> {
        self.read(|pool| pool.get_virtual_price())
    }

    fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_swap(i, j, dx))
    }

    fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_token_amount(amounts, deposit))
    }

    fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError> {
        self.read(|pool| pool.calculate_remove_liquidity(shares))
    }

    fn calculate_remove_liquidity_one_token(&self, shares: u128, index: usize) -> Result<u128, PoolError> {
        self.read(|pool| pool.calculate_remove_liquidity_one_token(shares, index))
    }

    fn begin(&self) -> Result<Box<dyn BaseSession + '_>, PoolError> {
        let guard = self.lock();
        let saved = guard
            .try_borrow()
            .map_err(|_| PoolError::ReentrantCall)?
            .state()
            .clone();
        Ok(Box::new(SwapSession {
            guard,
            saved: Some(saved),
            events: Vec::new(),
        }))
    }
}

/// Cached base pool virtual price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePriceCache {
    pub virtual_price: u128,
    pub updated_at: u64,
    pub expiry_secs: u64,
}

impl BasePriceCache {
    /// An unset price is always stale
    pub fn is_expired(&self, now: u64) -> bool {
        self.virtual_price == 0 || now > self.updated_at.saturating_add(self.expiry_secs)
    }
}

fn fetch_base_virtual_price(base: &dyn BasePool) -> Result<u128, PoolError> {
    let virtual_price = base.get_virtual_price().map_err(PoolError::base)?;
    if virtual_price == 0 {
        return Err(PoolError::BasePoolNotSeeded);
    }
    Ok(virtual_price)
}

pub struct MetaSwap {
    pub(crate) swap: Swap,
    base: Arc<dyn BasePool>,
    base_tokens: Vec<TokenRef>,
    cache: BasePriceCache,
}

impl fmt::Debug for MetaSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaSwap")
            .field("swap", &self.swap)
            .field("base_tokens", &self.base_tokens)
            .field("cache", &self.cache)
            .finish()
    }
}

impl MetaSwap {
    /// Create a meta pool on top of `base`; the last of `params.tokens` must
    /// be the base pool's LP token
    ///
    /// The base pool may still be empty; operations priced off it fail with
    /// [`PoolError::BasePoolNotSeeded`] until it has liquidity.
    pub fn initialize(
        params: InitParams,
        base: Arc<dyn BasePool>,
        env: PoolEnv,
        expiry_secs: u64,
    ) -> Result<Self, PoolError> {
        let base_lp = base.lp_token().map_err(PoolError::base)?;
        if let Some(last) = params.tokens.last() {
            if *last != base_lp {
                return Err(PoolError::BaseLpMismatch {
                    expected: base_lp,
                    found: *last,
                });
            }
        }
        let virtual_price = base.get_virtual_price().map_err(PoolError::base)?;
        let base_tokens = base.tokens().map_err(PoolError::base)?;

        let swap = Swap::initialize(params, env)?;
        let cache = BasePriceCache {
            virtual_price,
            updated_at: swap.now(),
            expiry_secs,
        };
        info!(
            pool = %swap.address(),
            base_lp = %base_lp,
            base_virtual_price = virtual_price,
            "meta pool initialized"
        );
        Ok(Self {
            swap,
            base,
            base_tokens,
            cache,
        })
    }

    /// Rebuild a meta pool from persisted state
    pub fn from_parts(
        state: PoolState,
        cache: BasePriceCache,
        base: Arc<dyn BasePool>,
        env: PoolEnv,
    ) -> Result<Self, PoolError> {
        let base_lp = base.lp_token().map_err(PoolError::base)?;
        let found = state.tokens.last().map(|t| t.address).unwrap_or_default();
        if found != base_lp {
            return Err(PoolError::BaseLpMismatch {
                expected: base_lp,
                found,
            });
        }
        let base_tokens = base.tokens().map_err(PoolError::base)?;
        Ok(Self {
            swap: Swap::from_state(state, env)?,
            base,
            base_tokens,
            cache,
        })
    }

    /// The meta-level pool
    pub fn inner(&self) -> &Swap {
        &self.swap
    }

    pub fn base(&self) -> &Arc<dyn BasePool> {
        &self.base
    }

    pub fn cache(&self) -> BasePriceCache {
        self.cache
    }

    /// Meta index of the base LP token
    pub fn base_lp_index(&self) -> usize {
        self.swap.state.num_tokens() - 1
    }

    /// Meta tokens without the base LP, followed by the base pool's tokens
    pub fn underlying_tokens(&self) -> Vec<TokenRef> {
        let lp_index = self.base_lp_index();
        self.swap.state.tokens[..lp_index]
            .iter()
            .chain(&self.base_tokens)
            .copied()
            .collect()
    }

    fn num_underlying(&self) -> usize {
        self.base_lp_index() + self.base_tokens.len()
    }

    fn meta_rates(&self, base_virtual_price: u128) -> Result<Vec<U256>, PoolError> {
        let lp_index = self.base_lp_index();
        self.swap
            .state
            .multipliers
            .iter()
            .enumerate()
            .map(|(i, m)| {
                if i == lp_index {
                    checked_mul(U256::from(*m), U256::from(base_virtual_price))
                } else {
                    plain_rate(*m)
                }
                .map_err(PoolError::from)
            })
            .collect()
    }

    /// Base virtual price for quotes: the cached value, or a fresh read once stale
    pub fn current_base_virtual_price(&self) -> Result<u128, PoolError> {
        if self.cache.is_expired(self.swap.now()) {
            fetch_base_virtual_price(self.base.as_ref())
        } else {
            Ok(self.cache.virtual_price)
        }
    }

    fn refresh_base_virtual_price(&mut self) -> Result<u128, PoolError> {
        let now = self.swap.now();
        if self.cache.is_expired(now) {
            let virtual_price = fetch_base_virtual_price(self.base.as_ref())?;
            debug!(
                pool = %self.swap.address(),
                previous = self.cache.virtual_price,
                virtual_price,
                "base virtual price refreshed"
            );
            self.cache.virtual_price = virtual_price;
            self.cache.updated_at = now;
        }
        Ok(self.cache.virtual_price)
    }

    /// Run a meta-only operation with fresh meta rates
    fn with_meta_rates<R>(
        &mut self,
        op: impl FnOnce(&mut Swap, &[U256]) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let saved = self.cache;
        let outcome = match self.refresh_base_virtual_price() {
            Ok(virtual_price) => match self.meta_rates(virtual_price) {
                Ok(rates) => op(&mut self.swap, &rates),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            self.cache = saved;
        }
        outcome
    }

    /// Run an operation spanning both pools as one atomic unit
    fn transact_composite<R>(
        &mut self,
        op: impl FnOnce(
            &mut Swap,
            &[U256],
            &mut dyn BaseSession,
            &mut LedgerTx,
            &mut Vec<PoolEvent>,
        ) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let base = Arc::clone(&self.base);
        let saved_cache = self.cache;
        let saved_state = self.swap.state.clone();

        let rates = match self
            .refresh_base_virtual_price()
            .and_then(|virtual_price| self.meta_rates(virtual_price))
        {
            Ok(rates) => rates,
            Err(err) => {
                self.cache = saved_cache;
                return Err(err);
            }
        };
        let mut session = match base.begin() {
            Ok(session) => session,
            Err(err) => {
                self.cache = saved_cache;
                return Err(PoolError::base(err));
            }
        };
        let mut tx = LedgerTx::new();
        let mut events = Vec::new();

        let outcome = op(&mut self.swap, &rates, session.as_mut(), &mut tx, &mut events)
            .and_then(|value| {
                self.swap.env.ledger.settle(tx)?;
                Ok(value)
            });

        match outcome {
            Ok(value) => {
                session.commit();
                for event in events {
                    self.swap.emit(event);
                }
                Ok(value)
            }
            Err(err) => {
                drop(session);
                self.swap.state = saved_state;
                self.cache = saved_cache;
                warn!(pool = %self.swap.address(), error = %err, "meta pool operation rolled back");
                Err(err)
            }
        }
    }

    fn check_underlying_pair(&self, i: usize, j: usize) -> Result<(), PoolError> {
        let len = self.num_underlying();
        for index in [i, j] {
            if index >= len {
                return Err(PoolError::IndexOutOfRange { index, len });
            }
        }
        if i == j {
            return Err(PoolError::SameToken { index: i });
        }
        Ok(())
    }

    fn check_underlying_length(&self, actual: usize) -> Result<(), PoolError> {
        let expected = self.num_underlying();
        if actual != expected {
            return Err(PoolError::LengthMismatch { expected, actual });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Meta-level operations
    // ------------------------------------------------------------------

    pub fn swap(
        &mut self,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.with_meta_rates(|pool, rates| {
            pool.transact(|pool, tx, events| pool.apply_swap(tx, events, rates, caller, i, j, dx, min_dy))
        })
    }

    pub fn add_liquidity(
        &mut self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.with_meta_rates(|pool, rates| {
            pool.transact(|pool, tx, events| {
                pool.apply_add_liquidity(tx, events, rates, caller, amounts, min_mint)
            })
        })
    }

    pub fn remove_liquidity(
        &mut self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.swap.remove_liquidity(caller, shares, min_amounts, deadline)
    }

    pub fn remove_liquidity_one_token(
        &mut self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.with_meta_rates(|pool, rates| {
            pool.transact(|pool, tx, events| {
                pool.apply_remove_liquidity_one_token(tx, events, rates, caller, shares, index, min_amount)
            })
        })
    }

    pub fn remove_liquidity_imbalance(
        &mut self,
        caller: Address,
        amounts: &[u128],
        max_burn: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.with_meta_rates(|pool, rates| {
            pool.transact(|pool, tx, events| {
                pool.apply_remove_liquidity_imbalance(tx, events, rates, caller, amounts, max_burn)
            })
        })
    }

    pub fn get_virtual_price(&self) -> Result<u128, PoolError> {
        if self.swap.state.lp_supply == 0 {
            return Ok(0);
        }
        let rates = self.meta_rates(self.current_base_virtual_price()?)?;
        self.swap.virtual_price_with(&rates)
    }

    pub fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        let rates = self.meta_rates(self.current_base_virtual_price()?)?;
        Ok(self.swap.quote_swap(&rates, i, j, dx)?.dy)
    }

    pub fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError> {
        let rates = self.meta_rates(self.current_base_virtual_price()?)?;
        self.swap.token_amount_with(&rates, amounts, deposit)
    }

    pub fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError> {
        self.swap.calculate_remove_liquidity(shares)
    }

    pub fn calculate_remove_liquidity_one_token(
        &self,
        shares: u128,
        index: usize,
    ) -> Result<u128, PoolError> {
        let rates = self.meta_rates(self.current_base_virtual_price()?)?;
        Ok(self.swap.quote_withdraw_one(&rates, shares, index)?.dy)
    }

    // ------------------------------------------------------------------
    // Underlying operations
    // ------------------------------------------------------------------

    /// Swap in the underlying index space
    ///
    /// Base-to-base swaps stay inside the base pool. Every other pair routes
    /// through the meta pool, converting base tokens to and from the base LP
    /// token on the way in and out.
    pub fn swap_underlying(
        &mut self,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.check_underlying_pair(i, j)?;
        if dx == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let lp_index = self.base_lp_index();
        let base_len = self.base_tokens.len();

        self.transact_composite(|pool, rates, base, tx, events| {
            let dy = if i >= lp_index && j >= lp_index {
                base.swap(tx, caller, i - lp_index, j - lp_index, dx, min_dy)
                    .map_err(PoolError::base)?
            } else {
                let (meta_i, amount_in) = if i < lp_index {
                    (i, dx)
                } else {
                    let mut deposit = vec![0; base_len];
                    deposit[i - lp_index] = dx;
                    let minted = base
                        .add_liquidity(tx, caller, &deposit, 0)
                        .map_err(PoolError::base)?;
                    (lp_index, minted)
                };
                let meta_j = j.min(lp_index);
                let out = pool.stage_swap(tx, rates, caller, meta_i, meta_j, amount_in, 0)?;
                if j < lp_index {
                    out
                } else {
                    base.remove_liquidity_one_token(tx, caller, out, j - lp_index, 0)
                        .map_err(PoolError::base)?
                }
            };

            if dy < min_dy {
                warn!(pool = %pool.address(), min_dy, dy, "underlying swap slippage exceeded");
                return Err(PoolError::SlippageExceeded {
                    min: min_dy,
                    actual: dy,
                });
            }
            info!(pool = %pool.address(), buyer = %caller, i, j, dx, dy, "underlying swap");
            events.push(PoolEvent::TokenSwapUnderlying {
                pool: pool.address(),
                buyer: caller,
                tokens_sold: dx,
                tokens_bought: dy,
                sold_id: i,
                bought_id: j,
            });
            Ok(dy)
        })
    }

    /// Quote for [`swap_underlying`](Self::swap_underlying)
    pub fn calculate_swap_underlying(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        self.check_underlying_pair(i, j)?;
        let lp_index = self.base_lp_index();
        if i >= lp_index && j >= lp_index {
            return self
                .base
                .calculate_swap(i - lp_index, j - lp_index, dx)
                .map_err(PoolError::base);
        }

        let (meta_i, amount_in) = if i < lp_index {
            (i, dx)
        } else {
            let mut deposit = vec![0; self.base_tokens.len()];
            deposit[i - lp_index] = dx;
            let lp = self
                .base
                .calculate_token_amount(&deposit, true)
                .map_err(PoolError::base)?;
            // single-sided deposits pay roughly half the base swap fee
            let base_fee = U256::from(self.base.swap_fee().map_err(PoolError::base)?);
            let haircut = checked_mul(U256::from(lp), base_fee)?
                / U256::from(2 * u128::from(FEE_DENOMINATOR));
            (lp_index, to_u128(checked_sub(U256::from(lp), haircut)?)?)
        };
        let rates = self.meta_rates(self.current_base_virtual_price()?)?;
        let out = self
            .swap
            .quote_swap(&rates, meta_i, j.min(lp_index), amount_in)?
            .dy;
        if j < lp_index {
            Ok(out)
        } else {
            self.base
                .calculate_remove_liquidity_one_token(out, j - lp_index)
                .map_err(PoolError::base)
        }
    }

    /// Deposit in the underlying index space; base tokens are first deposited
    /// into the base pool
    pub fn add_liquidity_underlying(
        &mut self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.check_underlying_length(amounts.len())?;
        let lp_index = self.base_lp_index();

        self.transact_composite(|pool, rates, base, tx, events| {
            let (meta_part, base_part) = amounts.split_at(lp_index);
            let minted = if base_part.iter().any(|amount| *amount > 0) {
                base.add_liquidity(tx, caller, base_part, 0)
                    .map_err(PoolError::base)?
            } else {
                0
            };
            let mut meta_amounts = meta_part.to_vec();
            meta_amounts.push(minted);
            pool.apply_add_liquidity(tx, events, rates, caller, &meta_amounts, min_mint)
        })
    }

    /// Proportional withdrawal paid out in underlying tokens
    pub fn remove_liquidity_underlying(
        &mut self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.swap.check_deadline(deadline)?;
        self.check_underlying_length(min_amounts.len())?;
        let lp_index = self.base_lp_index();
        let base_len = self.base_tokens.len();

        self.transact_composite(|pool, _rates, base, tx, events| {
            let (meta_mins, base_mins) = min_amounts.split_at(lp_index);
            let mut mins = meta_mins.to_vec();
            mins.push(0);
            let mut amounts = pool.apply_remove_liquidity(tx, events, caller, shares, &mins)?;
            let lp_amount = amounts.pop().unwrap_or(0);

            let base_amounts = if lp_amount > 0 {
                base.remove_liquidity(tx, caller, lp_amount, base_mins)
                    .map_err(PoolError::base)?
            } else {
                if let Some((k, min)) = base_mins.iter().enumerate().find(|(_, min)| **min > 0) {
                    return Err(PoolError::MinAmountNotMet {
                        index: lp_index + k,
                        min: *min,
                        actual: 0,
                    });
                }
                vec![0; base_len]
            };
            amounts.extend(base_amounts);
            Ok(amounts)
        })
    }

    /// Withdraw a single underlying token
    pub fn remove_liquidity_one_token_underlying(
        &mut self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.swap.check_deadline(deadline)?;
        let len = self.num_underlying();
        if index >= len {
            return Err(PoolError::IndexOutOfRange { index, len });
        }
        let lp_index = self.base_lp_index();

        self.transact_composite(|pool, rates, base, tx, events| {
            if index < lp_index {
                return pool.apply_remove_liquidity_one_token(
                    tx, events, rates, caller, shares, index, min_amount,
                );
            }
            let lp_amount =
                pool.apply_remove_liquidity_one_token(tx, events, rates, caller, shares, lp_index, 0)?;
            base.remove_liquidity_one_token(tx, caller, lp_amount, index - lp_index, min_amount)
                .map_err(PoolError::base)
        })
    }
}

pub type MetaPool = Guarded<MetaSwap>;

impl Guarded<MetaSwap> {
    pub fn create(
        params: InitParams,
        base: Arc<dyn BasePool>,
        env: PoolEnv,
        expiry_secs: u64,
    ) -> Result<Self, PoolError> {
        Ok(Guarded::new(MetaSwap::initialize(params, base, env, expiry_secs)?))
    }

    pub fn address(&self) -> Result<Address, PoolError> {
        self.read(|meta| Ok(meta.inner().address()))
    }

    pub fn state(&self) -> Result<PoolState, PoolError> {
        self.read(|meta| Ok(meta.inner().state().clone()))
    }

    pub fn underlying_tokens(&self) -> Result<Vec<TokenRef>, PoolError> {
        self.read(|meta| Ok(meta.underlying_tokens()))
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
        self.write(|meta| meta.swap(caller, i, j, dx, min_dy, deadline))
    }

    pub fn swap_underlying(
        &self,
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| meta.swap_underlying(caller, i, j, dx, min_dy, deadline))
    }

    pub fn add_liquidity(
        &self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| meta.add_liquidity(caller, amounts, min_mint, deadline))
    }

    pub fn add_liquidity_underlying(
        &self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| meta.add_liquidity_underlying(caller, amounts, min_mint, deadline))
    }

    pub fn remove_liquidity(
        &self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.write(|meta| meta.remove_liquidity(caller, shares, min_amounts, deadline))
    }

    pub fn remove_liquidity_underlying(
        &self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.write(|meta| meta.remove_liquidity_underlying(caller, shares, min_amounts, deadline))
    }

    pub fn remove_liquidity_one_token(
        &self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| meta.remove_liquidity_one_token(caller, shares, index, min_amount, deadline))
    }

    pub fn remove_liquidity_one_token_underlying(
        &self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| {
            meta.remove_liquidity_one_token_underlying(caller, shares, index, min_amount, deadline)
        })
    }

    pub fn remove_liquidity_imbalance(
        &self,
        caller: Address,
        amounts: &[u128],
        max_burn: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.write(|meta| meta.remove_liquidity_imbalance(caller, amounts, max_burn, deadline))
    }

    pub fn set_swap_fee(&self, caller: Address, new_swap_fee: u64) -> Result<(), PoolError> {
        self.write(|meta| meta.swap.set_swap_fee(caller, new_swap_fee))
    }

    pub fn set_admin_fee(&self, caller: Address, new_admin_fee: u64) -> Result<(), PoolError> {
        self.write(|meta| meta.swap.set_admin_fee(caller, new_admin_fee))
    }

    pub fn withdraw_admin_fees(&self, caller: Address, to: Address) -> Result<Vec<u128>, PoolError> {
        self.write(|meta| meta.swap.withdraw_admin_fees(caller, to))
    }

    pub fn ramp_a(&self, caller: Address, future_a: u128, future_time: u64) -> Result<(), PoolError> {
        self.write(|meta| meta.swap.ramp_a(caller, future_a, future_time))
    }

    pub fn stop_ramp_a(&self, caller: Address) -> Result<(), PoolError> {
        self.write(|meta| meta.swap.stop_ramp_a(caller))
    }

    pub fn get_a(&self) -> Result<u128, PoolError> {
        self.read(|meta| Ok(meta.inner().get_a()))
    }

    pub fn get_virtual_price(&self) -> Result<u128, PoolError> {
        self.read(|meta| meta.get_virtual_price())
    }

    pub fn get_token_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.read(|meta| meta.inner().get_token_balance(index))
    }

    pub fn get_admin_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.read(|meta| meta.inner().get_admin_balance(index))
    }

    pub fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        self.read(|meta| meta.calculate_swap(i, j, dx))
    }

    pub fn calculate_swap_underlying(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        self.read(|meta| meta.calculate_swap_underlying(i, j, dx))
    }

    pub fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError> {
        self.read(|meta| meta.calculate_token_amount(amounts, deposit))
    }

    pub fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError> {
        self.read(|meta| meta.calculate_remove_liquidity(shares))
    }

    pub fn calculate_remove_liquidity_one_token(
        &self,
        shares: u128,
        index: usize,
    ) -> Result<u128, PoolError> {
        self.read(|meta| meta.calculate_remove_liquidity_one_token(shares, index))
    }
}
