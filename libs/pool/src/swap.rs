//! Plain StableSwap pool accounting
//!
//! [`Swap`] owns one pool's [`PoolState`] and implements deposits, swaps and
//! the three withdrawal flavours on top of the invariant solver. Every
//! mutating operation follows the same shape:
//!
//! 1. validate and compute against the current state,
//! 2. mutate the state and stage ledger ops into a [`LedgerTx`],
//! 3. settle the transaction, then deliver buffered events.
//!
//! If any step fails the state is restored from a copy taken before step 1,
//! nothing is settled and no event is delivered.
//!
//! Balances are scaled to working precision through per-token *rates*. A
//! plain pool uses `multiplier * 10^18` for every token; [`MetaSwap`](crate::MetaSwap)
//! reuses the same staged operations with the base LP slot priced at the base
//! pool's virtual price.

use crate::clock::Clock;
use crate::errors::PoolError;
use crate::events::{EventSink, PoolEvent};
use crate::ledger::{LedgerTx, TokenLedger};
use crate::lp_token::LpToken;
use crate::state::{FlashLoanFees, PoolState, TokenRef};
use crate::types::Address;
use stableswap_config::EngineConfig;
use stableswap_math::fixed_point::{checked_add, checked_mul, checked_sub};
use stableswap_math::{
    difference, fee_amount, fee_per_token, from_working, get_d, get_y, get_y_d, mul_div,
    plain_rate, precision_multiplier, to_u128, to_working, xp, AmplificationState, MathError,
    RampLimits, A_PRECISION, FEE_DENOMINATOR, MAX_ADMIN_FEE, MAX_SWAP_FEE, PRECISION, U256,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MIN_TOKENS: usize = 2;
pub const MAX_TOKENS: usize = 32;

/// Working units added to a reverse quote's target so the forward quote of
/// its answer never comes up short
const SWAP_INPUT_PADDING: u64 = 10;

/// Parameters fixed when a pool is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitParams {
    pub tokens: Vec<Address>,
    pub decimals: Vec<u8>,
    pub lp_name: String,
    pub lp_symbol: String,
    /// Raw amplification coefficient
    pub a: u128,
    pub swap_fee: u64,
    pub admin_fee: u64,
    pub owner: Address,
}

/// Collaborators shared by every pool of an engine
#[derive(Clone)]
pub struct PoolEnv {
    pub ledger: Arc<dyn TokenLedger>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub ramp_limits: RampLimits,
    /// Flash loan pricing given to newly created pools
    pub flash_loan: FlashLoanFees,
}

impl PoolEnv {
    pub fn new(
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger,
            clock,
            events,
            ramp_limits: RampLimits::default(),
            flash_loan: FlashLoanFees::default(),
        }
    }

    /// Environment with limits and defaults taken from engine configuration
    pub fn from_config(
        config: &EngineConfig,
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger,
            clock,
            events,
            ramp_limits: config.ramp.limits(),
            flash_loan: FlashLoanFees::from(&config.flash_loan),
        }
    }

    pub fn with_ramp_limits(mut self, limits: RampLimits) -> Self {
        self.ramp_limits = limits;
        self
    }

    pub fn with_flash_loan_fees(mut self, fees: FlashLoanFees) -> Self {
        self.flash_loan = fees;
        self
    }
}

pub(crate) fn add_u128(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

pub(crate) fn sub_u128(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow)
}

/// Output of a swap quote, in the output token's native units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SwapQuote {
    pub dy: u128,
    pub admin_fee: u128,
}

/// Output of a single-token withdrawal quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WithdrawOneQuote {
    pub dy: u128,
    pub fee: u128,
}

pub struct Swap {
    pub(crate) state: PoolState,
    pub(crate) env: PoolEnv,
}

impl fmt::Debug for Swap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swap").field("state", &self.state).finish()
    }
}

impl Swap {
    /// Create a pool and deploy its LP token
    pub fn initialize(params: InitParams, env: PoolEnv) -> Result<Self, PoolError> {
        let InitParams {
            tokens,
            decimals,
            lp_name,
            lp_symbol,
            a,
            swap_fee,
            admin_fee,
            owner,
        } = params;

        let count = tokens.len();
        if !(MIN_TOKENS..=MAX_TOKENS).contains(&count) {
            return Err(PoolError::InvalidTokenCount {
                count,
                min: MIN_TOKENS,
                max: MAX_TOKENS,
            });
        }
        if decimals.len() != count {
            return Err(PoolError::LengthMismatch {
                expected: count,
                actual: decimals.len(),
            });
        }
        let mut seen = HashSet::with_capacity(count);
        for (index, token) in tokens.iter().enumerate() {
            if token.is_zero() {
                return Err(PoolError::ZeroAddress { index });
            }
            if !seen.insert(*token) {
                return Err(PoolError::DuplicateToken(*token));
            }
        }
        let multipliers = decimals
            .iter()
            .map(|d| precision_multiplier(*d))
            .collect::<Result<Vec<_>, _>>()?;
        if swap_fee > MAX_SWAP_FEE {
            return Err(PoolError::FeeOutOfRange {
                value: u128::from(swap_fee),
                max: u128::from(MAX_SWAP_FEE),
            });
        }
        if admin_fee > MAX_ADMIN_FEE {
            return Err(PoolError::FeeOutOfRange {
                value: u128::from(admin_fee),
                max: u128::from(MAX_ADMIN_FEE),
            });
        }
        let amp = AmplificationState::new(a)?;

        let mut seed: Vec<&[u8]> = vec![
            b"stableswap-pool".as_slice(),
            owner.as_bytes(),
            lp_name.as_bytes(),
            lp_symbol.as_bytes(),
        ];
        seed.extend(tokens.iter().map(|t| t.as_bytes()));
        let address = Address::derive(&seed);
        let lp_token = LpToken::deploy(env.ledger.as_ref(), &lp_name, &lp_symbol, address)?;

        let state = PoolState {
            address,
            owner,
            lp_token,
            tokens: tokens
                .iter()
                .zip(&decimals)
                .map(|(address, decimals)| TokenRef {
                    address: *address,
                    decimals: *decimals,
                })
                .collect(),
            multipliers,
            balances: vec![0; count],
            admin_balances: vec![0; count],
            lp_supply: 0,
            seeded: false,
            swap_fee,
            admin_fee,
            amp,
            flash_loan: env.flash_loan,
        };

        info!(
            pool = %address,
            lp_token = %state.lp_token.address,
            tokens = count,
            a,
            swap_fee,
            admin_fee,
            "StableSwap pool initialized"
        );
        Ok(Self { state, env })
    }

    /// Rebuild a pool from persisted state
    pub fn from_state(state: PoolState, env: PoolEnv) -> Result<Self, PoolError> {
        state.lp_token.attach(env.ledger.as_ref())?;
        Ok(Self { state, env })
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, PoolError> {
        Ok(bincode::serialize(&self.state)?)
    }

    /// Replace the state with a snapshot of this same pool
    pub fn restore(&mut self, snapshot: &[u8]) -> Result<(), PoolError> {
        let state: PoolState = bincode::deserialize(snapshot)?;
        if state.address != self.state.address {
            return Err(PoolError::SnapshotMismatch {
                expected: self.state.address,
                found: state.address,
            });
        }
        self.state = state;
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.state.address
    }

    pub fn owner(&self) -> Address {
        self.state.owner
    }

    pub fn lp_token(&self) -> &LpToken {
        &self.state.lp_token
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn ledger(&self) -> &Arc<dyn TokenLedger> {
        &self.env.ledger
    }

    pub(crate) fn now(&self) -> u64 {
        self.env.clock.now()
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        self.env.events.emit(event);
    }

    // ------------------------------------------------------------------
    // Read-only
    // ------------------------------------------------------------------

    pub fn get_a(&self) -> u128 {
        self.state.amp.get_a(self.now())
    }

    pub fn get_a_precise(&self) -> u128 {
        self.state.amp.get_a_precise(self.now())
    }

    pub fn get_token(&self, index: usize) -> Result<Address, PoolError> {
        self.check_index(index)?;
        Ok(self.state.tokens[index].address)
    }

    pub fn get_token_index(&self, token: &Address) -> Result<usize, PoolError> {
        self.state
            .token_index(token)
            .ok_or(PoolError::TokenNotFound(*token))
    }

    pub fn get_token_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.check_index(index)?;
        Ok(self.state.balances[index])
    }

    pub fn get_admin_balance(&self, index: usize) -> Result<u128, PoolError> {
        self.check_index(index)?;
        Ok(self.state.admin_balances[index])
    }

    /// LP value in invariant units, scaled by `10^18`; zero before the first deposit
    pub fn get_virtual_price(&self) -> Result<u128, PoolError> {
        self.virtual_price_with(&self.plain_rates()?)
    }

    pub fn calculate_swap(&self, i: usize, j: usize, dx: u128) -> Result<u128, PoolError> {
        Ok(self.quote_swap(&self.plain_rates()?, i, j, dx)?.dy)
    }

    /// Native amount of token `i` to sell for at least `dy` of token `j`
    pub fn calculate_swap_input(&self, i: usize, j: usize, dy: u128) -> Result<u128, PoolError> {
        self.quote_swap_input(&self.plain_rates()?, i, j, dy)
    }

    /// Fee-free marginal price of token `i` in whole units of token `j`, scaled by `10^18`
    pub fn relative_price(&self, i: usize, j: usize) -> Result<u128, PoolError> {
        self.relative_price_with(&self.plain_rates()?, i, j)
    }

    /// Fee-less LP amount minted (`deposit`) or burned for `amounts`
    pub fn calculate_token_amount(&self, amounts: &[u128], deposit: bool) -> Result<u128, PoolError> {
        self.token_amount_with(&self.plain_rates()?, amounts, deposit)
    }

    pub fn calculate_remove_liquidity(&self, shares: u128) -> Result<Vec<u128>, PoolError> {
        let supply = self.state.lp_supply;
        if shares > supply {
            return Err(PoolError::ExceedsTotalSupply {
                amount: shares,
                supply,
            });
        }
        if supply == 0 {
            return Ok(vec![0; self.state.num_tokens()]);
        }
        self.state
            .balances
            .iter()
            .map(|balance| {
                to_u128(mul_div(U256::from(*balance), U256::from(shares), U256::from(supply))?)
                    .map_err(PoolError::from)
            })
            .collect()
    }

    pub fn calculate_remove_liquidity_one_token(
        &self,
        shares: u128,
        index: usize,
    ) -> Result<u128, PoolError> {
        Ok(self.quote_withdraw_one(&self.plain_rates()?, shares, index)?.dy)
    }

    // ------------------------------------------------------------------
    // Mutating
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
        self.check_deadline(deadline)?;
        let rates = self.plain_rates()?;
        self.transact(|pool, tx, events| pool.apply_swap(tx, events, &rates, caller, i, j, dx, min_dy))
    }

    /// Deposit `amounts`; returns the LP amount minted to `caller`
    pub fn add_liquidity(
        &mut self,
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.check_deadline(deadline)?;
        let rates = self.plain_rates()?;
        self.transact(|pool, tx, events| {
            pool.apply_add_liquidity(tx, events, &rates, caller, amounts, min_mint)
        })
    }

    /// Burn `shares` for a proportional, fee-free share of every balance
    pub fn remove_liquidity(
        &mut self,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
        deadline: u64,
    ) -> Result<Vec<u128>, PoolError> {
        self.check_deadline(deadline)?;
        self.transact(|pool, tx, events| pool.apply_remove_liquidity(tx, events, caller, shares, min_amounts))
    }

    pub fn remove_liquidity_one_token(
        &mut self,
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.check_deadline(deadline)?;
        let rates = self.plain_rates()?;
        self.transact(|pool, tx, events| {
            pool.apply_remove_liquidity_one_token(tx, events, &rates, caller, shares, index, min_amount)
        })
    }

    /// Withdraw exact `amounts`; returns the LP amount burned
    pub fn remove_liquidity_imbalance(
        &mut self,
        caller: Address,
        amounts: &[u128],
        max_burn: u128,
        deadline: u64,
    ) -> Result<u128, PoolError> {
        self.check_deadline(deadline)?;
        let rates = self.plain_rates()?;
        self.transact(|pool, tx, events| {
            pool.apply_remove_liquidity_imbalance(tx, events, &rates, caller, amounts, max_burn)
        })
    }

    // ------------------------------------------------------------------
    // Shared machinery
    // ------------------------------------------------------------------

    /// Run `op` atomically: settle its ledger ops and deliver its events, or
    /// restore the previous state
    pub(crate) fn transact<R>(
        &mut self,
        op: impl FnOnce(&mut Self, &mut LedgerTx, &mut Vec<PoolEvent>) -> Result<R, PoolError>,
    ) -> Result<R, PoolError> {
        let saved = self.state.clone();
        let mut tx = LedgerTx::new();
        let mut events = Vec::new();

        let outcome = op(self, &mut tx, &mut events).and_then(|value| {
            self.env.ledger.settle(tx)?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                for event in events {
                    self.env.events.emit(event);
                }
                Ok(value)
            }
            Err(err) => {
                self.state = saved;
                warn!(pool = %self.state.address, error = %err, "pool operation rolled back");
                Err(err)
            }
        }
    }

    pub(crate) fn plain_rates(&self) -> Result<Vec<U256>, PoolError> {
        self.state
            .multipliers
            .iter()
            .map(|m| plain_rate(*m).map_err(PoolError::from))
            .collect()
    }

    pub(crate) fn check_deadline(&self, deadline: u64) -> Result<(), PoolError> {
        let now = self.now();
        if now > deadline {
            return Err(PoolError::DeadlineExpired { deadline, now });
        }
        Ok(())
    }

    pub(crate) fn check_owner(&self, caller: Address) -> Result<(), PoolError> {
        if caller != self.state.owner {
            warn!(pool = %self.state.address, %caller, "privileged call rejected");
            return Err(PoolError::Unauthorized { caller });
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), PoolError> {
        let len = self.state.num_tokens();
        if index >= len {
            return Err(PoolError::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    fn check_pair(&self, i: usize, j: usize) -> Result<(), PoolError> {
        self.check_index(i)?;
        self.check_index(j)?;
        if i == j {
            return Err(PoolError::SameToken { index: i });
        }
        Ok(())
    }

    fn check_length(&self, actual: usize) -> Result<(), PoolError> {
        let expected = self.state.num_tokens();
        if actual != expected {
            return Err(PoolError::LengthMismatch { expected, actual });
        }
        Ok(())
    }

    /// Fail unless `holder` will own `needed` of `token` once `tx` settles
    pub(crate) fn ensure_owns(
        &self,
        tx: &LedgerTx,
        token: Address,
        holder: Address,
        needed: u128,
    ) -> Result<(), PoolError> {
        let available = tx.projected_balance(self.env.ledger.as_ref(), &token, &holder);
        if available < needed {
            return Err(PoolError::InsufficientBalance {
                token,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn invariant(&self, balances: &[u128], rates: &[U256], a_precise: u128) -> Result<U256, PoolError> {
        Ok(get_d(&xp(balances, rates)?, a_precise)?)
    }

    pub(crate) fn virtual_price_with(&self, rates: &[U256]) -> Result<u128, PoolError> {
        let supply = self.state.lp_supply;
        if supply == 0 {
            return Ok(0);
        }
        let d = self.invariant(&self.state.balances, rates, self.get_a_precise())?;
        Ok(to_u128(mul_div(d, U256::from(PRECISION), U256::from(supply))?)?)
    }

    pub(crate) fn quote_swap(
        &self,
        rates: &[U256],
        i: usize,
        j: usize,
        dx: u128,
    ) -> Result<SwapQuote, PoolError> {
        self.check_pair(i, j)?;
        let xp = xp(&self.state.balances, rates)?;
        let x = checked_add(to_working(dx, rates[i])?, xp[i])?;
        let y = get_y(self.get_a_precise(), i, j, x, &xp)?;
        let dy = checked_sub(checked_sub(xp[j], y)?, U256::one())?;
        let dy_fee = fee_amount(dy, U256::from(self.state.swap_fee))?;
        let out = from_working(checked_sub(dy, dy_fee)?, rates[j])?;
        let admin_fee = from_working(fee_amount(dy_fee, U256::from(self.state.admin_fee))?, rates[j])?;
        debug!(i, j, dx, dy = out, "swap quoted");
        Ok(SwapQuote { dy: out, admin_fee })
    }

    /// Inverse of `quote_swap`: solve for the input balance that leaves `dy`
    /// plus the grossed-up fee on the output side
    pub(crate) fn quote_swap_input(
        &self,
        rates: &[U256],
        i: usize,
        j: usize,
        dy: u128,
    ) -> Result<u128, PoolError> {
        self.check_pair(i, j)?;
        if dy == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let xp = xp(&self.state.balances, rates)?;
        let fee_denominator = U256::from(FEE_DENOMINATOR);
        let net = checked_sub(fee_denominator, U256::from(self.state.swap_fee))?;
        let dy_with_fee = checked_add(
            mul_div(to_working(dy, rates[j])?, fee_denominator, net)?,
            U256::from(SWAP_INPUT_PADDING),
        )?;
        if dy_with_fee >= xp[j] {
            return Err(PoolError::InsufficientBalance {
                token: self.state.tokens[j].address,
                needed: dy,
                available: self.state.balances[j],
            });
        }

        let y = checked_sub(xp[j], dy_with_fee)?;
        let x = get_y(self.get_a_precise(), j, i, y, &xp)?;
        // round the input up by one native unit
        let dx = add_u128(from_working(checked_sub(x, xp[i])?, rates[i])?, 1)?;
        debug!(i, j, dy, dx, "swap input quoted");
        Ok(dx)
    }

    /// `-dx_j / dx_i` along the invariant, from its partial derivatives
    /// `Ann + D^(n+1) / (n^n * P * x_k)`
    pub(crate) fn relative_price_with(
        &self,
        rates: &[U256],
        i: usize,
        j: usize,
    ) -> Result<u128, PoolError> {
        self.check_pair(i, j)?;
        let xp = xp(&self.state.balances, rates)?;
        let a = self.get_a_precise();
        let n = U256::from(xp.len());
        let d = get_d(&xp, a)?;

        let mut d_p = d;
        for x in &xp {
            d_p = mul_div(d_p, d, checked_mul(*x, n)?)?;
        }
        // both weights carry the A_PRECISION scale of `a`
        let ann = checked_mul(U256::from(a), n)?;
        let d_p = checked_mul(d_p, U256::from(A_PRECISION))?;
        let weight_i = checked_add(checked_mul(ann, xp[i])?, d_p)?;
        let weight_j = checked_add(checked_mul(ann, xp[j])?, d_p)?;

        let price = mul_div(mul_div(xp[j], weight_i, xp[i])?, U256::from(PRECISION), weight_j)?;
        Ok(to_u128(price)?)
    }

    pub(crate) fn token_amount_with(
        &self,
        rates: &[U256],
        amounts: &[u128],
        deposit: bool,
    ) -> Result<u128, PoolError> {
        self.check_length(amounts.len())?;
        let a = self.get_a_precise();
        let balances = &self.state.balances;
        let d0 = self.invariant(balances, rates, a)?;
        let updated = balances
            .iter()
            .zip(amounts)
            .enumerate()
            .map(|(index, (balance, amount))| {
                if deposit {
                    add_u128(*balance, *amount).map_err(PoolError::from)
                } else {
                    balance.checked_sub(*amount).ok_or(PoolError::InsufficientBalance {
                        token: self.state.tokens[index].address,
                        needed: *amount,
                        available: *balance,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let d1 = self.invariant(&updated, rates, a)?;

        let supply = self.state.lp_supply;
        if supply == 0 {
            return Ok(to_u128(d1)?);
        }
        let diff = if deposit {
            checked_sub(d1, d0)?
        } else {
            checked_sub(d0, d1)?
        };
        Ok(to_u128(mul_div(diff, U256::from(supply), d0)?)?)
    }

    pub(crate) fn quote_withdraw_one(
        &self,
        rates: &[U256],
        shares: u128,
        index: usize,
    ) -> Result<WithdrawOneQuote, PoolError> {
        self.check_index(index)?;
        if shares == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let supply = self.state.lp_supply;
        if shares > supply {
            return Err(PoolError::ExceedsTotalSupply {
                amount: shares,
                supply,
            });
        }
        // the other balances would stay behind with no shares left to claim them
        if shares == supply {
            return Err(PoolError::FullExitNotProportional { supply });
        }

        let a = self.get_a_precise();
        let xp = xp(&self.state.balances, rates)?;
        let d0 = get_d(&xp, a)?;
        let d1 = checked_sub(d0, mul_div(U256::from(shares), d0, U256::from(supply))?)?;
        let new_y = get_y_d(a, index, &xp, d1)?;

        let fee_per_token = fee_per_token(self.state.swap_fee, xp.len())?;
        let xp_reduced = xp
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let scaled = mul_div(*x, d1, d0)?;
                let expected_dx = if i == index {
                    checked_sub(scaled, new_y)?
                } else {
                    checked_sub(*x, scaled)?
                };
                checked_sub(*x, fee_amount(expected_dx, fee_per_token)?)
            })
            .collect::<Result<Vec<_>, MathError>>()?;

        let y_reduced = get_y_d(a, index, &xp_reduced, d1)?;
        let dy_working = checked_sub(checked_sub(xp_reduced[index], y_reduced)?, U256::one())?;
        let dy = from_working(dy_working, rates[index])?;
        let gross = from_working(checked_sub(xp[index], new_y)?, rates[index])?;
        Ok(WithdrawOneQuote {
            dy,
            fee: gross.saturating_sub(dy),
        })
    }

    /// Stage a swap without recording an event
    pub(crate) fn stage_swap(
        &mut self,
        tx: &mut LedgerTx,
        rates: &[U256],
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
    ) -> Result<u128, PoolError> {
        self.check_pair(i, j)?;
        if dx == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let token_in = self.state.tokens[i].address;
        let token_out = self.state.tokens[j].address;
        self.ensure_owns(tx, token_in, caller, dx)?;

        let quote = self.quote_swap(rates, i, j, dx)?;
        if quote.dy < min_dy {
            warn!(pool = %self.state.address, min_dy, dy = quote.dy, "swap slippage exceeded");
            return Err(PoolError::SlippageExceeded {
                min: min_dy,
                actual: quote.dy,
            });
        }

        let pool = self.state.address;
        let state = &mut self.state;
        state.balances[i] = add_u128(state.balances[i], dx)?;
        state.balances[j] = sub_u128(state.balances[j], add_u128(quote.dy, quote.admin_fee)?)?;
        state.admin_balances[j] = add_u128(state.admin_balances[j], quote.admin_fee)?;

        tx.transfer(token_in, caller, pool, dx);
        tx.transfer(token_out, pool, caller, quote.dy);
        Ok(quote.dy)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_swap(
        &mut self,
        tx: &mut LedgerTx,
        events: &mut Vec<PoolEvent>,
        rates: &[U256],
        caller: Address,
        i: usize,
        j: usize,
        dx: u128,
        min_dy: u128,
    ) -> Result<u128, PoolError> {
        let dy = self.stage_swap(tx, rates, caller, i, j, dx, min_dy)?;
        info!(
            pool = %self.state.address,
            buyer = %caller,
            i,
            j,
            sold = %self.state.display_amount(i, dx),
            bought = %self.state.display_amount(j, dy),
            "swap"
        );
        events.push(PoolEvent::TokenSwap {
            pool: self.state.address,
            buyer: caller,
            tokens_sold: dx,
            tokens_bought: dy,
            sold_id: i,
            bought_id: j,
        });
        Ok(dy)
    }

    pub(crate) fn apply_add_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        events: &mut Vec<PoolEvent>,
        rates: &[U256],
        caller: Address,
        amounts: &[u128],
        min_mint: u128,
    ) -> Result<u128, PoolError> {
        self.check_length(amounts.len())?;
        let n = self.state.num_tokens();
        let supply = self.state.lp_supply;
        if supply == 0 && amounts.iter().any(|amount| *amount == 0) {
            return Err(PoolError::MustSupplyAllTokens);
        }
        for (token, amount) in self.state.tokens.iter().zip(amounts) {
            if *amount > 0 {
                self.ensure_owns(tx, token.address, caller, *amount)?;
            }
        }

        let a = self.get_a_precise();
        let old = self.state.balances.clone();
        let d0 = if supply == 0 {
            U256::zero()
        } else {
            self.invariant(&old, rates, a)?
        };
        let mut new_balances = old
            .iter()
            .zip(amounts)
            .map(|(balance, amount)| add_u128(*balance, *amount))
            .collect::<Result<Vec<_>, _>>()?;
        let d1 = self.invariant(&new_balances, rates, a)?;
        if d1 <= d0 {
            return Err(PoolError::InvariantDidNotIncrease);
        }

        let mut fees = vec![0u128; n];
        let minted = if supply == 0 {
            self.state.balances = new_balances;
            to_u128(d1)?
        } else {
            let fee_per_token = fee_per_token(self.state.swap_fee, n)?;
            let admin_fee = U256::from(self.state.admin_fee);
            for i in 0..n {
                let ideal = mul_div(d1, U256::from(old[i]), d0)?;
                let fee = to_u128(fee_amount(difference(ideal, U256::from(new_balances[i])), fee_per_token)?)?;
                let admin = to_u128(fee_amount(U256::from(fee), admin_fee)?)?;
                self.state.balances[i] = sub_u128(new_balances[i], admin)?;
                self.state.admin_balances[i] = add_u128(self.state.admin_balances[i], admin)?;
                new_balances[i] = sub_u128(new_balances[i], fee)?;
                fees[i] = fee;
            }
            let d2 = self.invariant(&new_balances, rates, a)?;
            to_u128(mul_div(checked_sub(d2, d0)?, U256::from(supply), d0)?)?
        };

        if minted < min_mint {
            warn!(pool = %self.state.address, min_mint, minted, "deposit below minimum mint");
            return Err(PoolError::MintBelowMinimum {
                min: min_mint,
                actual: minted,
            });
        }
        let pool = self.state.address;
        self.state.lp_token.stage_mint(tx, caller, minted)?;
        for (token, amount) in self.state.tokens.iter().zip(amounts) {
            tx.transfer(token.address, caller, pool, *amount);
        }
        self.state.lp_supply = add_u128(supply, minted)?;
        self.state.seeded = true;

        info!(pool = %pool, provider = %caller, minted, supply = self.state.lp_supply, "add liquidity");
        events.push(PoolEvent::AddLiquidity {
            pool,
            provider: caller,
            token_amounts: amounts.to_vec(),
            fees,
            invariant: d1,
            lp_token_supply: self.state.lp_supply,
        });
        Ok(minted)
    }

    pub(crate) fn apply_remove_liquidity(
        &mut self,
        tx: &mut LedgerTx,
        events: &mut Vec<PoolEvent>,
        caller: Address,
        shares: u128,
        min_amounts: &[u128],
    ) -> Result<Vec<u128>, PoolError> {
        self.check_length(min_amounts.len())?;
        if shares == 0 {
            return Err(PoolError::ZeroAmount);
        }
        let amounts = self.calculate_remove_liquidity(shares)?;
        self.ensure_owns(tx, self.state.lp_token.address, caller, shares)?;

        let pool = self.state.address;
        for (index, (amount, min)) in amounts.iter().zip(min_amounts).enumerate() {
            if amount < min {
                return Err(PoolError::MinAmountNotMet {
                    index,
                    min: *min,
                    actual: *amount,
                });
            }
            self.state.balances[index] = sub_u128(self.state.balances[index], *amount)?;
            tx.transfer(self.state.tokens[index].address, pool, caller, *amount);
        }
        self.state.lp_token.stage_burn(tx, caller, shares);
        self.state.lp_supply = sub_u128(self.state.lp_supply, shares)?;

        info!(pool = %pool, provider = %caller, shares, supply = self.state.lp_supply, "remove liquidity");
        events.push(PoolEvent::RemoveLiquidity {
            pool,
            provider: caller,
            token_amounts: amounts.clone(),
            lp_token_supply: self.state.lp_supply,
        });
        Ok(amounts)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_remove_liquidity_one_token(
        &mut self,
        tx: &mut LedgerTx,
        events: &mut Vec<PoolEvent>,
        rates: &[U256],
        caller: Address,
        shares: u128,
        index: usize,
        min_amount: u128,
    ) -> Result<u128, PoolError> {
        let quote = self.quote_withdraw_one(rates, shares, index)?;
        self.ensure_owns(tx, self.state.lp_token.address, caller, shares)?;
        if quote.dy < min_amount {
            warn!(pool = %self.state.address, min_amount, dy = quote.dy, "withdrawal below minimum");
            return Err(PoolError::MinAmountNotMet {
                index,
                min: min_amount,
                actual: quote.dy,
            });
        }
        let token = self.state.tokens[index].address;
        let available = self.state.balances[index];
        if quote.dy > available {
            return Err(PoolError::InsufficientBalance {
                token,
                needed: quote.dy,
                available,
            });
        }

        let admin = to_u128(fee_amount(U256::from(quote.fee), U256::from(self.state.admin_fee))?)?;
        let pool = self.state.address;
        let state = &mut self.state;
        state.balances[index] = sub_u128(state.balances[index], add_u128(quote.dy, admin)?)?;
        state.admin_balances[index] = add_u128(state.admin_balances[index], admin)?;
        state.lp_supply = sub_u128(state.lp_supply, shares)?;
        state.lp_token.stage_burn(tx, caller, shares);
        tx.transfer(token, pool, caller, quote.dy);

        info!(
            pool = %pool,
            provider = %caller,
            shares,
            index,
            withdrawn = %self.state.display_amount(index, quote.dy),
            "remove liquidity one token"
        );
        events.push(PoolEvent::RemoveLiquidityOne {
            pool,
            provider: caller,
            lp_token_amount: shares,
            lp_token_supply: self.state.lp_supply,
            bought_id: index,
            tokens_bought: quote.dy,
        });
        Ok(quote.dy)
    }

    pub(crate) fn apply_remove_liquidity_imbalance(
        &mut self,
        tx: &mut LedgerTx,
        events: &mut Vec<PoolEvent>,
        rates: &[U256],
        caller: Address,
        amounts: &[u128],
        max_burn: u128,
    ) -> Result<u128, PoolError> {
        self.check_length(amounts.len())?;
        if amounts.iter().all(|amount| *amount == 0) {
            return Err(PoolError::ZeroAmount);
        }
        let supply = self.state.lp_supply;
        if supply == 0 {
            return Err(PoolError::ExceedsTotalSupply {
                amount: max_burn,
                supply,
            });
        }

        let n = self.state.num_tokens();
        let a = self.get_a_precise();
        let old = self.state.balances.clone();
        let d0 = self.invariant(&old, rates, a)?;
        let mut new_balances = Vec::with_capacity(n);
        for (index, (balance, amount)) in old.iter().zip(amounts).enumerate() {
            let remaining = balance.checked_sub(*amount).ok_or(PoolError::InsufficientBalance {
                token: self.state.tokens[index].address,
                needed: *amount,
                available: *balance,
            })?;
            new_balances.push(remaining);
        }
        let d1 = self.invariant(&new_balances, rates, a)?;

        let fee_per_token = fee_per_token(self.state.swap_fee, n)?;
        let admin_fee = U256::from(self.state.admin_fee);
        let mut fees = vec![0u128; n];
        for i in 0..n {
            let ideal = mul_div(d1, U256::from(old[i]), d0)?;
            let fee = to_u128(fee_amount(difference(U256::from(new_balances[i]), ideal), fee_per_token)?)?;
            let admin = to_u128(fee_amount(U256::from(fee), admin_fee)?)?;
            self.state.balances[i] = sub_u128(new_balances[i], admin)?;
            self.state.admin_balances[i] = add_u128(self.state.admin_balances[i], admin)?;
            new_balances[i] = sub_u128(new_balances[i], fee)?;
            fees[i] = fee;
        }
        let d2 = self.invariant(&new_balances, rates, a)?;

        let burn = to_u128(mul_div(checked_sub(d0, d2)?, U256::from(supply), d0)?)?;
        if burn == 0 {
            return Err(PoolError::ZeroBurn);
        }
        let burn = add_u128(burn, 1)?;
        if burn > max_burn {
            warn!(pool = %self.state.address, max_burn, burn, "imbalanced withdrawal burns too much");
            return Err(PoolError::BurnExceedsMaximum {
                max: max_burn,
                actual: burn,
            });
        }
        if burn > supply {
            return Err(PoolError::ExceedsTotalSupply {
                amount: burn,
                supply,
            });
        }
        if burn == supply {
            return Err(PoolError::FullExitNotProportional { supply });
        }
        self.ensure_owns(tx, self.state.lp_token.address, caller, burn)?;

        let pool = self.state.address;
        self.state.lp_token.stage_burn(tx, caller, burn);
        for (token, amount) in self.state.tokens.iter().zip(amounts) {
            tx.transfer(token.address, pool, caller, *amount);
        }
        self.state.lp_supply = sub_u128(supply, burn)?;

        info!(pool = %pool, provider = %caller, burn, supply = self.state.lp_supply, "remove liquidity imbalance");
        events.push(PoolEvent::RemoveLiquidityImbalance {
            pool,
            provider: caller,
            token_amounts: amounts.to_vec(),
            fees,
            invariant: d1,
            lp_token_supply: self.state.lp_supply,
        });
        Ok(burn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::DiscardEvents;
    use crate::ledger::InMemoryLedger;

    const NOW: u64 = 1_700_000_000;
    const DEADLINE: u64 = NOW + 3_600;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn setup(decimals: Vec<u8>) -> (Swap, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let env = PoolEnv::new(
            ledger.clone(),
            Arc::new(ManualClock::new(NOW)),
            Arc::new(DiscardEvents),
        );
        let tokens = (0..decimals.len() as u64).map(|i| addr(100 + i)).collect();
        let params = InitParams {
            tokens,
            decimals,
            lp_name: "Test LP".into(),
            lp_symbol: "TLP".into(),
            a: 200,
            swap_fee: 4_000_000,
            admin_fee: 0,
            owner: addr(1),
        };
        (Swap::initialize(params, env).unwrap(), ledger)
    }

    fn fund(ledger: &InMemoryLedger, swap: &Swap, holder: Address, amount: u128) {
        for token in &swap.state().tokens {
            ledger.credit(token.address, holder, amount).unwrap();
        }
    }

    #[test]
    fn test_initialize_validation() {
        let ledger: Arc<dyn TokenLedger> = Arc::new(InMemoryLedger::new());
        let env = PoolEnv::new(ledger, Arc::new(ManualClock::new(NOW)), Arc::new(DiscardEvents));
        let base = InitParams {
            tokens: vec![addr(10), addr(11)],
            decimals: vec![18, 6],
            lp_name: "LP".into(),
            lp_symbol: "LP".into(),
            a: 100,
            swap_fee: 0,
            admin_fee: 0,
            owner: addr(1),
        };

        let single = InitParams { tokens: vec![addr(10)], decimals: vec![18], ..base.clone() };
        assert!(matches!(
            Swap::initialize(single, env.clone()),
            Err(PoolError::InvalidTokenCount { count: 1, .. })
        ));
        let zero = InitParams { tokens: vec![addr(10), Address::ZERO], ..base.clone() };
        assert!(matches!(
            Swap::initialize(zero, env.clone()),
            Err(PoolError::ZeroAddress { index: 1 })
        ));
        let duplicate = InitParams { tokens: vec![addr(10), addr(10)], ..base.clone() };
        assert!(matches!(
            Swap::initialize(duplicate, env.clone()),
            Err(PoolError::DuplicateToken(_))
        ));
        let decimals = InitParams { decimals: vec![18, 19], ..base.clone() };
        assert!(matches!(
            Swap::initialize(decimals, env.clone()),
            Err(PoolError::Math(MathError::UnsupportedDecimals { decimals: 19 }))
        ));
        let fee = InitParams { swap_fee: MAX_SWAP_FEE + 1, ..base.clone() };
        assert!(matches!(
            Swap::initialize(fee, env.clone()),
            Err(PoolError::FeeOutOfRange { .. })
        ));
        let amp = InitParams { a: 0, ..base.clone() };
        assert!(matches!(Swap::initialize(amp, env.clone()), Err(PoolError::Ramp(_))));

        let pool = Swap::initialize(base, env).unwrap();
        assert_eq!(pool.state().multipliers, vec![1, 1_000_000_000_000]);
        assert_eq!(pool.get_a(), 100);
        assert_eq!(pool.get_virtual_price().unwrap(), 0);
        assert_eq!(pool.state().phase(), crate::state::PoolPhase::Uninitialized);
    }

    #[test]
    fn test_first_deposit_mints_invariant() {
        let (mut pool, ledger) = setup(vec![18, 18]);
        let alice = addr(2);
        fund(&ledger, &pool, alice, 1_000 * PRECISION);

        assert!(matches!(
            pool.add_liquidity(alice, &[PRECISION, 0], 0, DEADLINE),
            Err(PoolError::MustSupplyAllTokens)
        ));
        let minted = pool
            .add_liquidity(alice, &[100 * PRECISION, 100 * PRECISION], 0, DEADLINE)
            .unwrap();
        assert_eq!(minted, 200 * PRECISION);
        assert_eq!(pool.lp_token().balance_of(ledger.as_ref(), &alice), minted);
        assert_eq!(pool.get_virtual_price().unwrap(), PRECISION);
        assert_eq!(ledger.balance_of(&addr(100), &pool.address()), 100 * PRECISION);
    }

    #[test]
    fn test_failed_operation_leaves_state_untouched() {
        let (mut pool, ledger) = setup(vec![18, 18]);
        let alice = addr(2);
        fund(&ledger, &pool, alice, 1_000 * PRECISION);
        pool.add_liquidity(alice, &[100 * PRECISION, 100 * PRECISION], 0, DEADLINE)
            .unwrap();
        let before = pool.state().clone();

        let err = pool
            .swap(alice, 0, 1, PRECISION, 2 * PRECISION, DEADLINE)
            .unwrap_err();
        assert!(matches!(err, PoolError::SlippageExceeded { .. }));
        assert_eq!(pool.state(), &before);

        let err = pool.swap(alice, 0, 1, PRECISION, 0, NOW - 1).unwrap_err();
        assert!(matches!(err, PoolError::DeadlineExpired { .. }));

        let bob = addr(3);
        let err = pool.swap(bob, 0, 1, PRECISION, 0, DEADLINE).unwrap_err();
        assert!(matches!(err, PoolError::InsufficientBalance { .. }));
        assert_eq!(pool.state(), &before);
    }

    #[test]
    fn test_swap_index_checks() {
        let (mut pool, ledger) = setup(vec![18, 18]);
        let alice = addr(2);
        fund(&ledger, &pool, alice, 1_000 * PRECISION);
        pool.add_liquidity(alice, &[100 * PRECISION, 100 * PRECISION], 0, DEADLINE)
            .unwrap();
        assert!(matches!(
            pool.swap(alice, 0, 0, 1, 0, DEADLINE),
            Err(PoolError::SameToken { index: 0 })
        ));
        assert!(matches!(
            pool.swap(alice, 0, 2, 1, 0, DEADLINE),
            Err(PoolError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert!(matches!(
            pool.swap(alice, 0, 1, 0, 0, DEADLINE),
            Err(PoolError::ZeroAmount)
        ));
    }

    #[test]
    fn test_swap_matches_quote_and_moves_tokens() {
        let (mut pool, ledger) = setup(vec![18, 6]);
        let alice = addr(2);
        ledger.credit(addr(100), alice, 1_000 * PRECISION).unwrap();
        ledger.credit(addr(101), alice, 1_000_000_000).unwrap();
        pool.add_liquidity(alice, &[100 * PRECISION, 100_000_000], 0, DEADLINE)
            .unwrap();

        let quote = pool.calculate_swap(0, 1, PRECISION).unwrap();
        let usdc_before = ledger.balance_of(&addr(101), &alice);
        let dy = pool.swap(alice, 0, 1, PRECISION, quote, DEADLINE).unwrap();
        assert_eq!(dy, quote);
        assert!(dy < 1_000_000 && dy > 990_000);
        assert_eq!(ledger.balance_of(&addr(101), &alice), usdc_before + dy);
        assert_eq!(pool.get_token_balance(0).unwrap(), 101 * PRECISION);
    }

    #[test]
    fn test_snapshot_restore() {
        let (mut pool, ledger) = setup(vec![18, 18]);
        let alice = addr(2);
        fund(&ledger, &pool, alice, 1_000 * PRECISION);
        let snapshot = pool.snapshot().unwrap();
        pool.add_liquidity(alice, &[PRECISION, PRECISION], 0, DEADLINE).unwrap();
        assert_eq!(pool.state().lp_supply, 2 * PRECISION);

        pool.restore(&snapshot).unwrap();
        assert_eq!(pool.state().lp_supply, 0);

        let mut foreign = pool.state().clone();
        foreign.address = addr(999);
        assert!(matches!(
            pool.restore(&bincode::serialize(&foreign).unwrap()),
            Err(PoolError::SnapshotMismatch { .. })
        ));
    }
}
