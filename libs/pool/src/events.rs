//! Pool events
//!
//! Events are buffered while an operation runs and only delivered after the
//! ledger has settled, so a sink never observes an operation that was later
//! rolled back.

use crate::types::Address;
use crossbeam_channel::Sender;
use stableswap_math::U256;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    TokenSwap {
        pool: Address,
        buyer: Address,
        tokens_sold: u128,
        tokens_bought: u128,
        sold_id: usize,
        bought_id: usize,
    },
    /// Swap addressed in the meta pool's underlying index space
    TokenSwapUnderlying {
        pool: Address,
        buyer: Address,
        tokens_sold: u128,
        tokens_bought: u128,
        sold_id: usize,
        bought_id: usize,
    },
    AddLiquidity {
        pool: Address,
        provider: Address,
        token_amounts: Vec<u128>,
        fees: Vec<u128>,
        invariant: U256,
        lp_token_supply: u128,
    },
    RemoveLiquidity {
        pool: Address,
        provider: Address,
        token_amounts: Vec<u128>,
        lp_token_supply: u128,
    },
    RemoveLiquidityOne {
        pool: Address,
        provider: Address,
        lp_token_amount: u128,
        lp_token_supply: u128,
        bought_id: usize,
        tokens_bought: u128,
    },
    RemoveLiquidityImbalance {
        pool: Address,
        provider: Address,
        token_amounts: Vec<u128>,
        fees: Vec<u128>,
        invariant: U256,
        lp_token_supply: u128,
    },
    RampA {
        pool: Address,
        old_a: u128,
        new_a: u128,
        initial_time: u64,
        future_time: u64,
    },
    StopRampA {
        pool: Address,
        current_a: u128,
        time: u64,
    },
    NewSwapFee {
        pool: Address,
        new_swap_fee: u64,
    },
    NewAdminFee {
        pool: Address,
        new_admin_fee: u64,
    },
    FlashLoan {
        pool: Address,
        receiver: Address,
        token_index: usize,
        amount: u128,
        amount_fee: u128,
        protocol_fee: u128,
    },
    AdminFeesWithdrawn {
        pool: Address,
        to: Address,
        amounts: Vec<u128>,
    },
}

impl PoolEvent {
    /// Pool that emitted the event
    pub fn pool(&self) -> Address {
        match self {
            PoolEvent::TokenSwap { pool, .. }
            | PoolEvent::TokenSwapUnderlying { pool, .. }
            | PoolEvent::AddLiquidity { pool, .. }
            | PoolEvent::RemoveLiquidity { pool, .. }
            | PoolEvent::RemoveLiquidityOne { pool, .. }
            | PoolEvent::RemoveLiquidityImbalance { pool, .. }
            | PoolEvent::RampA { pool, .. }
            | PoolEvent::StopRampA { pool, .. }
            | PoolEvent::NewSwapFee { pool, .. }
            | PoolEvent::NewAdminFee { pool, .. }
            | PoolEvent::FlashLoan { pool, .. }
            | PoolEvent::AdminFeesWithdrawn { pool, .. } => *pool,
        }
    }
}

/// Destination of committed pool events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PoolEvent);
}

impl EventSink for Sender<PoolEvent> {
    fn emit(&self, event: PoolEvent) {
        if let Err(err) = self.send(event) {
            warn!(pool = %err.0.pool(), "event receiver dropped, event discarded");
        }
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEvents;

impl EventSink for DiscardEvents {
    fn emit(&self, _event: PoolEvent) {}
}
