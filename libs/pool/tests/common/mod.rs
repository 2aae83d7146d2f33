//! Shared fixtures for pool integration tests

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use stableswap_pool::{
    Address, InMemoryLedger, InitParams, ManualClock, PoolEnv, PoolEvent, StableSwapPool,
    TokenLedger,
};
use std::sync::Arc;

pub const NOW: u64 = 1_700_000_000;
pub const DEADLINE: u64 = u64::MAX;
pub const DAY: u64 = 24 * 60 * 60;

pub const OWNER: u64 = 1;
pub const ALICE: u64 = 2;
pub const BOB: u64 = 3;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// `amount` whole tokens in native units
pub fn units(amount: u128, decimals: u8) -> u128 {
    amount * 10u128.pow(u32::from(decimals))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ledger, clock and event channel shared by every pool of a test
pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub events: Receiver<PoolEvent>,
    pub env: PoolEnv,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let (sender, events) = crossbeam_channel::unbounded();
        let env = PoolEnv::new(ledger.clone(), clock.clone(), Arc::new(sender));
        Self {
            ledger,
            clock,
            events,
            env,
        }
    }

    /// Tokens numbered from `first`, with the given decimals
    pub fn tokens(first: u64, decimals: &[u8]) -> Vec<Address> {
        (0..decimals.len() as u64).map(|i| addr(first + i)).collect()
    }

    pub fn params(&self, tokens: Vec<Address>, decimals: &[u8], a: u128, swap_fee: u64) -> InitParams {
        InitParams {
            tokens,
            decimals: decimals.to_vec(),
            lp_name: "Test LP Token Name".into(),
            lp_symbol: "TESTLP".into(),
            a,
            swap_fee,
            admin_fee: 0,
            owner: addr(OWNER),
        }
    }

    pub fn pool(&self, params: InitParams) -> Arc<StableSwapPool> {
        Arc::new(StableSwapPool::create(params, self.env.clone()).unwrap())
    }

    /// Give `holder` `whole` tokens of every listed token
    pub fn fund(&self, holder: Address, tokens: &[Address], decimals: &[u8], whole: u128) {
        for (token, decimals) in tokens.iter().zip(decimals) {
            self.ledger
                .credit(*token, holder, units(whole, *decimals))
                .unwrap();
        }
    }

    /// Pool seeded by `ALICE` with `whole` tokens of each asset
    pub fn seeded_pool(
        &self,
        first_token: u64,
        decimals: &[u8],
        a: u128,
        swap_fee: u64,
        whole: u128,
    ) -> Arc<StableSwapPool> {
        let tokens = Self::tokens(first_token, decimals);
        let pool = self.pool(self.params(tokens.clone(), decimals, a, swap_fee));
        self.fund(addr(ALICE), &tokens, decimals, 1_000_000);
        self.fund(addr(BOB), &tokens, decimals, 1_000_000);
        let amounts: Vec<u128> = decimals.iter().map(|d| units(whole, *d)).collect();
        pool.add_liquidity(addr(ALICE), &amounts, 0, DEADLINE).unwrap();
        pool
    }

    pub fn balance(&self, token: Address, holder: Address) -> u128 {
        self.ledger.balance_of(&token, &holder)
    }

    pub fn drain_events(&self) -> Vec<PoolEvent> {
        self.events.try_iter().collect()
    }
}
