//! End-to-end accounting scenarios for plain pools

mod common;

use common::{addr, units, Harness, ALICE, BOB, DAY, DEADLINE, NOW, OWNER};
use stableswap_math::PRECISION;
use stableswap_pool::{
    FlashLoanReceiver, FlashLoanTerms, LedgerError, LedgerTx, PoolError, PoolPhase,
    StableSwapPool,
};

#[test]
fn test_alternating_swaps_grow_virtual_price() {
    let h = Harness::new();
    let decimals = [18, 6];
    let pool = h.seeded_pool(100, &decimals, 50, 10_000_000, 50);
    let bob = addr(BOB);

    let seeded_vp = pool.get_virtual_price().unwrap();
    assert_eq!(seeded_vp, PRECISION);

    let mut last_vp = seeded_vp;
    for round in 0..100 {
        let (i, j, dx) = if round % 2 == 0 {
            (0, 1, units(1, 18))
        } else {
            (1, 0, units(1, 6))
        };
        let quote = pool.calculate_swap(i, j, dx).unwrap();
        let dy = pool.swap(bob, i, j, dx, quote, DEADLINE).unwrap();
        assert_eq!(dy, quote);

        let vp = pool.get_virtual_price().unwrap();
        assert!(vp >= last_vp, "round {round}: {vp} < {last_vp}");
        last_vp = vp;
    }
    assert!(last_vp > seeded_vp);

    let state = pool.state().unwrap();
    for (index, token) in state.tokens.iter().enumerate() {
        assert_eq!(
            h.balance(token.address, state.address),
            state.balances[index] + state.admin_balances[index]
        );
    }
}

#[test]
fn test_proportional_exit_and_reentry_round_trips_shares() {
    let h = Harness::new();
    let decimals = [18, 18];
    let pool = h.seeded_pool(200, &decimals, 200, 4_000_000, 100);
    let (alice, bob) = (addr(ALICE), addr(BOB));

    // skew the pool first
    pool.swap(bob, 0, 1, units(30, 18), 0, DEADLINE).unwrap();

    let shares = 10 * PRECISION;
    let amounts = pool.remove_liquidity(alice, shares, &[0, 0], DEADLINE).unwrap();
    assert!(amounts.iter().all(|amount| *amount > 0));
    let minted = pool.add_liquidity(alice, &amounts, 0, DEADLINE).unwrap();
    assert!(shares.abs_diff(minted) <= 10, "shares {shares}, minted {minted}");
}

#[test]
fn test_round_trip_swap_costs_about_two_fees() {
    let h = Harness::new();
    let decimals = [18, 18];
    let swap_fee = 4_000_000u64;
    let pool = h.seeded_pool(300, &decimals, 200, swap_fee, 100);
    let bob = addr(BOB);

    let dx = PRECISION;
    let dy = pool.swap(bob, 0, 1, dx, 0, DEADLINE).unwrap();
    let back = pool.swap(bob, 1, 0, dy, 0, DEADLINE).unwrap();

    assert!(back < dx);
    let loss = dx - back;
    let two_fees = dx * 2 * u128::from(swap_fee) / 10_000_000_000;
    assert!(loss <= two_fees * 11 / 10, "loss {loss}, two fees {two_fees}");
}

#[test]
fn test_imbalanced_deposit_and_withdrawals_match_quotes() {
    let h = Harness::new();
    let decimals = [18, 18];
    let pool = h.seeded_pool(400, &decimals, 200, 4_000_000, 100);
    let bob = addr(BOB);
    let lp = pool.state().unwrap().lp_token.address;
    let mut vp = pool.get_virtual_price().unwrap();

    let fee_less = pool.calculate_token_amount(&[units(10, 18), 0], true).unwrap();
    let minted = pool.add_liquidity(bob, &[units(10, 18), 0], 0, DEADLINE).unwrap();
    assert!(minted > 0 && minted <= fee_less);
    assert_eq!(h.balance(lp, bob), minted);
    assert!(pool.get_virtual_price().unwrap() >= vp);
    vp = pool.get_virtual_price().unwrap();

    let burn_quote = pool.calculate_token_amount(&[units(5, 18), 0], false).unwrap();
    assert!(matches!(
        pool.remove_liquidity_imbalance(bob, &[units(5, 18), 0], burn_quote / 2, DEADLINE),
        Err(PoolError::BurnExceedsMaximum { .. })
    ));
    let burned = pool
        .remove_liquidity_imbalance(bob, &[units(5, 18), 0], minted, DEADLINE)
        .unwrap();
    assert!(burned >= burn_quote && burned < minted);
    assert!(pool.get_virtual_price().unwrap() >= vp);
    vp = pool.get_virtual_price().unwrap();

    let remaining = minted - burned;
    let quote = pool.calculate_remove_liquidity_one_token(remaining, 1).unwrap();
    let token = pool.get_token(1).unwrap();
    let before = h.balance(token, bob);
    let dy = pool
        .remove_liquidity_one_token(bob, remaining, 1, quote, DEADLINE)
        .unwrap();
    assert_eq!(dy, quote);
    assert_eq!(h.balance(token, bob), before + dy);
    assert_eq!(h.balance(lp, bob), 0);
    assert!(pool.get_virtual_price().unwrap() >= vp);
}

#[test]
fn test_withdraw_one_rejects_more_than_supply() {
    let h = Harness::new();
    let pool = h.seeded_pool(500, &[18, 18], 200, 4_000_000, 100);
    let supply = pool.state().unwrap().lp_supply;
    assert!(matches!(
        pool.calculate_remove_liquidity_one_token(supply + 1, 0),
        Err(PoolError::ExceedsTotalSupply { .. })
    ));
    assert!(matches!(
        pool.remove_liquidity_one_token(addr(ALICE), supply, 5, 0, DEADLINE),
        Err(PoolError::IndexOutOfRange { index: 5, len: 2 })
    ));
}

#[test]
fn test_drained_pool_accepts_a_fresh_first_deposit() {
    let h = Harness::new();
    let decimals = [18, 6];
    let pool = h.seeded_pool(600, &decimals, 100, 4_000_000, 10);
    let alice = addr(ALICE);

    let supply = pool.state().unwrap().lp_supply;
    pool.remove_liquidity(alice, supply, &[0, 0], DEADLINE).unwrap();
    let state = pool.state().unwrap();
    assert_eq!(state.phase(), PoolPhase::Drained);
    assert_eq!(state.balances, vec![0, 0]);
    assert_eq!(pool.get_virtual_price().unwrap(), 0);

    assert!(matches!(
        pool.add_liquidity(alice, &[units(1, 18), 0], 0, DEADLINE),
        Err(PoolError::MustSupplyAllTokens)
    ));
    let minted = pool
        .add_liquidity(alice, &[units(5, 18), units(5, 6)], 0, DEADLINE)
        .unwrap();
    assert_eq!(minted, 10 * PRECISION);
    assert_eq!(pool.state().unwrap().phase(), PoolPhase::Seeded);
    assert_eq!(pool.get_virtual_price().unwrap(), PRECISION);
}

#[test]
fn test_last_provider_must_exit_proportionally() {
    let h = Harness::new();
    let pool = h.seeded_pool(650, &[18, 18], 200, 4_000_000, 100);
    let alice = addr(ALICE);
    let supply = pool.state().unwrap().lp_supply;
    let before = pool.state().unwrap();

    assert!(matches!(
        pool.calculate_remove_liquidity_one_token(supply, 0),
        Err(PoolError::FullExitNotProportional { .. })
    ));
    assert!(matches!(
        pool.remove_liquidity_one_token(alice, supply, 0, 0, DEADLINE),
        Err(PoolError::FullExitNotProportional { supply: s }) if s == supply
    ));
    assert_eq!(pool.state().unwrap(), before);

    pool.remove_liquidity_one_token(alice, supply / 2, 0, 0, DEADLINE)
        .unwrap();
    let rest = pool.state().unwrap().lp_supply;
    assert_eq!(rest, supply - supply / 2);

    let amounts = pool.remove_liquidity(alice, rest, &[0, 0], DEADLINE).unwrap();
    let state = pool.state().unwrap();
    assert_eq!(state.phase(), PoolPhase::Drained);
    assert_eq!(state.balances, vec![0, 0]);
    assert!(amounts.iter().all(|amount| *amount > 0));
}

#[test]
fn test_imbalanced_withdrawal_cannot_burn_the_whole_supply() {
    let h = Harness::new();
    let decimals = [18, 18];
    let tokens = Harness::tokens(660, &decimals);
    let pool = h.pool(h.params(tokens.clone(), &decimals, 200, 4_000_000));
    let bob = addr(BOB);
    h.fund(bob, &tokens, &decimals, 1_000_000);

    assert_eq!(pool.add_liquidity(bob, &[1, 1], 0, DEADLINE).unwrap(), 2);
    pool.set_flash_loan_fees(addr(OWNER), 10_000, 0).unwrap();
    let surplus = 1_000_000_000_000;
    inflate(&pool, &Donor { address: bob, surplus }, &tokens);
    assert_eq!(pool.state().unwrap().balances, vec![surplus + 2, surplus + 2]);

    // leaves [1, 1] behind while burning both wei of supply
    let before = pool.state().unwrap();
    assert!(matches!(
        pool.remove_liquidity_imbalance(bob, &[surplus + 1, surplus + 1], u128::MAX, DEADLINE),
        Err(PoolError::FullExitNotProportional { supply: 2 })
    ));
    assert_eq!(pool.state().unwrap(), before);

    let amounts = pool.remove_liquidity(bob, 2, &[0, 0], DEADLINE).unwrap();
    assert_eq!(amounts, vec![surplus + 2, surplus + 2]);
    assert_eq!(pool.state().unwrap().phase(), PoolPhase::Drained);
}

#[test]
fn test_identical_pools_cannot_share_custody() {
    let h = Harness::new();
    let decimals = [18, 18];
    let tokens = Harness::tokens(680, &decimals);
    let params = h.params(tokens, &decimals, 200, 4_000_000);
    let first = h.pool(params.clone());
    let lp = first.state().unwrap().lp_token.address;

    assert!(matches!(
        StableSwapPool::create(params, h.env.clone()),
        Err(PoolError::Ledger(LedgerError::TokenAlreadyRegistered(token))) if token == lp
    ));
}

/// Repays principal, fee and a fixed surplus
struct Donor {
    address: stableswap_pool::Address,
    surplus: u128,
}

impl FlashLoanReceiver for Donor {
    fn address(&self) -> stableswap_pool::Address {
        self.address
    }

    fn execute_operation(&self, terms: &FlashLoanTerms, tx: &mut LedgerTx) -> anyhow::Result<()> {
        tx.transfer(
            terms.token,
            self.address,
            terms.pool,
            terms.amount + terms.fee + self.surplus,
        );
        Ok(())
    }
}

fn inflate(pool: &StableSwapPool, donor: &Donor, tokens: &[stableswap_pool::Address]) {
    for token in tokens {
        pool.flash_loan(donor.address, donor, *token, 1, &[]).unwrap();
    }
}

#[test]
fn test_dust_supply_inflation_cannot_steal_a_deposit() {
    let h = Harness::new();
    let decimals = [18, 18];
    let tokens = Harness::tokens(700, &decimals);
    let pool = h.pool(h.params(tokens.clone(), &decimals, 200, 4_000_000));
    let (alice, bob) = (addr(ALICE), addr(BOB));
    h.fund(alice, &tokens, &decimals, 1_000);
    h.fund(bob, &tokens, &decimals, 1_000_000);

    // one wei of LP supply
    let minted = pool.add_liquidity(bob, &[1, 1], 0, DEADLINE).unwrap();
    assert_eq!(minted, 2);
    pool.remove_liquidity(bob, 1, &[0, 0], DEADLINE).unwrap();
    assert_eq!(pool.state().unwrap().lp_supply, 1);

    // pump the balances behind that single wei through overpaid flash loans
    pool.set_flash_loan_fees(addr(OWNER), 10_000, 0).unwrap();
    let surplus = 1_000_000_000_000;
    inflate(&pool, &Donor { address: bob, surplus }, &tokens);
    assert_eq!(pool.state().unwrap().balances, vec![surplus + 2, surplus + 2]);

    let before = pool.state().unwrap();
    assert!(matches!(
        pool.add_liquidity(alice, &[1_000, 1_000], 0, DEADLINE),
        Err(PoolError::CannotMintZero)
    ));
    assert!(matches!(
        pool.add_liquidity(alice, &[1_000, 1_000], 1, DEADLINE),
        Err(PoolError::MintBelowMinimum { min: 1, actual: 0 })
    ));
    assert_eq!(pool.state().unwrap(), before);
    assert_eq!(h.balance(tokens[0], alice), units(1_000, 18));
}

#[test]
fn test_virtual_price_holds_through_ramps_both_ways() {
    let h = Harness::new();
    let decimals = [18, 6, 18];
    let pool = h.seeded_pool(800, &decimals, 100, 4_000_000, 1_000);
    let (owner, bob) = (addr(OWNER), addr(BOB));

    let trade = |label: &str| {
        for (i, j, dx) in [(0, 1, units(50, 18)), (1, 2, units(70, 6)), (2, 0, units(20, 18))] {
            let before = pool.get_virtual_price().unwrap();
            pool.swap(bob, i, j, dx, 0, DEADLINE).unwrap();
            let after = pool.get_virtual_price().unwrap();
            assert!(after >= before, "{label}: swap {i}->{j} lowered vp");
        }
        let before = pool.get_virtual_price().unwrap();
        pool.add_liquidity(bob, &[units(10, 18), 0, units(3, 18)], 0, DEADLINE)
            .unwrap();
        assert!(pool.get_virtual_price().unwrap() >= before, "{label}: deposit lowered vp");
    };

    h.clock.set(NOW + DAY);
    pool.ramp_a(owner, 200, NOW + 15 * DAY).unwrap();
    h.clock.advance(3 * DAY);
    assert!((100..200).contains(&pool.get_a().unwrap()));
    trade("ramp up");

    h.clock.set(NOW + 16 * DAY);
    assert_eq!(pool.get_a().unwrap(), 200);
    pool.ramp_a(owner, 100, NOW + 30 * DAY).unwrap();
    h.clock.advance(5 * DAY);
    assert!((100..200).contains(&pool.get_a().unwrap()));
    trade("ramp down");

    pool.stop_ramp_a(owner).unwrap();
    let frozen = pool.get_a_precise().unwrap();
    h.clock.advance(10 * DAY);
    assert_eq!(pool.get_a_precise().unwrap(), frozen);
}
