//! Meta pool layered on a three-token base pool
//!
//! Underlying index space: `[USDX, DAI, USDC, USDT]`.

mod common;

use common::{addr, units, Harness, ALICE, BOB, DEADLINE, OWNER};
use stableswap_pool::{
    Address, BasePool, InitParams, MetaPool, PoolError, PoolEvent, StableSwapPool,
    BASE_CACHE_EXPIRES_SECS,
};
use std::sync::Arc;

const BASE_DECIMALS: [u8; 3] = [18, 6, 6];
const USDX: u64 = 60;

struct Fixture {
    h: Harness,
    base: Arc<StableSwapPool>,
    meta: MetaPool,
    base_tokens: Vec<Address>,
    usdx: Address,
}

fn meta_params(h: &Harness, usdx: Address, base_lp: Address) -> InitParams {
    InitParams {
        lp_name: "USDX Meta LP".into(),
        lp_symbol: "USDX-META".into(),
        ..h.params(vec![usdx, base_lp], &[18, 18], 100, 4_000_000)
    }
}

fn fixture() -> Fixture {
    let h = Harness::new();
    let base = h.seeded_pool(50, &BASE_DECIMALS, 200, 4_000_000, 1_000);
    let base_tokens = Harness::tokens(50, &BASE_DECIMALS);
    let usdx = addr(USDX);
    h.fund(addr(ALICE), &[usdx], &[18], 1_000_000);
    h.fund(addr(BOB), &[usdx], &[18], 1_000_000);

    let base_lp = BasePool::lp_token(base.as_ref()).unwrap();
    let meta = MetaPool::create(
        meta_params(&h, usdx, base_lp),
        base.clone(),
        h.env.clone(),
        BASE_CACHE_EXPIRES_SECS,
    )
    .unwrap();
    meta.add_liquidity(addr(ALICE), &[units(1_000, 18), units(1_000, 18)], 0, DEADLINE)
        .unwrap();
    h.drain_events();
    Fixture {
        h,
        base,
        meta,
        base_tokens,
        usdx,
    }
}

#[test]
fn test_underlying_index_space() {
    let f = fixture();
    let underlying: Vec<Address> = f
        .meta
        .underlying_tokens()
        .unwrap()
        .iter()
        .map(|t| t.address)
        .collect();
    let mut expected = vec![f.usdx];
    expected.extend(&f.base_tokens);
    assert_eq!(underlying, expected);
    assert!(matches!(
        f.meta.swap_underlying(addr(BOB), 0, 4, 1, 0, DEADLINE),
        Err(PoolError::IndexOutOfRange { index: 4, len: 4 })
    ));
    assert!(matches!(
        f.meta.add_liquidity_underlying(addr(BOB), &[1, 1], 0, DEADLINE),
        Err(PoolError::LengthMismatch { expected: 4, actual: 2 })
    ));
}

#[test]
fn test_swap_meta_token_for_base_token() {
    let f = fixture();
    let bob = addr(BOB);
    let usdc = f.base_tokens[1];
    let base_supply = f.base.state().unwrap().lp_supply;

    let quote = f.meta.calculate_swap_underlying(0, 2, units(10, 18)).unwrap();
    let before = f.h.balance(usdc, bob);
    let dy = f
        .meta
        .swap_underlying(bob, 0, 2, units(10, 18), quote, DEADLINE)
        .unwrap();

    assert_eq!(dy, quote);
    assert!(dy > units(9, 6) && dy < units(10, 6));
    assert_eq!(f.h.balance(usdc, bob), before + dy);
    // the intermediate base LP was burned again
    let base_lp = f.base.state().unwrap().lp_token.address;
    assert_eq!(f.h.balance(base_lp, bob), 0);
    assert!(f.base.state().unwrap().lp_supply < base_supply);

    let events = f.h.drain_events();
    assert!(matches!(
        events.as_slice(),
        [
            PoolEvent::RemoveLiquidityOne { .. },
            PoolEvent::TokenSwapUnderlying { sold_id: 0, bought_id: 2, .. },
        ]
    ));
    assert_eq!(events[0].pool(), f.base.address().unwrap());
    assert_eq!(events[1].pool(), f.meta.address().unwrap());
}

#[test]
fn test_swap_base_token_for_meta_token() {
    let f = fixture();
    let bob = addr(BOB);
    let dai = f.base_tokens[0];

    let quote = f.meta.calculate_swap_underlying(1, 0, units(10, 18)).unwrap();
    let usdx_before = f.h.balance(f.usdx, bob);
    let dai_before = f.h.balance(dai, bob);
    let dy = f
        .meta
        .swap_underlying(bob, 1, 0, units(10, 18), 0, DEADLINE)
        .unwrap();

    assert!(dy.abs_diff(quote) * 1_000 <= quote, "dy {dy}, quote {quote}");
    assert_eq!(f.h.balance(f.usdx, bob), usdx_before + dy);
    assert_eq!(f.h.balance(dai, bob), dai_before - units(10, 18));
}

#[test]
fn test_base_pair_swaps_inside_base_pool() {
    let f = fixture();
    let bob = addr(BOB);
    let meta_before = f.meta.state().unwrap();

    let quote = BasePool::calculate_swap(f.base.as_ref(), 1, 2, units(10, 6)).unwrap();
    assert_eq!(f.meta.calculate_swap_underlying(2, 3, units(10, 6)).unwrap(), quote);
    let dy = f
        .meta
        .swap_underlying(bob, 2, 3, units(10, 6), quote, DEADLINE)
        .unwrap();
    assert_eq!(dy, quote);
    assert_eq!(f.meta.state().unwrap().balances, meta_before.balances);

    let events = f.h.drain_events();
    assert!(matches!(
        events.as_slice(),
        [
            PoolEvent::TokenSwap { sold_id: 1, bought_id: 2, .. },
            PoolEvent::TokenSwapUnderlying { sold_id: 2, bought_id: 3, .. },
        ]
    ));
}

#[test]
fn test_failed_underlying_swap_rolls_back_both_pools() {
    let f = fixture();
    let bob = addr(BOB);
    let dai = f.base_tokens[0];
    let base_before = f.base.state().unwrap();
    let meta_before = f.meta.state().unwrap();
    let dai_before = f.h.balance(dai, bob);

    let err = f
        .meta
        .swap_underlying(bob, 1, 0, units(10, 18), u128::MAX, DEADLINE)
        .unwrap_err();
    assert!(matches!(err, PoolError::SlippageExceeded { .. }));

    // base-side failure surfaces wrapped
    let err = f
        .meta
        .swap_underlying(bob, 1, 3, units(10_000_000, 18), 0, DEADLINE)
        .unwrap_err();
    assert!(matches!(err, PoolError::BasePool { .. }));
    assert!(matches!(err.root(), PoolError::InsufficientBalance { .. }));

    assert_eq!(f.base.state().unwrap(), base_before);
    assert_eq!(f.meta.state().unwrap(), meta_before);
    assert_eq!(f.h.balance(dai, bob), dai_before);
    assert!(f.h.drain_events().is_empty());

    // both pools are usable afterwards
    f.meta
        .swap_underlying(bob, 1, 0, units(1, 18), 0, DEADLINE)
        .unwrap();
    f.base.swap(bob, 0, 1, units(1, 18), 0, DEADLINE).unwrap();
}

#[test]
fn test_underlying_liquidity_round_trip() {
    let f = fixture();
    let bob = addr(BOB);
    let meta_lp = f.meta.state().unwrap().lp_token.address;
    let base_supply = f.base.state().unwrap().lp_supply;

    let minted = f
        .meta
        .add_liquidity_underlying(bob, &[units(10, 18), units(10, 18), 0, 0], 0, DEADLINE)
        .unwrap();
    assert!(minted > 0);
    assert_eq!(f.h.balance(meta_lp, bob), minted);
    assert!(f.base.state().unwrap().lp_supply > base_supply);

    let third = minted / 3;
    let amounts = f
        .meta
        .remove_liquidity_underlying(bob, third, &[0, 0, 0, 0], DEADLINE)
        .unwrap();
    assert_eq!(amounts.len(), 4);
    assert!(amounts.iter().all(|amount| *amount > 0));
    assert_eq!(f.h.balance(f.base_tokens[2], bob), units(1_000_000, 6) + amounts[3]);

    let usdt = f
        .meta
        .remove_liquidity_one_token_underlying(bob, third, 3, 0, DEADLINE)
        .unwrap();
    assert!(usdt > 0);
    assert_eq!(
        f.h.balance(f.base_tokens[2], bob),
        units(1_000_000, 6) + amounts[3] + usdt
    );
    assert_eq!(f.h.balance(meta_lp, bob), minted - 2 * third);

    let base_lp = f.base.state().unwrap().lp_token.address;
    assert_eq!(f.h.balance(base_lp, bob), 0);
}

#[test]
fn test_base_virtual_price_is_cached() {
    let f = fixture();
    let bob = addr(BOB);
    let initial = f.meta.read(|m| Ok(m.cache())).unwrap();
    assert_eq!(initial.virtual_price, f.base.get_virtual_price().unwrap());

    // fees raise the base virtual price
    for _ in 0..5 {
        f.base.swap(bob, 0, 1, units(100, 18), 0, DEADLINE).unwrap();
        f.base.swap(bob, 1, 0, units(100, 6), 0, DEADLINE).unwrap();
    }
    let base_vp = f.base.get_virtual_price().unwrap();
    assert!(base_vp > initial.virtual_price);

    f.meta.swap(bob, 0, 1, units(1, 18), 0, DEADLINE).unwrap();
    assert_eq!(f.meta.read(|m| Ok(m.cache())).unwrap(), initial);

    f.h.clock.advance(BASE_CACHE_EXPIRES_SECS + 1);
    f.meta.swap(bob, 0, 1, units(1, 18), 0, DEADLINE).unwrap();
    let refreshed = f.meta.read(|m| Ok(m.cache())).unwrap();
    assert_eq!(refreshed.virtual_price, base_vp);
    assert_eq!(refreshed.updated_at, common::NOW + BASE_CACHE_EXPIRES_SECS + 1);
}

#[test]
fn test_meta_pool_needs_seeded_matching_base() {
    let h = Harness::new();
    let base_tokens = Harness::tokens(90, &BASE_DECIMALS);
    let base = h.pool(h.params(base_tokens, &BASE_DECIMALS, 200, 4_000_000));
    let usdx = addr(USDX);
    h.fund(addr(ALICE), &[usdx], &[18], 1_000);

    assert!(matches!(
        MetaPool::create(
            meta_params(&h, usdx, addr(12_345)),
            base.clone(),
            h.env.clone(),
            BASE_CACHE_EXPIRES_SECS,
        ),
        Err(PoolError::BaseLpMismatch { .. })
    ));

    let base_lp = BasePool::lp_token(base.as_ref()).unwrap();
    let meta = MetaPool::create(
        meta_params(&h, usdx, base_lp),
        base.clone(),
        h.env.clone(),
        BASE_CACHE_EXPIRES_SECS,
    )
    .unwrap();
    assert_eq!(meta.get_virtual_price().unwrap(), 0);
    assert!(matches!(
        meta.add_liquidity(addr(ALICE), &[units(1, 18), 1], 0, DEADLINE),
        Err(PoolError::BasePoolNotSeeded)
    ));
    assert!(matches!(
        meta.set_swap_fee(addr(ALICE), 1),
        Err(PoolError::Unauthorized { .. })
    ));
    meta.set_swap_fee(addr(OWNER), 1).unwrap();
}
