//! Property-based tests for the core math and the vault invariants.
//!
//! These verify the documented invariants under random inputs: the fee curve
//! shape, funding bounds, pnl preservation through average-price reweighting,
//! and reserve/pool consistency under random operation sequences.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vault_core::*;

const GOV: AccountId = AccountId(1);
const ALICE: AccountId = AccountId(2);
const BOB: AccountId = AccountId(3);
const BNB: Token = Token(1);
const USDC: Token = Token(2);

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (100i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $1 to $100k
}

fn usd_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|x| Decimal::new(x, 2))
}

proptest! {
    /// The dynamic fee never goes negative and never exceeds base + tax.
    #[test]
    fn dynamic_fee_bounded(
        current in usd_strategy(),
        delta in usd_strategy(),
        target in usd_strategy(),
        increment in any::<bool>(),
    ) {
        let base = Bps::new(30);
        let tax = Bps::new(50);
        let fee = dynamic_fee_bps(current, delta, target, base, tax, increment, true);

        prop_assert!(fee.value() <= base.value() + tax.value());
    }

    /// Starting exactly at target, adding and removing the same delta are
    /// taxed identically.
    #[test]
    fn dynamic_fee_symmetric_at_target(
        target in usd_strategy(),
        delta in usd_strategy(),
    ) {
        let base = Bps::new(30);
        let tax = Bps::new(50);
        let add = dynamic_fee_bps(target, delta, target, base, tax, true, true);
        let remove = dynamic_fee_bps(target, delta, target, base, tax, false, true);

        prop_assert_eq!(add, remove);
    }

    /// Moving toward the target is never dearer than the base fee.
    #[test]
    fn dynamic_fee_rebate_capped(
        target in usd_strategy(),
        gap in usd_strategy(),
        delta in usd_strategy(),
    ) {
        let base = Bps::new(30);
        let tax = Bps::new(50);
        // pool sits below target; adding moves toward it
        let current = (target - gap).max(Decimal::ZERO);
        let toward = delta.min(target - current);
        prop_assume!(toward > Decimal::ZERO);

        let fee = dynamic_fee_bps(current, toward, target, base, tax, true, true);
        prop_assert!(fee.value() <= base.value());
    }

    /// Funding accrual is bounded by the factor times elapsed intervals as
    /// long as the reserve invariant holds.
    #[test]
    fn funding_rate_bounded_by_utilization(
        pool in (1i64..1_000_000i64).prop_map(Decimal::from),
        reserved_fraction in 0i64..=100i64,
        intervals in 0i64..100i64,
    ) {
        let reserved = pool * Decimal::new(reserved_fraction, 2);
        let hour = 3_600_000i64;
        let factor = dec!(600);

        let rate = next_funding_rate(reserved, pool, 0, intervals * hour, hour, factor);

        prop_assert!(rate >= Decimal::ZERO);
        prop_assert!(rate <= factor * Decimal::from(intervals));
    }

    /// A position marked at its own average price carries no pnl.
    #[test]
    fn delta_zero_at_entry(
        size in usd_strategy(),
        entry in price_strategy(),
    ) {
        let entry_price = Price::new_unchecked(entry);
        let delta = position_delta(
            Usd::new(size),
            entry_price,
            entry_price,
            Side::Long,
            Bps::ZERO,
            0,
            Timestamp::from_millis(0),
            Timestamp::from_millis(1),
        );
        prop_assert_eq!(delta.delta.value(), Decimal::ZERO);
    }

    /// The pnl-adjusted average price keeps unrealized pnl constant through a
    /// size increase, up to decimal rounding.
    #[test]
    fn average_price_preserves_pnl(
        size in (100i64..1_000_000i64).prop_map(|x| Decimal::new(x, 0)),
        size_delta in (100i64..1_000_000i64).prop_map(|x| Decimal::new(x, 0)),
        entry in price_strategy(),
        move_pct in -50i64..=100i64,
        is_long in any::<bool>(),
    ) {
        let side = if is_long { Side::Long } else { Side::Short };
        let mark_val = entry * (Decimal::from(100 + move_pct)) / dec!(100);
        prop_assume!(mark_val > Decimal::ZERO);

        let entry_price = Price::new_unchecked(entry);
        let mark = Price::new_unchecked(mark_val);
        let no_gate = (Bps::ZERO, 0i64, Timestamp::from_millis(0), Timestamp::from_millis(1));

        let before = position_delta(
            Usd::new(size), entry_price, mark, side, no_gate.0, no_gate.1, no_gate.2, no_gate.3,
        );
        let next = next_average_price(
            Usd::new(size), entry_price, side, mark, Usd::new(size_delta), &before,
        );
        let after = position_delta(
            Usd::new(size + size_delta), next, mark, side, no_gate.0, no_gate.1, no_gate.2, no_gate.3,
        );

        let diff = (after.delta.value() - before.delta.value()).abs();
        let tolerance = dec!(0.000001) * (size + size_delta);
        prop_assert!(
            diff <= tolerance,
            "pnl drifted by {} (before {}, after {})",
            diff, before.delta.value(), after.delta.value()
        );
    }

    /// The position fee is exactly the bps fraction of the size delta.
    #[test]
    fn position_fee_exact(
        size_delta in usd_strategy(),
    ) {
        let fee = position_fee(Usd::new(size_delta), Bps::new(10));
        let direct = size_delta - size_delta * dec!(9990) / dec!(10000);
        prop_assert_eq!(fee.value(), direct);
    }

    /// Strict stables clamp to exactly 1.0 inside the tolerance and never
    /// cross the peg against the protocol outside it.
    #[test]
    fn strict_stable_clamp(
        upstream in (80i64..=120i64).prop_map(|x| Decimal::new(x, 2)),
    ) {
        let token = Token(9);
        let config = FeedConfig {
            is_strict_stable: true,
            ..Default::default()
        };
        let mut feed = PriceFeed::new(PriceFeedSettings::default());
        feed.set_token_feed(token, config, Box::new(MockOracle::new(upstream)));

        let max = feed.get_price(token, true, true).unwrap().value();
        let min = feed.get_price(token, false, true).unwrap().value();

        if (upstream - Decimal::ONE).abs() <= dec!(0.01) {
            prop_assert_eq!(max, Decimal::ONE);
            prop_assert_eq!(min, Decimal::ONE);
        } else if upstream < Decimal::ONE {
            prop_assert_eq!(min, upstream);
            prop_assert_eq!(max, Decimal::ONE);
        } else {
            prop_assert_eq!(min, Decimal::ONE);
            prop_assert_eq!(max, upstream);
        }
    }
}

// random operation sequences against a live vault

#[derive(Debug, Clone)]
enum Op {
    BuyBnb(i64),
    BuyUsdc(i64),
    IncreaseLong { collateral_cents: i64, size: i64 },
    DecreaseLong { percent: i64 },
    IncreaseShort { collateral: i64, size: i64 },
    PriceMove { percent: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..1_000).prop_map(Op::BuyBnb),
        (1i64..100_000).prop_map(Op::BuyUsdc),
        (10i64..500, 1i64..40).prop_map(|(collateral_cents, size)| Op::IncreaseLong {
            collateral_cents,
            size
        }),
        (1i64..=100).prop_map(|percent| Op::DecreaseLong { percent }),
        (100i64..5_000, 1i64..40).prop_map(|(collateral, size)| Op::IncreaseShort {
            collateral,
            size
        }),
        (-15i64..=15).prop_map(|percent| Op::PriceMove { percent }),
    ]
}

fn oracle_at(bnb: Decimal) -> Box<FixedPrices> {
    let mut prices = FixedPrices::new();
    prices.set(BNB, bnb);
    prices.set(USDC, dec!(1));
    Box::new(prices)
}

fn seeded_vault() -> Vault {
    let config = EngineConfig::simulation();
    let mut vault = Vault::new(
        GOV,
        oracle_at(dec!(300)),
        Box::new(StandardPolicy),
        config.vault,
        config.fees,
        config.funding,
    );
    vault.set_time(Timestamp::from_secs(1_700_000_000));
    vault
        .set_token_config(GOV, BNB, TokenConfig::volatile(8, dec!(10)))
        .unwrap();
    vault
        .set_token_config(GOV, USDC, TokenConfig::stable(6, dec!(10)))
        .unwrap();
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    vault.buy(GOV, USDC, Amount::new(dec!(30000))).unwrap();
    vault
}

fn check_invariants(vault: &Vault) -> Result<(), TestCaseError> {
    for token in [BNB, USDC] {
        let state = vault.token_state(token).unwrap();
        prop_assert!(
            state.reserved_amount <= state.pool_amount,
            "reserved {} > pool {} for {:?}",
            state.reserved_amount,
            state.pool_amount,
            token
        );
        prop_assert!(
            state.pool_amount <= state.balance,
            "pool {} > balance {} for {:?}",
            state.pool_amount,
            state.balance,
            token
        );
    }

    let long_key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    let short_key = PositionKey::new(BOB, USDC, BNB, Side::Short);
    for key in [long_key, short_key] {
        if let Some(position) = vault.get_position(&key) {
            prop_assert!(!position.size.is_zero(), "zero-size position left behind");
            prop_assert!(
                position.size >= position.collateral,
                "size {} below collateral {}",
                position.size,
                position.collateral
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// reserved <= pool and pool <= balance hold after every operation, and no
    /// position is ever left with zero size or size below collateral.
    #[test]
    fn vault_invariants_under_random_ops(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let mut vault = seeded_vault();
        let mut price = dec!(300);
        let long_key = PositionKey::new(ALICE, BNB, BNB, Side::Long);

        for op in ops {
            match op {
                Op::BuyBnb(amount) => {
                    let _ = vault.buy(GOV, BNB, Amount::new(Decimal::new(amount, 1)));
                }
                Op::BuyUsdc(amount) => {
                    let _ = vault.buy(GOV, USDC, Amount::new(Decimal::from(amount)));
                }
                Op::IncreaseLong { collateral_cents, size } => {
                    let _ = vault.increase_position(
                        ALICE,
                        BNB,
                        BNB,
                        Amount::new(Decimal::new(collateral_cents, 2)),
                        Usd::new(Decimal::from(size * 100)),
                        Side::Long,
                    );
                }
                Op::DecreaseLong { percent } => {
                    if let Some(position) = vault.get_position(&long_key) {
                        let size_delta = Usd::new(
                            position.size.value() * Decimal::from(percent) / dec!(100),
                        );
                        let _ = vault.decrease_position(
                            ALICE,
                            BNB,
                            BNB,
                            Usd::zero(),
                            size_delta,
                            Side::Long,
                            ALICE,
                        );
                    }
                }
                Op::IncreaseShort { collateral, size } => {
                    let _ = vault.increase_position(
                        BOB,
                        USDC,
                        BNB,
                        Amount::new(Decimal::from(collateral)),
                        Usd::new(Decimal::from(size * 100)),
                        Side::Short,
                    );
                }
                Op::PriceMove { percent } => {
                    price = price * Decimal::from(100 + percent) / dec!(100);
                    vault.set_oracle(GOV, oracle_at(price)).unwrap();
                }
            }
            check_invariants(&vault)?;
        }
    }
}
