//! Vault engine simulation.
//!
//! Walks the pooled-liquidity exchange through its full lifecycle: seeding
//! liquidity, leveraged longs and shorts, swaps under the dynamic fee curve,
//! trigger orders, the delayed request queue, and a liquidation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vault_core::*;

const GOV: AccountId = AccountId(1);
const ALICE: AccountId = AccountId(2);
const BOB: AccountId = AccountId(3);
const KEEPER: AccountId = AccountId(4);
const BNB: Token = Token(1);
const USDC: Token = Token(2);

fn main() {
    println!("Vault Engine Simulation");
    println!("Pooled Liquidity, Oracle-Priced Positions, Keeper Execution\n");

    scenario_1_long_lifecycle();
    scenario_2_short_flow();
    scenario_3_swap_fee_curve();
    scenario_4_trigger_order();
    scenario_5_request_queue();
    scenario_6_liquidation();

    println!("\nAll simulations completed successfully.");
}

fn fixed_prices(bnb: Decimal) -> Box<FixedPrices> {
    let mut prices = FixedPrices::new();
    prices.set(BNB, bnb);
    prices.set(USDC, dec!(1));
    Box::new(prices)
}

fn build_vault(bnb_price: Decimal) -> Vault {
    let config = EngineConfig::simulation();
    let mut vault = Vault::new(
        GOV,
        fixed_prices(bnb_price),
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
    vault
}

/// Seed the pool, open a leveraged long, close it at a profit.
fn scenario_1_long_lifecycle() {
    println!("Scenario 1: Long Lifecycle\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    println!("  Pool seeded with 100 BNB at $300");

    vault
        .increase_position(ALICE, BNB, BNB, Amount::new(dec!(1)), Usd::new(dec!(1000)), Side::Long)
        .unwrap();
    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    let position = vault.get_position(&key).unwrap();
    println!(
        "  Alice opens a $1000 long with 1 BNB margin: size {}, collateral {}",
        position.size, position.collateral
    );

    vault.set_oracle(GOV, fixed_prices(dec!(330))).unwrap();
    let delta = vault.get_position_delta(&key).unwrap();
    println!("  BNB rallies to $330, unrealized pnl {}", delta.delta);

    let payout = vault
        .decrease_position(ALICE, BNB, BNB, Usd::zero(), Usd::new(dec!(1000)), Side::Long, ALICE)
        .unwrap();
    println!("  Full close pays out {} BNB", payout);
    assert!(vault.get_position(&key).is_none());
    println!();
}

/// Shorts collateralized by stables, tracked against the shared synthetic short.
fn scenario_2_short_flow() {
    println!("Scenario 2: Short Flow\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, USDC, Amount::new(dec!(30000))).unwrap();
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();

    vault
        .increase_position(BOB, USDC, BNB, Amount::new(dec!(500)), Usd::new(dec!(2000)), Side::Short)
        .unwrap();
    let state = vault.token_state(BNB).unwrap();
    println!(
        "  Bob shorts $2000 of BNB: global short size {}, average {}",
        state.global_short_size, state.global_short_average_price
    );

    vault.set_oracle(GOV, fixed_prices(dec!(270))).unwrap();
    let key = PositionKey::new(BOB, USDC, BNB, Side::Short);
    let delta = vault.get_position_delta(&key).unwrap();
    println!("  BNB drops to $270, short pnl {}", delta.delta);

    let payout = vault
        .decrease_position(BOB, USDC, BNB, Usd::zero(), Usd::new(dec!(2000)), Side::Short, BOB)
        .unwrap();
    println!("  Close pays out {} USDC\n", payout);
}

/// The rebalancing curve taxes swaps that push a pool off target.
fn scenario_3_swap_fee_curve() {
    println!("Scenario 3: Swap Fee Curve\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    vault.buy(GOV, USDC, Amount::new(dec!(30000))).unwrap();

    let (_, _, balanced_fee, _) = vault.quote_swap(USDC, BNB, Amount::new(dec!(300))).unwrap();
    println!("  Balanced pools: swap fee {}", balanced_fee);

    let out = vault.swap(ALICE, USDC, BNB, Amount::new(dec!(3000))).unwrap();
    println!("  Alice swaps 3000 USDC for {} BNB", out);

    let (_, _, skewed_fee, _) = vault.quote_swap(USDC, BNB, Amount::new(dec!(300))).unwrap();
    println!("  After the skew: swap fee {} (tax kicked in)\n", skewed_fee);
}

/// A trigger-above swap order only executes once the ratio crosses.
fn scenario_4_trigger_order() {
    println!("Scenario 4: Trigger Order\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    vault.buy(GOV, USDC, Amount::new(dec!(30000))).unwrap();

    let mut book = OrderBook::new(AccountId(100), Amount::new(dec!(0.0001)));
    let index = book
        .create_swap_order(
            &mut vault,
            ALICE,
            vec![USDC, BNB],
            Amount::new(dec!(1000)),
            Amount::zero(),
            dec!(320), // execute once BNB/USDC crosses above 320
            true,
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    let premature = book.execute_swap_order(&mut vault, ALICE, index, KEEPER);
    println!("  At $300 execution fails: {}", premature.unwrap_err());

    vault.set_oracle(GOV, fixed_prices(dec!(330))).unwrap();
    let out = book.execute_swap_order(&mut vault, ALICE, index, KEEPER).unwrap();
    println!("  At $330 the order fills for {} BNB", out);

    let repeat = book.execute_swap_order(&mut vault, ALICE, index, KEEPER);
    println!("  Re-execution hits the tombstone: {}\n", repeat.unwrap_err());
}

/// Keeper batch over the delayed request queue.
fn scenario_5_request_queue() {
    println!("Scenario 5: Delayed Request Queue\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    vault.grant_role(GOV, KEEPER, Role::Keeper).unwrap();

    let mut router = Router::new();
    let keeper_config = KeeperConfig {
        min_block_delay_keeper: 2,
        ..Default::default()
    };
    let mut position_router = PositionRouter::with_config(AccountId(101), &keeper_config);
    router.add_plugin(&vault, GOV, position_router.address()).unwrap();
    router.approve_plugin(ALICE, position_router.address());

    for i in 0..3 {
        position_router
            .create_increase_position(
                &mut vault,
                ALICE,
                BNB,
                BNB,
                BNB,
                Amount::new(dec!(1)),
                Amount::zero(),
                Usd::new(dec!(500)),
                Side::Long,
                Price::new_unchecked(dec!(310)),
                Amount::new(dec!(0.001)),
            )
            .unwrap();
        println!("  Request {} queued at block {}", i, vault.block_number());
    }

    position_router
        .execute_increase_positions(&mut vault, &router, 3, KEEPER)
        .unwrap();
    println!(
        "  Batch before the delay: cursor still at {}",
        position_router.increase_cursor()
    );

    vault.advance_blocks(2);
    position_router
        .execute_increase_positions(&mut vault, &router, 3, KEEPER)
        .unwrap();
    println!(
        "  Batch after two blocks: cursor at {}",
        position_router.increase_cursor()
    );

    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    let position = vault.get_position(&key).unwrap();
    println!("  Alice's merged position: size {}\n", position.size);
}

/// A crash makes the long liquidatable; the keeper liquidates it.
fn scenario_6_liquidation() {
    println!("Scenario 6: Liquidation\n");

    let mut vault = build_vault(dec!(300));
    vault.buy(GOV, BNB, Amount::new(dec!(100))).unwrap();
    vault.grant_role(GOV, KEEPER, Role::Liquidator).unwrap();

    vault
        .increase_position(ALICE, BNB, BNB, Amount::new(dec!(1)), Usd::new(dec!(2700)), Side::Long)
        .unwrap();
    println!("  Alice opens a 9x long at $300");

    vault.set_oracle(GOV, fixed_prices(dec!(265))).unwrap();
    vault
        .liquidate_position(KEEPER, ALICE, BNB, BNB, Side::Long)
        .unwrap();
    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert!(vault.get_position(&key).is_none());
    println!("  At $265 the losses exceed collateral and the position is liquidated");

    let state = vault.token_state(BNB).unwrap();
    println!(
        "  Pool {}, reserved {} after liquidation\n",
        state.pool_amount, state.reserved_amount
    );
}
