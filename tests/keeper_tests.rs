//! Order book and delayed-request tests: trigger validation, tombstone
//! idempotence, and the resumable keeper batch walk.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vault_core::*;

const GOV: AccountId = AccountId(1);
const ALICE: AccountId = AccountId(2);
const BOB: AccountId = AccountId(3);
const KEEPER: AccountId = AccountId(4);
const BOOK: AccountId = AccountId(100);
const QUEUE: AccountId = AccountId(101);
const BNB: Token = Token(1);
const USDC: Token = Token(2);

fn oracle_at(bnb: Decimal) -> Box<FixedPrices> {
    let mut prices = FixedPrices::new();
    prices.set(BNB, bnb);
    prices.set(USDC, dec!(1));
    Box::new(prices)
}

fn setup(bnb_price: Decimal) -> (Vault, Router, OrderBook, PositionRouter) {
    let config = EngineConfig::simulation();
    let mut vault = Vault::new(
        GOV,
        oracle_at(bnb_price),
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
    vault.grant_role(GOV, KEEPER, Role::Keeper).unwrap();

    let mut router = Router::new();
    let book = OrderBook::new(BOOK, Amount::new(dec!(0.0001)));
    let queue = PositionRouter::new(
        QUEUE,
        Amount::new(dec!(0.0001)),
        2,               // keeper waits two blocks
        3 * 60 * 1000,   // the owner waits three minutes
        30 * 60 * 1000,  // then the request expires
    );
    router.add_plugin(&vault, GOV, BOOK).unwrap();
    router.add_plugin(&vault, GOV, QUEUE).unwrap();
    router.approve_plugin(ALICE, BOOK);
    router.approve_plugin(ALICE, QUEUE);
    router.approve_plugin(BOB, BOOK);
    router.approve_plugin(BOB, QUEUE);

    (vault, router, book, queue)
}

#[test]
fn trigger_above_swap_order_waits_for_the_ratio() {
    let (mut vault, _router, mut book, _queue) = setup(dec!(300));

    let index = book
        .create_swap_order(
            &mut vault,
            ALICE,
            vec![USDC, BNB],
            Amount::new(dec!(1000)),
            Amount::zero(),
            dec!(320),
            true,
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    // ratio 300 <= 320: hard failure, nothing fills
    let premature = book.execute_swap_order(&mut vault, ALICE, index, KEEPER);
    assert!(matches!(
        premature,
        Err(OrderError::InvalidPriceForExecution { .. })
    ));
    assert!(book.get_swap_order(ALICE, index).is_some());

    // the instant the ratio crosses, the swap fills for exactly the quoted net
    vault.set_oracle(GOV, oracle_at(dec!(330))).unwrap();
    let (_, expected_out, _, _) = vault
        .quote_swap(USDC, BNB, Amount::new(dec!(1000)))
        .unwrap();
    let out = book
        .execute_swap_order(&mut vault, ALICE, index, KEEPER)
        .unwrap();
    assert_eq!(out, expected_out);
}

#[test]
fn order_tombstones_never_double_pay() {
    let (mut vault, _router, mut book, _queue) = setup(dec!(330));

    let index = book
        .create_swap_order(
            &mut vault,
            ALICE,
            vec![USDC, BNB],
            Amount::new(dec!(500)),
            Amount::zero(),
            dec!(320),
            true,
            Amount::new(dec!(0.001)),
        )
        .unwrap();
    book.execute_swap_order(&mut vault, ALICE, index, KEEPER)
        .unwrap();

    // the slot is a permanent tombstone: execute and cancel both fail
    let re_execute = book.execute_swap_order(&mut vault, ALICE, index, KEEPER);
    assert!(matches!(re_execute, Err(OrderError::OrderNotFound { .. })));
    let cancel = book.cancel_swap_order(&mut vault, ALICE, index);
    assert!(matches!(cancel, Err(OrderError::OrderNotFound { .. })));

    // and the index is never reused
    let next = book
        .create_swap_order(
            &mut vault,
            ALICE,
            vec![USDC, BNB],
            Amount::new(dec!(500)),
            Amount::zero(),
            dec!(320),
            true,
            Amount::new(dec!(0.001)),
        )
        .unwrap();
    assert_eq!(next, index + 1);
}

#[test]
fn cancelled_order_refunds_principal_and_fee() {
    let (mut vault, _router, mut book, _queue) = setup(dec!(300));

    let index = book
        .create_swap_order(
            &mut vault,
            ALICE,
            vec![USDC, BNB],
            Amount::new(dec!(750)),
            Amount::zero(),
            dec!(320),
            true,
            Amount::new(dec!(0.002)),
        )
        .unwrap();

    let refunded = book.cancel_swap_order(&mut vault, ALICE, index).unwrap();
    assert_eq!(refunded.amount_in.value(), dec!(750));
    assert_eq!(refunded.execution_fee.value(), dec!(0.002));
}

#[test]
fn stop_loss_decrease_order() {
    let (mut vault, router, mut book, _queue) = setup(dec!(300));
    vault
        .increase_position(
            ALICE,
            BNB,
            BNB,
            Amount::new(dec!(1)),
            Usd::new(dec!(1000)),
            Side::Long,
        )
        .unwrap();

    // close the long once price drops under $280
    let index = book
        .create_decrease_order(
            &mut vault,
            ALICE,
            BNB,
            Usd::zero(),
            BNB,
            Usd::new(dec!(1000)),
            Side::Long,
            Price::new_unchecked(dec!(280)),
            false,
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    let premature = book.execute_decrease_order(&mut vault, &router, ALICE, index, KEEPER);
    assert!(matches!(
        premature,
        Err(OrderError::InvalidPriceForExecution { .. })
    ));

    vault.set_oracle(GOV, oracle_at(dec!(270))).unwrap();
    let amount_out = book
        .execute_decrease_order(&mut vault, &router, ALICE, index, KEEPER)
        .unwrap();
    assert!(amount_out.value() > Decimal::ZERO);

    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert!(vault.get_position(&key).is_none());
}

#[test]
fn increase_order_swaps_purchase_token_first() {
    let (mut vault, router, mut book, _queue) = setup(dec!(300));

    // quoted before execution so the pool state matches
    let (_, net_bnb, _, _) = vault
        .quote_swap(USDC, BNB, Amount::new(dec!(300)))
        .unwrap();

    let index = book
        .create_increase_order(
            &mut vault,
            ALICE,
            USDC,
            Amount::new(dec!(300)),
            BNB,
            BNB,
            Usd::new(dec!(500)),
            Side::Long,
            Price::new_unchecked(dec!(310)),
            false, // execute while price is below 310
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    book.execute_increase_order(&mut vault, &router, ALICE, index, KEEPER)
        .unwrap();

    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    let position = vault.get_position(&key).unwrap();
    assert_eq!(position.size.value(), dec!(500));
    // collateral = swapped-in value minus the position fee
    let expected_collateral = net_bnb.value() * dec!(300) - dec!(0.5);
    assert_eq!(position.collateral.value(), expected_collateral);
}

#[test]
fn failed_execution_restores_state_and_keeps_order() {
    let (mut vault, router, mut book, _queue) = setup(dec!(300));

    // $3 of margin cannot carry a $1000 position: the implicit swap must be
    // rolled back when the increase fails
    let index = book
        .create_increase_order(
            &mut vault,
            ALICE,
            USDC,
            Amount::new(dec!(3)),
            BNB,
            BNB,
            Usd::new(dec!(1000)),
            Side::Long,
            Price::new_unchecked(dec!(310)),
            false,
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    let bnb_before = vault.token_state(BNB).unwrap().clone();
    let usdc_before = vault.token_state(USDC).unwrap().clone();

    let result = book.execute_increase_order(&mut vault, &router, ALICE, index, KEEPER);
    assert!(matches!(
        result,
        Err(OrderError::Vault(VaultError::InsufficientCollateralForFees { .. }))
    ));

    // the order survives for a retry and no pool state moved
    assert!(book.get_increase_order(ALICE, index).is_some());
    let bnb_after = vault.token_state(BNB).unwrap();
    let usdc_after = vault.token_state(USDC).unwrap();
    assert_eq!(bnb_after.pool_amount, bnb_before.pool_amount);
    assert_eq!(bnb_after.balance, bnb_before.balance);
    assert_eq!(bnb_after.liquidity_usd, bnb_before.liquidity_usd);
    assert_eq!(usdc_after.pool_amount, usdc_before.pool_amount);
    assert_eq!(usdc_after.balance, usdc_before.balance);
    assert_eq!(vault.position_count(), 0);
}

fn queue_increase(
    vault: &mut Vault,
    queue: &mut PositionRouter,
    account: AccountId,
    size: Decimal,
) -> u64 {
    queue
        .create_increase_position(
            vault,
            account,
            BNB,
            BNB,
            BNB,
            Amount::new(dec!(1)),
            Amount::zero(),
            Usd::new(size),
            Side::Long,
            Price::new_unchecked(dec!(310)),
            Amount::new(dec!(0.001)),
        )
        .unwrap()
}

#[test]
fn batch_execution_stops_at_first_unripe_request() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));

    // two requests at block 0, one at block 2
    queue_increase(&mut vault, &mut queue, ALICE, dec!(500));
    queue_increase(&mut vault, &mut queue, ALICE, dec!(500));
    vault.advance_blocks(2);
    queue_increase(&mut vault, &mut queue, ALICE, dec!(500));

    // at block 2 the first two are past the keeper delay, the third is not:
    // the walk resolves 0..2 and parks the cursor at 2
    queue
        .execute_increase_positions(&mut vault, &router, 3, KEEPER)
        .unwrap();
    assert_eq!(queue.increase_cursor(), 2);
    assert!(queue.get_increase_request(0).is_none());
    assert!(queue.get_increase_request(1).is_none());
    assert!(queue.get_increase_request(2).is_some());

    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert_eq!(vault.get_position(&key).unwrap().size.value(), dec!(1000));

    // a later pass picks up where it stopped
    vault.advance_blocks(2);
    queue
        .execute_increase_positions(&mut vault, &router, 3, KEEPER)
        .unwrap();
    assert_eq!(queue.increase_cursor(), 3);
    assert_eq!(vault.get_position(&key).unwrap().size.value(), dec!(1500));
}

#[test]
fn batch_cancels_failing_request_and_continues() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));

    // request 0 demands a better price than the market offers; request 1 is fine
    queue
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
            Price::new_unchecked(dec!(250)), // mark 300 > acceptable 250
            Amount::new(dec!(0.001)),
        )
        .unwrap();
    queue_increase(&mut vault, &mut queue, ALICE, dec!(500));

    vault.advance_blocks(2);
    queue
        .execute_increase_positions(&mut vault, &router, 2, KEEPER)
        .unwrap();

    // the bad request was cancelled, not left blocking the queue
    assert_eq!(queue.increase_cursor(), 2);
    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert_eq!(vault.get_position(&key).unwrap().size.value(), dec!(500));

    let cancels = vault
        .events()
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::CancelPositionRequest(_)))
        .count();
    let executes = vault
        .events()
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::ExecutePositionRequest(_)))
        .count();
    assert_eq!(cancels, 1);
    assert_eq!(executes, 1);
}

#[test]
fn owner_execution_respects_public_delay() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));
    let index = queue_increase(&mut vault, &mut queue, ALICE, dec!(500));

    // a stranger may not act on it at all
    let forbidden = queue.execute_increase_position(&mut vault, &router, index, BOB);
    assert!(matches!(forbidden, Err(RequestError::Forbidden(_))));

    // the owner must wait out the public delay
    let early = queue.execute_increase_position(&mut vault, &router, index, ALICE);
    assert!(matches!(early, Err(RequestError::NotYetExecutable(_))));

    vault.advance_time(3 * 60 * 1000);
    queue
        .execute_increase_position(&mut vault, &router, index, ALICE)
        .unwrap();
    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert_eq!(vault.get_position(&key).unwrap().size.value(), dec!(500));
}

#[test]
fn keeper_execution_respects_block_delay() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));
    let index = queue_increase(&mut vault, &mut queue, ALICE, dec!(500));

    let early = queue.execute_increase_position(&mut vault, &router, index, KEEPER);
    assert!(matches!(early, Err(RequestError::NotYetExecutable(_))));

    vault.advance_blocks(2);
    queue
        .execute_increase_position(&mut vault, &router, index, KEEPER)
        .unwrap();
}

#[test]
fn expired_request_can_only_be_cancelled() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));
    let index = queue_increase(&mut vault, &mut queue, ALICE, dec!(500));

    vault.advance_blocks(10);
    vault.advance_time(31 * 60 * 1000); // past max_time_delay

    let stale = queue.execute_increase_position(&mut vault, &router, index, KEEPER);
    assert!(matches!(stale, Err(RequestError::Expired(_))));

    // only cancellation remains, refunding the principal and fee
    let refunded = queue
        .cancel_increase_position(&mut vault, index, ALICE)
        .unwrap();
    assert_eq!(refunded.amount_in.value(), dec!(1));

    let gone = queue.cancel_increase_position(&mut vault, index, ALICE);
    assert!(matches!(gone, Err(RequestError::RequestNotFound(_))));
}

#[test]
fn decrease_requests_follow_the_same_lifecycle() {
    let (mut vault, router, _book, mut queue) = setup(dec!(300));
    vault
        .increase_position(
            ALICE,
            BNB,
            BNB,
            Amount::new(dec!(1)),
            Usd::new(dec!(1000)),
            Side::Long,
        )
        .unwrap();

    let index = queue
        .create_decrease_position(
            &mut vault,
            ALICE,
            BNB,
            BNB,
            Usd::zero(),
            Usd::new(dec!(1000)),
            Side::Long,
            ALICE,
            Price::new_unchecked(dec!(290)), // willing to exit at >= 290
            Amount::new(dec!(0.001)),
        )
        .unwrap();

    vault.advance_blocks(2);
    queue
        .execute_decrease_positions(&mut vault, &router, 1, KEEPER)
        .unwrap();
    assert_eq!(queue.decrease_cursor(), 1);

    let key = PositionKey::new(ALICE, BNB, BNB, Side::Long);
    assert!(vault.get_position(&key).is_none());
    assert!(queue.get_decrease_request(index).is_none());
}
