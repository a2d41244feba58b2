// 11.0: every state change produces an event. used for audit trails, state
// reconstruction, and keeper tooling. the EventPayload enum lists all event types.

use crate::types::{AccountId, Amount, Bps, Price, Side, Timestamp, Token, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // liquidity events
    BuyLiquidity(BuyLiquidityEvent),
    SellLiquidity(SellLiquidityEvent),
    Swap(SwapEvent),
    DirectPoolDeposit(DirectPoolDepositEvent),

    // position events
    IncreasePosition(IncreasePositionEvent),
    DecreasePosition(DecreasePositionEvent),
    ClosePosition(ClosePositionEvent),
    LiquidatePosition(LiquidatePositionEvent),

    // fee and funding events
    UpdateFundingRate(UpdateFundingRateEvent),
    CollectMarginFees(CollectMarginFeesEvent),
    CollectSwapFees(CollectSwapFeesEvent),
    WithdrawFees(WithdrawFeesEvent),

    // order events
    CreateOrder(OrderEvent),
    UpdateOrder(OrderEvent),
    CancelOrder(OrderEvent),
    ExecuteOrder(ExecuteOrderEvent),

    // delayed request events
    CreatePositionRequest(PositionRequestEvent),
    ExecutePositionRequest(PositionRequestEvent),
    CancelPositionRequest(PositionRequestEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyLiquidityEvent {
    pub account: AccountId,
    pub token: Token,
    pub amount_in: Amount,
    pub usd_value: Usd,
    pub fee_bps: Bps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellLiquidityEvent {
    pub account: AccountId,
    pub token: Token,
    pub usd_value: Usd,
    pub amount_out: Amount,
    pub fee_bps: Bps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub account: AccountId,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: Amount,
    pub amount_out: Amount,
    pub fee_bps: Bps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectPoolDepositEvent {
    pub token: Token,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncreasePositionEvent {
    pub account: AccountId,
    pub collateral_token: Token,
    pub index_token: Token,
    pub side: Side,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub price: Price,
    pub fee: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecreasePositionEvent {
    pub account: AccountId,
    pub collateral_token: Token,
    pub index_token: Token,
    pub side: Side,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub price: Price,
    pub usd_out: Usd,
    pub fee: Usd,
    pub receiver: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePositionEvent {
    pub account: AccountId,
    pub index_token: Token,
    pub side: Side,
    pub size: Usd,
    pub collateral: Usd,
    pub realised_pnl: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidatePositionEvent {
    pub account: AccountId,
    pub collateral_token: Token,
    pub index_token: Token,
    pub side: Side,
    pub size: Usd,
    pub collateral: Usd,
    pub mark_price: Price,
    pub margin_fees: Usd,
    pub liquidator: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFundingRateEvent {
    pub token: Token,
    pub cumulative_funding_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectMarginFeesEvent {
    pub token: Token,
    pub fee_usd: Usd,
    pub fee_tokens: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectSwapFeesEvent {
    pub token: Token,
    pub fee_tokens: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawFeesEvent {
    pub token: Token,
    pub receiver: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Swap,
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub account: AccountId,
    pub kind: OrderKind,
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteOrderEvent {
    pub account: AccountId,
    pub kind: OrderKind,
    pub index: u64,
    pub execution_price: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRequestEvent {
    pub account: AccountId,
    pub kind: RequestKind,
    pub index: u64,
}
