// 4.0: leveraged position record. one per (account, collateral token, index token, side).
// 4.1 has the pnl-adjusted average price math used on every size increase.

use crate::types::{AccountId, Amount, Bps, Price, Side, Timestamp, Token, Usd, BASIS_POINTS_DIVISOR};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account: AccountId,
    pub collateral_token: Token,
    pub index_token: Token,
    pub side: Side,
}

impl PositionKey {
    pub fn new(account: AccountId, collateral_token: Token, index_token: Token, side: Side) -> Self {
        Self {
            account,
            collateral_token,
            index_token,
            side,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    // notional exposure in usd
    pub size: Usd,
    // net margin backing the position, after fees
    pub collateral: Usd,
    // volume-weighted entry, recomputed through the pnl-adjusted divisor
    pub average_price: Price,
    // cumulative funding rate snapshot at last update
    pub entry_funding_rate: Decimal,
    // collateral tokens reserved from the pool to guarantee profit payout
    pub reserve_amount: Amount,
    // cumulative realized pnl, signed
    pub realised_pnl: Usd,
    // gate for the minimum-profit-time rule
    pub last_increased_time: Timestamp,
}

impl Position {
    pub fn empty() -> Self {
        Self {
            size: Usd::zero(),
            collateral: Usd::zero(),
            average_price: Price::new_unchecked(Decimal::ONE),
            entry_funding_rate: Decimal::ZERO,
            reserve_amount: Amount::zero(),
            realised_pnl: Usd::zero(),
            last_increased_time: Timestamp::from_millis(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_zero()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionDelta {
    pub has_profit: bool,
    pub delta: Usd,
}

// 4.1: unrealized pnl of `size` opened at `average_price`, marked at `mark`.
// fresh profits below the min-profit threshold count as zero until
// min_profit_time has passed, which blunts single-block front-running.
pub fn position_delta(
    size: Usd,
    average_price: Price,
    mark: Price,
    side: Side,
    min_profit_bps: Bps,
    min_profit_time_ms: i64,
    last_increased_time: Timestamp,
    now: Timestamp,
) -> PositionDelta {
    let price_delta = (average_price.value() - mark.value()).abs();
    let mut delta = size.value() * price_delta / average_price.value();

    let has_profit = match side {
        Side::Long => mark.value() > average_price.value(),
        Side::Short => average_price.value() > mark.value(),
    };

    let past_min_profit_time =
        now.as_millis() > last_increased_time.as_millis() + min_profit_time_ms;
    let min_bps = if past_min_profit_time {
        Decimal::ZERO
    } else {
        min_profit_bps.as_decimal()
    };
    if has_profit && delta * BASIS_POINTS_DIVISOR <= size.value() * min_bps {
        delta = Decimal::ZERO;
    }

    PositionDelta {
        has_profit,
        delta: Usd::new(delta),
    }
}

// 4.2: average price after a size increase, chosen so the position's unrealized
// pnl is unchanged by the increase. divisor folds the current delta in or out
// depending on side and profit direction.
pub fn next_average_price(
    size: Usd,
    average_price: Price,
    side: Side,
    next_price: Price,
    size_delta: Usd,
    delta: &PositionDelta,
) -> Price {
    let next_size = size.value() + size_delta.value();
    let divisor = match side {
        Side::Long => {
            if delta.has_profit {
                next_size + delta.delta.value()
            } else {
                next_size - delta.delta.value()
            }
        }
        Side::Short => {
            if delta.has_profit {
                next_size - delta.delta.value()
            } else {
                next_size + delta.delta.value()
            }
        }
    };
    debug_assert!(average_price.value() > Decimal::ZERO);
    Price::new_unchecked(next_price.value() * next_size / divisor)
}

// 4.3: the shared synthetic short position's average entry after a short increase.
// same reweighting as 4.2 with short-side profit orientation.
pub fn next_global_short_average_price(
    global_size: Usd,
    global_average_price: Price,
    next_price: Price,
    size_delta: Usd,
) -> Price {
    if global_size.is_zero() {
        return next_price;
    }
    let price_delta = (global_average_price.value() - next_price.value()).abs();
    let delta = global_size.value() * price_delta / global_average_price.value();
    let has_profit = global_average_price.value() > next_price.value();

    let next_size = global_size.value() + size_delta.value();
    let divisor = if has_profit {
        next_size - delta
    } else {
        next_size + delta
    };
    Price::new_unchecked(next_price.value() * next_size / divisor)
}
