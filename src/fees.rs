// 5.0: fee and funding math. all pure functions over decimals, no vault state.
// 5.1 is the dynamic rebalancing fee curve shared by buy/sell/swap.
// 5.2 is time-accrued funding per collateral token.

use crate::types::{Bps, Usd, BASIS_POINTS_DIVISOR, FUNDING_RATE_PRECISION};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeParams {
    // dynamic-curve tax caps for volatile / stable pairs
    pub tax_bps: Bps,
    pub stable_tax_bps: Bps,
    // base fee for liquidity mint/redeem
    pub mint_burn_fee_bps: Bps,
    // base fee for swaps
    pub swap_fee_bps: Bps,
    pub stable_swap_fee_bps: Bps,
    // flat fee on position size deltas
    pub margin_fee_bps: Bps,
    // flat usd fee charged on liquidation, paid to the liquidator
    pub liquidation_fee_usd: Usd,
    pub has_dynamic_fees: bool,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            tax_bps: Bps::new(50),
            stable_tax_bps: Bps::new(20),
            mint_burn_fee_bps: Bps::new(30),
            swap_fee_bps: Bps::new(30),
            stable_swap_fee_bps: Bps::new(4),
            margin_fee_bps: Bps::new(10),
            liquidation_fee_usd: Usd::new(dec!(5)),
            has_dynamic_fees: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingParams {
    // funding accrues once per full elapsed interval
    pub funding_interval_ms: i64,
    // per-interval rate at 100% utilization, in FUNDING_RATE_PRECISION units
    pub funding_rate_factor: Decimal,
    pub stable_funding_rate_factor: Decimal,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            funding_interval_ms: 60 * 60 * 1000,
            funding_rate_factor: dec!(600),
            stable_funding_rate_factor: dec!(600),
        }
    }
}

// 5.1: the rebalancing curve. actions that push a token's pooled usd toward its
// target weight get a rebate, actions that push away get taxed. symmetric and
// monotonic in the distance from target, floored at zero.
pub fn dynamic_fee_bps(
    current_usd: Decimal,
    delta_usd: Decimal,
    target_usd: Decimal,
    fee_bps: Bps,
    tax_bps: Bps,
    increment: bool,
    has_dynamic_fees: bool,
) -> Bps {
    if !has_dynamic_fees {
        return fee_bps;
    }
    if target_usd <= Decimal::ZERO {
        return fee_bps;
    }

    let next_usd = if increment {
        current_usd + delta_usd
    } else if delta_usd > current_usd {
        Decimal::ZERO
    } else {
        current_usd - delta_usd
    };

    let initial_diff = (current_usd - target_usd).abs();
    let next_diff = (next_usd - target_usd).abs();

    if next_diff < initial_diff {
        // moving toward target: rebate proportional to how far off we were
        let rebate = (tax_bps.as_decimal() * initial_diff / target_usd)
            .floor()
            .to_u32()
            .unwrap_or(u32::MAX);
        return if rebate > fee_bps.value() {
            Bps::ZERO
        } else {
            Bps::new(fee_bps.value() - rebate)
        };
    }

    // moving away from target: tax on the average distance, capped at the full tax
    let mut average_diff = (initial_diff + next_diff) / dec!(2);
    if average_diff > target_usd {
        average_diff = target_usd;
    }
    let tax = (tax_bps.as_decimal() * average_diff / target_usd)
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX);
    Bps::new(fee_bps.value().saturating_add(tax))
}

// 5.2: funding accrues per fully elapsed interval, scaled by pool utilization.
// returns the rate delta in FUNDING_RATE_PRECISION units.
pub fn next_funding_rate(
    reserved: Decimal,
    pool: Decimal,
    last_funding_time_ms: i64,
    now_ms: i64,
    interval_ms: i64,
    factor: Decimal,
) -> Decimal {
    if pool.is_zero() {
        return Decimal::ZERO;
    }
    if now_ms < last_funding_time_ms + interval_ms {
        return Decimal::ZERO;
    }
    let intervals = Decimal::from((now_ms - last_funding_time_ms) / interval_ms);
    factor * reserved * intervals / pool
}

// 5.3: funding fee owed since the position's entry snapshot.
pub fn funding_fee(size: Usd, cumulative_rate: Decimal, entry_rate: Decimal) -> Usd {
    if size.is_zero() {
        return Usd::zero();
    }
    let delta = cumulative_rate - entry_rate;
    Usd::new(size.value() * delta / FUNDING_RATE_PRECISION)
}

// 5.4: flat margin fee on the size delta, computed through the after-fee form
// so the fee is exactly what the position does not keep.
pub fn position_fee(size_delta: Usd, margin_fee_bps: Bps) -> Usd {
    if size_delta.is_zero() {
        return Usd::zero();
    }
    let after_fee = size_delta.value() * (BASIS_POINTS_DIVISOR - margin_fee_bps.as_decimal())
        / BASIS_POINTS_DIVISOR;
    Usd::new(size_delta.value() - after_fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn dynamic_fee_disabled_returns_base() {
        let fee = dynamic_fee_bps(
            dec!(1000),
            dec!(500),
            dec!(100),
            Bps::new(30),
            Bps::new(50),
            true,
            false,
        );
        assert_eq!(fee, Bps::new(30));
    }

    #[test]
    fn dynamic_fee_taxed_when_pushing_away() {
        // pool already at target, adding more pushes it away
        let fee = dynamic_fee_bps(
            dec!(1000),
            dec!(500),
            dec!(1000),
            Bps::new(30),
            Bps::new(50),
            true,
            true,
        );
        // average diff = (0 + 500)/2 = 250, tax = 50 * 250/1000 = 12
        assert_eq!(fee, Bps::new(42));
    }

    #[test]
    fn dynamic_fee_rebated_when_pushing_toward() {
        // pool below target, adding moves toward it
        let fee = dynamic_fee_bps(
            dec!(500),
            dec!(300),
            dec!(1000),
            Bps::new(30),
            Bps::new(50),
            true,
            true,
        );
        // rebate = 50 * 500/1000 = 25
        assert_eq!(fee, Bps::new(5));
    }

    #[test]
    fn dynamic_fee_never_negative() {
        let fee = dynamic_fee_bps(
            dec!(100),
            dec!(100),
            dec!(1000),
            Bps::new(10),
            Bps::new(200),
            true,
            true,
        );
        assert_eq!(fee, Bps::ZERO);
    }

    #[test]
    fn dynamic_fee_symmetric_in_direction() {
        // removing from an over-weight pool earns the same rebate shape as
        // adding to an under-weight one
        let add_toward = dynamic_fee_bps(
            dec!(800),
            dec!(100),
            dec!(1000),
            Bps::new(30),
            Bps::new(50),
            true,
            true,
        );
        let remove_toward = dynamic_fee_bps(
            dec!(1200),
            dec!(100),
            dec!(1000),
            Bps::new(30),
            Bps::new(50),
            false,
            true,
        );
        assert_eq!(add_toward, remove_toward);
    }

    #[test]
    fn funding_rate_needs_full_interval() {
        let hour = 3_600_000;
        let rate = next_funding_rate(dec!(50), dec!(100), 0, hour - 1, hour, dec!(600));
        assert_eq!(rate, Decimal::ZERO);

        let rate = next_funding_rate(dec!(50), dec!(100), 0, hour, hour, dec!(600));
        // one interval at 50% utilization: 600 * 0.5 = 300
        assert_eq!(rate, dec!(300));
    }

    #[test]
    fn funding_rate_floors_partial_intervals() {
        let hour = 3_600_000;
        let rate = next_funding_rate(
            dec!(100),
            dec!(100),
            0,
            2 * hour + hour / 2, // 2.5 intervals
            hour,
            dec!(600),
        );
        assert_eq!(rate, dec!(1200)); // only 2 count
    }

    #[test]
    fn funding_fee_from_cumulative_delta() {
        let fee = funding_fee(Usd::new(dec!(1000)), dec!(1500), dec!(500));
        // 1000 * 1000 / 1_000_000 = 1
        assert_eq!(fee.value(), dec!(1));
    }

    #[test]
    fn position_fee_flat_bps() {
        let fee = position_fee(Usd::new(dec!(1000)), Bps::new(10));
        assert_eq!(fee.value(), dec!(1)); // 10 bps of 1000
    }
}
