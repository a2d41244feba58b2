// 6.0: the policy delegate. validation and fee formulas live behind a strategy
// trait injected into the vault at construction, so governance can swap the
// formulas without migrating any vault storage.

use crate::fees::{dynamic_fee_bps, funding_fee, position_fee};
use crate::position::{position_delta, PositionKey};
use crate::types::{Bps, Side, Token, Usd};
use crate::vault::{Vault, VaultError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidation eligibility, in rising order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationState {
    /// Not liquidatable. A liquidation attempt must fail.
    Healthy,
    /// Losses or fees have consumed the collateral. Liquidate outright.
    Liquidatable,
    /// Over max leverage but still solvent. Reroute to a full decrease so any
    /// remaining value goes back to the trader.
    MaxLeverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationCheck {
    pub state: LiquidationState,
    pub margin_fees: Usd,
}

/// Swappable validation/fee policy consulted by the vault.
pub trait VaultPolicy {
    /// Funding rate snapshot stored on a position at update time.
    fn entry_funding_rate(&self, vault: &Vault, collateral_token: Token) -> Decimal {
        vault.cumulative_funding_rate(collateral_token)
    }

    /// Funding fee accrued by `size` since `entry_rate` was snapshotted.
    fn funding_fee(&self, vault: &Vault, collateral_token: Token, size: Usd, entry_rate: Decimal)
        -> Usd;

    /// Flat fee on a position size delta.
    fn position_fee(&self, vault: &Vault, size_delta: Usd) -> Usd;

    /// Economic pre-checks for an increase. Default policy has none beyond
    /// what the vault itself enforces.
    fn validate_increase(
        &self,
        _vault: &Vault,
        _key: &PositionKey,
        _collateral_delta: Usd,
        _size_delta: Usd,
    ) -> Result<(), VaultError> {
        Ok(())
    }

    /// Economic pre-checks for a decrease.
    fn validate_decrease(
        &self,
        _vault: &Vault,
        _key: &PositionKey,
        _collateral_delta: Usd,
        _size_delta: Usd,
    ) -> Result<(), VaultError> {
        Ok(())
    }

    /// Three-way liquidation eligibility. With `should_raise` the first failed
    /// check becomes a hard error, which is how open/increase/decrease reject
    /// positions that would be born liquidatable.
    fn validate_liquidation(
        &self,
        vault: &Vault,
        key: &PositionKey,
        should_raise: bool,
    ) -> Result<LiquidationCheck, VaultError>;

    fn buy_fee_bps(&self, vault: &Vault, token: Token, usd_delta: Usd) -> Bps;

    fn sell_fee_bps(&self, vault: &Vault, token: Token, usd_delta: Usd) -> Bps;

    fn swap_fee_bps(&self, vault: &Vault, token_in: Token, token_out: Token, usd_delta: Usd)
        -> Bps;
}

/// The documented formulas.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPolicy;

impl StandardPolicy {
    fn rebalance_fee(
        &self,
        vault: &Vault,
        token: Token,
        usd_delta: Usd,
        base: Bps,
        tax: Bps,
        increment: bool,
    ) -> Bps {
        let current = vault
            .token_state(token)
            .map(|s| s.liquidity_usd)
            .unwrap_or(Usd::zero());
        dynamic_fee_bps(
            current.value(),
            usd_delta.value(),
            vault.target_liquidity_usd(token).value(),
            base,
            tax,
            increment,
            vault.fee_params().has_dynamic_fees,
        )
    }
}

impl VaultPolicy for StandardPolicy {
    fn funding_fee(
        &self,
        vault: &Vault,
        collateral_token: Token,
        size: Usd,
        entry_rate: Decimal,
    ) -> Usd {
        funding_fee(size, vault.cumulative_funding_rate(collateral_token), entry_rate)
    }

    fn position_fee(&self, vault: &Vault, size_delta: Usd) -> Usd {
        position_fee(size_delta, vault.fee_params().margin_fee_bps)
    }

    fn validate_liquidation(
        &self,
        vault: &Vault,
        key: &PositionKey,
        should_raise: bool,
    ) -> Result<LiquidationCheck, VaultError> {
        let position = vault.get_position(key).ok_or(VaultError::PositionNotFound)?;
        let index_config = vault
            .token_config(key.index_token)
            .ok_or(VaultError::TokenNotWhitelisted(key.index_token))?;

        // worst case for the trader: longs marked at the min price, shorts at the max
        let mark = match key.side {
            Side::Long => vault.min_price(key.index_token)?,
            Side::Short => vault.max_price(key.index_token)?,
        };
        let delta = position_delta(
            position.size,
            position.average_price,
            mark,
            key.side,
            index_config.min_profit_bps,
            vault.params().min_profit_time_ms,
            position.last_increased_time,
            vault.time(),
        );

        let margin_fees = self
            .funding_fee(
                vault,
                key.collateral_token,
                position.size,
                position.entry_funding_rate,
            )
            .add(self.position_fee(vault, position.size));

        if !delta.has_profit && position.collateral < delta.delta {
            if should_raise {
                return Err(VaultError::LossesExceedCollateral {
                    losses: delta.delta,
                    collateral: position.collateral,
                });
            }
            return Ok(LiquidationCheck {
                state: LiquidationState::Liquidatable,
                margin_fees,
            });
        }

        let mut remaining = position.collateral;
        if !delta.has_profit {
            remaining = remaining.sub(delta.delta);
        }

        if remaining < margin_fees {
            if should_raise {
                return Err(VaultError::InsufficientCollateralForFees {
                    fee: margin_fees,
                    collateral: remaining,
                });
            }
            // cap the fees to what is left
            return Ok(LiquidationCheck {
                state: LiquidationState::Liquidatable,
                margin_fees: remaining,
            });
        }

        if remaining < margin_fees.add(vault.fee_params().liquidation_fee_usd) {
            if should_raise {
                return Err(VaultError::InsufficientCollateralForFees {
                    fee: margin_fees.add(vault.fee_params().liquidation_fee_usd),
                    collateral: remaining,
                });
            }
            return Ok(LiquidationCheck {
                state: LiquidationState::Liquidatable,
                margin_fees,
            });
        }

        if Usd::new(remaining.value() * vault.params().max_leverage) < position.size {
            if should_raise {
                return Err(VaultError::MaxLeverageExceeded {
                    size: position.size,
                    collateral: remaining,
                });
            }
            return Ok(LiquidationCheck {
                state: LiquidationState::MaxLeverage,
                margin_fees,
            });
        }

        Ok(LiquidationCheck {
            state: LiquidationState::Healthy,
            margin_fees,
        })
    }

    fn buy_fee_bps(&self, vault: &Vault, token: Token, usd_delta: Usd) -> Bps {
        let fees = vault.fee_params();
        self.rebalance_fee(vault, token, usd_delta, fees.mint_burn_fee_bps, fees.tax_bps, true)
    }

    fn sell_fee_bps(&self, vault: &Vault, token: Token, usd_delta: Usd) -> Bps {
        let fees = vault.fee_params();
        self.rebalance_fee(vault, token, usd_delta, fees.mint_burn_fee_bps, fees.tax_bps, false)
    }

    // the swap fee is the worse of the two legs, so a swap cannot dodge the
    // tax by pairing an imbalancing leg with a rebalancing one
    fn swap_fee_bps(
        &self,
        vault: &Vault,
        token_in: Token,
        token_out: Token,
        usd_delta: Usd,
    ) -> Bps {
        let fees = vault.fee_params();
        let is_stable_swap = vault.token_config(token_in).map(|c| c.is_stable).unwrap_or(false)
            && vault.token_config(token_out).map(|c| c.is_stable).unwrap_or(false);
        let (base, tax) = if is_stable_swap {
            (fees.stable_swap_fee_bps, fees.stable_tax_bps)
        } else {
            (fees.swap_fee_bps, fees.tax_bps)
        };
        let fee_in = self.rebalance_fee(vault, token_in, usd_delta, base, tax, true);
        let fee_out = self.rebalance_fee(vault, token_out, usd_delta, base, tax, false);
        fee_in.max(fee_out)
    }
}
