// 12.0: all settings in one place. vault flags, fees, funding, price feed,
// and keeper delays, with named presets and a consistency check.

use crate::fees::{FeeParams, FundingParams};
use crate::price_feed::PriceFeedSettings;
use crate::types::{Amount, Bps};
use crate::vault::VaultParams;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Delays governing the delayed position-request queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    pub min_execution_fee: Amount,
    pub min_block_delay_keeper: u64,
    pub min_time_delay_public_ms: i64,
    pub max_time_delay_ms: i64,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            min_execution_fee: Amount::new(dec!(0.0001)),
            min_block_delay_keeper: 2,
            min_time_delay_public_ms: 3 * 60 * 1000,
            max_time_delay_ms: 30 * 60 * 1000,
        }
    }
}

/// The complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub vault: VaultParams,
    pub fees: FeeParams,
    pub funding: FundingParams,
    pub price_feed: PriceFeedSettings,
    pub keeper: KeeperConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vault: VaultParams::default(),
            fees: FeeParams::default(),
            funding: FundingParams::default(),
            price_feed: PriceFeedSettings::default(),
            keeper: KeeperConfig::default(),
        }
    }
}

impl EngineConfig {
    // conservative settings for a first deployment: lower leverage, private
    // liquidations, managed liquidity
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.vault.max_leverage = Decimal::from(30);
        config.vault.in_private_liquidation_mode = true;
        config.vault.in_manager_mode = true;
        config.fees.tax_bps = Bps::new(60);
        config.keeper.min_block_delay_keeper = 3;
        config
    }

    // settings for local simulation: everything open, no delays
    pub fn simulation() -> Self {
        let mut config = Self::default();
        config.vault.verbose = false;
        config.keeper.min_block_delay_keeper = 0;
        config.keeper.min_time_delay_public_ms = 0;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vault.max_leverage <= Decimal::ONE {
            return Err(ConfigError::InvalidVault {
                reason: "max leverage must exceed 1x".to_string(),
            });
        }

        if self.fees.margin_fee_bps.value() > 500 {
            return Err(ConfigError::InvalidFees {
                reason: "margin fee above 5% is a misconfiguration".to_string(),
            });
        }
        if self.fees.swap_fee_bps.value() > 500 || self.fees.mint_burn_fee_bps.value() > 500 {
            return Err(ConfigError::InvalidFees {
                reason: "swap/mint fee above 5% is a misconfiguration".to_string(),
            });
        }
        if self.fees.liquidation_fee_usd.value() < Decimal::ZERO {
            return Err(ConfigError::InvalidFees {
                reason: "liquidation fee cannot be negative".to_string(),
            });
        }

        if self.funding.funding_interval_ms <= 0 {
            return Err(ConfigError::InvalidFunding {
                reason: "funding interval must be positive".to_string(),
            });
        }
        if self.funding.funding_rate_factor < Decimal::ZERO
            || self.funding.stable_funding_rate_factor < Decimal::ZERO
        {
            return Err(ConfigError::InvalidFunding {
                reason: "funding rate factors cannot be negative".to_string(),
            });
        }

        if self.keeper.max_time_delay_ms <= self.keeper.min_time_delay_public_ms {
            return Err(ConfigError::InvalidKeeper {
                reason: "max time delay must exceed the public delay".to_string(),
            });
        }

        if self.price_feed.max_strict_price_deviation < Decimal::ZERO
            || self.price_feed.max_strict_price_deviation > dec!(0.1)
        {
            return Err(ConfigError::InvalidPriceFeed {
                reason: "strict stable deviation must be within [0, 0.1]".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidVault { reason: String },
    InvalidFees { reason: String },
    InvalidFunding { reason: String },
    InvalidKeeper { reason: String },
    InvalidPriceFeed { reason: String },
}
