// 9.0: price feed aggregation. one canonical max/min price per token, built from
// a round-based primary oracle, an optional amm spot blend, an optional secondary
// source, a strict-stable clamp, a spread, and a rate-limited manual adjustment.
//
// the engine never reads oracles directly. it sees the PriceOracle trait so tests
// can swap in fixed prices.

use crate::types::{Bps, Price, Timestamp, Token, BASIS_POINTS_DIVISOR};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// manual adjustments are bounded and rate limited so a compromised admin key
// cannot swing prices arbitrarily.
pub const MAX_ADJUSTMENT_BPS: u32 = 20;
pub const MIN_ADJUSTMENT_INTERVAL_MS: i64 = 2 * 60 * 60 * 1000;

/// Round-based upstream oracle. Matches the shape of a Chainlink-style feed:
/// monotonically increasing round ids, one price per round.
pub trait OracleSource {
    fn latest_round(&self) -> u64;
    fn price_at(&self, round: u64) -> Option<Decimal>;
}

/// Optional AMM-derived spot price, blended into the primary under v2 rules.
pub trait AmmSource {
    fn spot_price(&self, token: Token) -> Option<Decimal>;
}

/// Optional secondary oracle, consulted after the primary/amm blend.
/// Receives the blended price so it can choose to defer to it.
pub trait SecondarySource {
    fn price(&self, token: Token, primary: Decimal, maximize: bool) -> Option<Decimal>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("no feed configured for token {0:?}")]
    UnknownToken(Token),

    #[error("oracle returned no price for token {token:?} at round {round}")]
    MissingRound { token: Token, round: u64 },

    #[error("oracle returned a non-positive price for token {token:?} at round {round}")]
    InvalidRound { token: Token, round: u64 },

    #[error("could not derive a price for token {0:?}")]
    NoPrice(Token),

    #[error("adjustment of {0} exceeds the {MAX_ADJUSTMENT_BPS}bps bound")]
    AdjustmentTooLarge(Bps),

    #[error("adjustment for token {0:?} is rate limited")]
    AdjustmentCooldown(Token),
}

// 9.1: per-token feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    // symmetric spread widened on both the max and min side
    pub spread_bps: Bps,
    // strict stables snap to exactly 1.0 inside the deviation tolerance
    pub is_strict_stable: bool,
    // how many recent rounds to sample for the max/min primary
    pub sample_rounds: u64,
    pub adjustment_bps: Bps,
    pub is_adjustment_additive: bool,
    pub last_adjustment_time: Timestamp,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            spread_bps: Bps::ZERO,
            is_strict_stable: false,
            sample_rounds: 3,
            adjustment_bps: Bps::ZERO,
            is_adjustment_additive: false,
            last_adjustment_time: Timestamp::from_millis(0),
        }
    }
}

// 9.2: global aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedSettings {
    pub amm_enabled: bool,
    // v2 mode: amm price only counts when it deviates from the primary by more
    // than this threshold, otherwise the primary is trusted as-is
    pub use_v2_pricing: bool,
    pub amm_deviation_bps: Bps,
    pub secondary_enabled: bool,
    // strict stables within this absolute distance of 1.0 snap to 1.0
    pub max_strict_price_deviation: Decimal,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            amm_enabled: false,
            use_v2_pricing: false,
            amm_deviation_bps: Bps::new(30),
            secondary_enabled: false,
            max_strict_price_deviation: dec!(0.01),
        }
    }
}

struct FeedEntry {
    config: FeedConfig,
    source: Box<dyn OracleSource + Send + Sync>,
}

/// Aggregates every configured upstream into one trusted max/min price per token.
pub struct PriceFeed {
    settings: PriceFeedSettings,
    feeds: HashMap<Token, FeedEntry>,
    amm: Option<Box<dyn AmmSource + Send + Sync>>,
    secondary: Option<Box<dyn SecondarySource + Send + Sync>>,
}

impl std::fmt::Debug for PriceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeed")
            .field("settings", &self.settings)
            .field("tokens", &self.feeds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PriceFeed {
    pub fn new(settings: PriceFeedSettings) -> Self {
        Self {
            settings,
            feeds: HashMap::new(),
            amm: None,
            secondary: None,
        }
    }

    pub fn set_token_feed(
        &mut self,
        token: Token,
        config: FeedConfig,
        source: Box<dyn OracleSource + Send + Sync>,
    ) {
        self.feeds.insert(token, FeedEntry { config, source });
    }

    pub fn set_amm(&mut self, amm: Box<dyn AmmSource + Send + Sync>) {
        self.amm = Some(amm);
    }

    pub fn set_secondary(&mut self, secondary: Box<dyn SecondarySource + Send + Sync>) {
        self.secondary = Some(secondary);
    }

    pub fn settings_mut(&mut self) -> &mut PriceFeedSettings {
        &mut self.settings
    }

    pub fn set_spread(&mut self, token: Token, spread_bps: Bps) -> Result<(), PriceError> {
        let entry = self
            .feeds
            .get_mut(&token)
            .ok_or(PriceError::UnknownToken(token))?;
        entry.config.spread_bps = spread_bps;
        Ok(())
    }

    // bounded, cooldown-gated manual correction. used instead of redeploying a feed.
    pub fn set_adjustment(
        &mut self,
        token: Token,
        is_additive: bool,
        bps: Bps,
        now: Timestamp,
    ) -> Result<(), PriceError> {
        if bps.value() > MAX_ADJUSTMENT_BPS {
            return Err(PriceError::AdjustmentTooLarge(bps));
        }
        let entry = self
            .feeds
            .get_mut(&token)
            .ok_or(PriceError::UnknownToken(token))?;
        if entry.config.last_adjustment_time.as_millis() > 0
            && entry.config.last_adjustment_time.elapsed_millis(&now) < MIN_ADJUSTMENT_INTERVAL_MS
        {
            return Err(PriceError::AdjustmentCooldown(token));
        }
        entry.config.adjustment_bps = bps;
        entry.config.is_adjustment_additive = is_additive;
        entry.config.last_adjustment_time = now;
        Ok(())
    }

    /// The canonical price: maximize=true gives the worst case for the protocol
    /// on longs, maximize=false on shorts. include_amm=false is used during
    /// liquidations so spot manipulation cannot game the eligibility check.
    pub fn get_price(
        &self,
        token: Token,
        maximize: bool,
        include_amm: bool,
    ) -> Result<Price, PriceError> {
        let entry = self
            .feeds
            .get(&token)
            .ok_or(PriceError::UnknownToken(token))?;

        let mut price = self.primary_price(token, entry, maximize)?;

        if self.settings.amm_enabled && include_amm {
            price = self.blend_amm(token, price, maximize);
        }

        if self.settings.secondary_enabled {
            if let Some(secondary) = &self.secondary {
                if let Some(p) = secondary.price(token, price, maximize) {
                    if p > Decimal::ZERO {
                        price = p;
                    }
                }
            }
        }

        let config = &entry.config;
        let price = if config.is_strict_stable {
            // the clamp is final: neither spread nor adjustment may move a
            // strict stable off 1.0
            clamp_strict_stable(price, maximize, self.settings.max_strict_price_deviation)
        } else {
            let mut price = apply_spread(price, maximize, config.spread_bps);
            if config.adjustment_bps.value() > 0 {
                price = if config.is_adjustment_additive {
                    price * (BASIS_POINTS_DIVISOR + config.adjustment_bps.as_decimal())
                        / BASIS_POINTS_DIVISOR
                } else {
                    price * (BASIS_POINTS_DIVISOR - config.adjustment_bps.as_decimal())
                        / BASIS_POINTS_DIVISOR
                };
            }
            price
        };

        Price::new(price).ok_or(PriceError::NoPrice(token))
    }

    // 9.3: max or min over the last sample_rounds rounds. any zero or missing
    // sampled round is fatal, never silently skipped.
    fn primary_price(
        &self,
        token: Token,
        entry: &FeedEntry,
        maximize: bool,
    ) -> Result<Decimal, PriceError> {
        let latest = entry.source.latest_round();
        let mut price: Option<Decimal> = None;

        for i in 0..entry.config.sample_rounds {
            if latest < i + 1 {
                break;
            }
            let round = latest - i;
            let p = entry
                .source
                .price_at(round)
                .ok_or(PriceError::MissingRound { token, round })?;
            if p <= Decimal::ZERO {
                return Err(PriceError::InvalidRound { token, round });
            }
            price = Some(match price {
                None => p,
                Some(best) => {
                    if maximize {
                        best.max(p)
                    } else {
                        best.min(p)
                    }
                }
            });
        }

        price.ok_or(PriceError::NoPrice(token))
    }

    fn blend_amm(&self, token: Token, primary: Decimal, maximize: bool) -> Decimal {
        let Some(amm) = &self.amm else {
            return primary;
        };
        let Some(spot) = amm.spot_price(token) else {
            return primary;
        };
        if spot <= Decimal::ZERO {
            return primary;
        }

        if self.settings.use_v2_pricing {
            // low-liquidity pools cannot move the price unless they disagree
            // with the primary by more than the threshold
            let diff = (spot - primary).abs();
            if diff * BASIS_POINTS_DIVISOR < primary * self.settings.amm_deviation_bps.as_decimal()
            {
                return primary;
            }
        }

        if maximize {
            primary.max(spot)
        } else {
            primary.min(spot)
        }
    }
}

// 9.4: strict stables never trade above 1 on the minimize path or below 1 on
// the maximize path. inside the tolerance they are exactly 1.
fn clamp_strict_stable(price: Decimal, maximize: bool, max_deviation: Decimal) -> Decimal {
    let delta = (price - Decimal::ONE).abs();
    if delta <= max_deviation {
        return Decimal::ONE;
    }
    if maximize && price > Decimal::ONE {
        return price;
    }
    if !maximize && price < Decimal::ONE {
        return price;
    }
    Decimal::ONE
}

fn apply_spread(price: Decimal, maximize: bool, spread: Bps) -> Decimal {
    if maximize {
        price * (BASIS_POINTS_DIVISOR + spread.as_decimal()) / BASIS_POINTS_DIVISOR
    } else {
        price * (BASIS_POINTS_DIVISOR - spread.as_decimal()) / BASIS_POINTS_DIVISOR
    }
}

/// The read-only collaborator interface the vault depends on.
pub trait PriceOracle {
    fn price(&self, token: Token, maximize: bool, include_amm: bool) -> Result<Price, PriceError>;
}

impl PriceOracle for PriceFeed {
    fn price(&self, token: Token, maximize: bool, include_amm: bool) -> Result<Price, PriceError> {
        self.get_price(token, maximize, include_amm)
    }
}

/// In-memory round store for tests and simulation.
#[derive(Debug, Clone, Default)]
pub struct MockOracle {
    rounds: Vec<Decimal>,
}

impl MockOracle {
    pub fn new(initial: Decimal) -> Self {
        Self {
            rounds: vec![initial],
        }
    }

    pub fn push_price(&mut self, price: Decimal) {
        self.rounds.push(price);
    }
}

impl OracleSource for MockOracle {
    fn latest_round(&self) -> u64 {
        self.rounds.len() as u64
    }

    fn price_at(&self, round: u64) -> Option<Decimal> {
        if round == 0 {
            return None;
        }
        self.rounds.get(round as usize - 1).copied()
    }
}

/// Fixed min/max prices per token. The cheapest possible PriceOracle for
/// exercising the vault without feed plumbing.
#[derive(Debug, Clone, Default)]
pub struct FixedPrices {
    prices: HashMap<Token, (Decimal, Decimal)>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, token: Token, price: Decimal) {
        self.prices.insert(token, (price, price));
    }

    pub fn set_spread(&mut self, token: Token, min: Decimal, max: Decimal) {
        self.prices.insert(token, (min, max));
    }
}

impl PriceOracle for FixedPrices {
    fn price(&self, token: Token, maximize: bool, _include_amm: bool) -> Result<Price, PriceError> {
        let (min, max) = self
            .prices
            .get(&token)
            .copied()
            .ok_or(PriceError::UnknownToken(token))?;
        let p = if maximize { max } else { min };
        Price::new(p).ok_or(PriceError::NoPrice(token))
    }
}
