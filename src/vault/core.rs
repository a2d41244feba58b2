// 8.1: vault state owner. token registry, pooled balances, open positions,
// injected oracle and policy, capability checks, and the simulated environment
// (time, block number, gas price) the host advances explicitly.

use crate::access::{AccessControl, Role};
use crate::events::{Event, EventId, EventPayload, WithdrawFeesEvent};
use crate::fees::{FeeParams, FundingParams};
use crate::policy::VaultPolicy;
use crate::position::{Position, PositionKey};
use crate::price_feed::PriceOracle;
use crate::types::{AccountId, Amount, Bps, Price, Side, Timestamp, Token, Usd};
use crate::vault::results::VaultError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static per-token listing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    // token precision; usd->token conversions truncate to this many places
    pub decimals: u32,
    // relative target weight for the rebalancing fee curve
    pub weight: Decimal,
    // fresh profits below this threshold count as zero inside min_profit_time
    pub min_profit_bps: Bps,
    pub is_stable: bool,
    pub is_shortable: bool,
    // cap on pooled usd booked against this token. zero = uncapped
    pub max_liquidity_usd: Usd,
    // swaps must not drain the pool below this floor
    pub buffer_amount: Amount,
    // cap on aggregate short exposure against this index token. zero = uncapped
    pub max_global_short_size: Usd,
}

impl TokenConfig {
    pub fn volatile(decimals: u32, weight: Decimal) -> Self {
        Self {
            decimals,
            weight,
            min_profit_bps: Bps::ZERO,
            is_stable: false,
            is_shortable: true,
            max_liquidity_usd: Usd::zero(),
            buffer_amount: Amount::zero(),
            max_global_short_size: Usd::zero(),
        }
    }

    pub fn stable(decimals: u32, weight: Decimal) -> Self {
        Self {
            decimals,
            weight,
            min_profit_bps: Bps::ZERO,
            is_stable: true,
            is_shortable: false,
            max_liquidity_usd: Usd::zero(),
            buffer_amount: Amount::zero(),
            max_global_short_size: Usd::zero(),
        }
    }
}

/// Mutable per-token pool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    // liquidity backing leverage, distinct from the incidental balance
    pub pool_amount: Amount,
    // subset of the pool committed to open positions
    pub reserved_amount: Amount,
    // pooled usd booked at buy/sell/swap time, drives the fee curve target
    pub liquidity_usd: Usd,
    // aggregate size - collateral across longs. an approximation, corrected
    // only at liquidation
    pub guaranteed_usd: Usd,
    // all shorts on an index token share one synthetic position
    pub global_short_size: Usd,
    pub global_short_average_price: Price,
    pub fee_reserves: Amount,
    pub cumulative_funding_rate: Decimal,
    pub last_funding_time: Timestamp,
    // tracked token balance; pool_amount <= balance at all times
    pub balance: Amount,
}

impl TokenState {
    pub fn new() -> Self {
        Self {
            pool_amount: Amount::zero(),
            reserved_amount: Amount::zero(),
            liquidity_usd: Usd::zero(),
            guaranteed_usd: Usd::zero(),
            global_short_size: Usd::zero(),
            global_short_average_price: Price::new_unchecked(Decimal::ONE),
            fee_reserves: Amount::zero(),
            cumulative_funding_rate: Decimal::ZERO,
            last_funding_time: Timestamp::from_millis(0),
            balance: Amount::zero(),
        }
    }
}

impl Default for TokenState {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-wide parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultParams {
    pub is_leverage_enabled: bool,
    pub is_swap_enabled: bool,
    // notional may not exceed collateral times this multiplier
    pub max_leverage: Decimal,
    // window for the min-profit anti-front-running rule
    pub min_profit_time_ms: i64,
    // ceiling on the simulated gas price. zero = uncapped
    pub max_gas_price: Decimal,
    pub in_private_liquidation_mode: bool,
    pub in_manager_mode: bool,
    pub max_events: usize,
    pub verbose: bool,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            is_leverage_enabled: true,
            is_swap_enabled: true,
            max_leverage: Decimal::from(50),
            min_profit_time_ms: 0,
            max_gas_price: Decimal::ZERO,
            in_private_liquidation_mode: false,
            in_manager_mode: false,
            max_events: 10_000,
            verbose: false,
        }
    }
}

/// Opaque checkpoint returned by [`Vault::snapshot`].
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    state: HashMap<Token, TokenState>,
    positions: HashMap<PositionKey, Position>,
    events_len: usize,
    next_event_id: u64,
}

/** 8.2: the vault. all pooled state lives here */
pub struct Vault {
    pub(super) params: VaultParams,
    pub(super) fee_params: FeeParams,
    pub(super) funding_params: FundingParams,
    pub(super) tokens: HashMap<Token, TokenConfig>,
    pub(super) state: HashMap<Token, TokenState>,
    pub(super) positions: HashMap<PositionKey, Position>,
    pub(super) oracle: Box<dyn PriceOracle + Send + Sync>,
    pub(super) policy: Box<dyn VaultPolicy + Send + Sync>,
    pub(super) access: AccessControl,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    // amm pricing is switched off for the duration of a liquidation call
    pub(super) include_amm_price: bool,
    // simulated environment, advanced explicitly by the host
    pub(super) current_time: Timestamp,
    pub(super) block_number: u64,
    pub(super) gas_price: Decimal,
    pub(super) total_token_weight: Decimal,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("params", &self.params)
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .field("positions", &self.positions.len())
            .field("current_time", &self.current_time)
            .finish()
    }
}

impl Vault {
    pub fn new(
        gov: AccountId,
        oracle: Box<dyn PriceOracle + Send + Sync>,
        policy: Box<dyn VaultPolicy + Send + Sync>,
        params: VaultParams,
        fee_params: FeeParams,
        funding_params: FundingParams,
    ) -> Self {
        Self {
            params,
            fee_params,
            funding_params,
            tokens: HashMap::new(),
            state: HashMap::new(),
            positions: HashMap::new(),
            oracle,
            policy,
            access: AccessControl::with_gov(gov),
            events: Vec::new(),
            next_event_id: 1,
            include_amm_price: true,
            current_time: Timestamp::from_millis(0),
            block_number: 0,
            gas_price: Decimal::ZERO,
            total_token_weight: Decimal::ZERO,
        }
    }

    // --- simulated environment ---

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn set_block_number(&mut self, block: u64) {
        self.block_number = block;
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block_number += blocks;
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn set_gas_price(&mut self, gas_price: Decimal) {
        self.gas_price = gas_price;
    }

    // --- governance ---

    pub fn require_role(&self, account: AccountId, role: Role) -> Result<(), VaultError> {
        if self.access.has(account, role) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized { account, role })
        }
    }

    pub fn grant_role(
        &mut self,
        caller: AccountId,
        account: AccountId,
        role: Role,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.access.grant(account, role);
        Ok(())
    }

    pub fn revoke_role(
        &mut self,
        caller: AccountId,
        account: AccountId,
        role: Role,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.access.revoke(account, role);
        Ok(())
    }

    pub fn set_token_config(
        &mut self,
        caller: AccountId,
        token: Token,
        config: TokenConfig,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        if let Some(previous) = self.tokens.get(&token) {
            self.total_token_weight -= previous.weight;
        }
        self.total_token_weight += config.weight;
        self.tokens.insert(token, config);
        self.state.entry(token).or_default();
        Ok(())
    }

    pub fn clear_token_config(&mut self, caller: AccountId, token: Token) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        let config = self
            .tokens
            .remove(&token)
            .ok_or(VaultError::TokenNotWhitelisted(token))?;
        self.total_token_weight -= config.weight;
        Ok(())
    }

    pub fn set_params(&mut self, caller: AccountId, params: VaultParams) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.params = params;
        Ok(())
    }

    pub fn set_fee_params(&mut self, caller: AccountId, fees: FeeParams) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.fee_params = fees;
        Ok(())
    }

    pub fn set_funding_params(
        &mut self,
        caller: AccountId,
        funding: FundingParams,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.funding_params = funding;
        Ok(())
    }

    pub fn set_buffer_amount(
        &mut self,
        caller: AccountId,
        token: Token,
        buffer: Amount,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        let config = self
            .tokens
            .get_mut(&token)
            .ok_or(VaultError::TokenNotWhitelisted(token))?;
        config.buffer_amount = buffer;
        Ok(())
    }

    pub fn set_max_global_short_size(
        &mut self,
        caller: AccountId,
        token: Token,
        cap: Usd,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        let config = self
            .tokens
            .get_mut(&token)
            .ok_or(VaultError::TokenNotWhitelisted(token))?;
        config.max_global_short_size = cap;
        Ok(())
    }

    /// Swap the price source without touching any vault storage.
    pub fn set_oracle(
        &mut self,
        caller: AccountId,
        oracle: Box<dyn PriceOracle + Send + Sync>,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.oracle = oracle;
        Ok(())
    }

    /// Swap the validation/fee policy without touching any vault storage.
    pub fn set_policy(
        &mut self,
        caller: AccountId,
        policy: Box<dyn VaultPolicy + Send + Sync>,
    ) -> Result<(), VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.policy = policy;
        Ok(())
    }

    pub fn withdraw_fees(
        &mut self,
        caller: AccountId,
        token: Token,
        receiver: AccountId,
    ) -> Result<Amount, VaultError> {
        self.require_role(caller, Role::Gov)?;
        self.validate_whitelisted(token)?;
        let amount = self.state[&token].fee_reserves;
        if amount.is_zero() {
            return Ok(amount);
        }
        self.state.get_mut(&token).unwrap().fee_reserves = Amount::zero();
        self.transfer_out(token, amount)?;
        self.emit_event(EventPayload::WithdrawFees(WithdrawFeesEvent {
            token,
            receiver,
            amount,
        }));
        Ok(amount)
    }

    // --- read access ---

    pub fn params(&self) -> &VaultParams {
        &self.params
    }

    pub fn fee_params(&self) -> &FeeParams {
        &self.fee_params
    }

    pub fn funding_params(&self) -> &FundingParams {
        &self.funding_params
    }

    pub fn token_config(&self, token: Token) -> Option<&TokenConfig> {
        self.tokens.get(&token)
    }

    pub fn token_state(&self, token: Token) -> Option<&TokenState> {
        self.state.get(&token)
    }

    pub fn get_position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn cumulative_funding_rate(&self, token: Token) -> Decimal {
        self.state
            .get(&token)
            .map(|s| s.cumulative_funding_rate)
            .unwrap_or(Decimal::ZERO)
    }

    // --- prices and conversions ---

    pub fn max_price(&self, token: Token) -> Result<Price, VaultError> {
        Ok(self.oracle.price(token, true, self.include_amm_price)?)
    }

    pub fn min_price(&self, token: Token) -> Result<Price, VaultError> {
        Ok(self.oracle.price(token, false, self.include_amm_price)?)
    }

    pub fn token_to_usd_min(&self, token: Token, amount: Amount) -> Result<Usd, VaultError> {
        if amount.is_zero() {
            return Ok(Usd::zero());
        }
        let price = self.min_price(token)?;
        Ok(Usd::new(amount.value() * price.value()))
    }

    pub fn token_to_usd_max(&self, token: Token, amount: Amount) -> Result<Usd, VaultError> {
        if amount.is_zero() {
            return Ok(Usd::zero());
        }
        let price = self.max_price(token)?;
        Ok(Usd::new(amount.value() * price.value()))
    }

    // divides by the min price, yielding the larger token amount
    pub fn usd_to_token_max(&self, token: Token, usd: Usd) -> Result<Amount, VaultError> {
        if usd.is_zero() {
            return Ok(Amount::zero());
        }
        let price = self.min_price(token)?;
        let decimals = self.decimals(token)?;
        Ok(Amount::new(usd.value() / price.value()).truncate(decimals))
    }

    // divides by the max price, yielding the smaller token amount
    pub fn usd_to_token_min(&self, token: Token, usd: Usd) -> Result<Amount, VaultError> {
        if usd.is_zero() {
            return Ok(Amount::zero());
        }
        let price = self.max_price(token)?;
        let decimals = self.decimals(token)?;
        Ok(Amount::new(usd.value() / price.value()).truncate(decimals))
    }

    pub fn decimals(&self, token: Token) -> Result<u32, VaultError> {
        self.tokens
            .get(&token)
            .map(|c| c.decimals)
            .ok_or(VaultError::TokenNotWhitelisted(token))
    }

    // --- fee curve targets ---

    pub fn total_liquidity_usd(&self) -> Usd {
        self.state.values().map(|s| s.liquidity_usd).sum()
    }

    /// This token's target share of pooled usd, derived from its weight.
    pub fn target_liquidity_usd(&self, token: Token) -> Usd {
        let Some(config) = self.tokens.get(&token) else {
            return Usd::zero();
        };
        if self.total_token_weight.is_zero() {
            return Usd::zero();
        }
        let total = self.total_liquidity_usd();
        Usd::new(total.value() * config.weight / self.total_token_weight)
    }

    // --- shared validations ---

    pub fn validate_whitelisted(&self, token: Token) -> Result<(), VaultError> {
        if self.tokens.contains_key(&token) {
            Ok(())
        } else {
            Err(VaultError::TokenNotWhitelisted(token))
        }
    }

    pub(super) fn validate_gas_price(&self) -> Result<(), VaultError> {
        if self.params.max_gas_price > Decimal::ZERO && self.gas_price > self.params.max_gas_price {
            return Err(VaultError::GasPriceExceeded {
                gas_price: self.gas_price,
                max: self.params.max_gas_price,
            });
        }
        Ok(())
    }

    // side-consistent token pairing: longs collateralize with the index token
    // itself, shorts with a stablecoin against a shortable index
    pub(super) fn validate_pair(
        &self,
        collateral_token: Token,
        index_token: Token,
        side: Side,
    ) -> Result<(), VaultError> {
        let collateral = self
            .tokens
            .get(&collateral_token)
            .ok_or(VaultError::TokenNotWhitelisted(collateral_token))?;
        let index = self
            .tokens
            .get(&index_token)
            .ok_or(VaultError::TokenNotWhitelisted(index_token))?;

        match side {
            Side::Long => {
                if collateral_token != index_token || collateral.is_stable {
                    return Err(VaultError::InvalidLongPair {
                        collateral_token,
                        index_token,
                    });
                }
            }
            Side::Short => {
                if !collateral.is_stable || index.is_stable || !index.is_shortable {
                    return Err(VaultError::InvalidShortPair {
                        collateral_token,
                        index_token,
                    });
                }
            }
        }
        Ok(())
    }

    // a live position always has size >= collateral; an empty one has neither
    pub(super) fn validate_position_shape(size: Usd, collateral: Usd) -> Result<(), VaultError> {
        if size.is_zero() {
            if !collateral.is_zero() {
                return Err(VaultError::CollateralWithoutSize);
            }
            return Ok(());
        }
        if size < collateral {
            return Err(VaultError::SizeBelowCollateral { size, collateral });
        }
        Ok(())
    }

    /// Checkpoint of all mutable accounting state. Multi-step entry points
    /// (an implicit swap feeding a position increase) restore it when a later
    /// step fails, so the whole call stays atomic.
    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            state: self.state.clone(),
            positions: self.positions.clone(),
            events_len: self.events.len(),
            next_event_id: self.next_event_id,
        }
    }

    pub fn restore(&mut self, snapshot: VaultSnapshot) {
        self.state = snapshot.state;
        self.positions = snapshot.positions;
        self.events.truncate(snapshot.events_len);
        self.next_event_id = snapshot.next_event_id;
    }

    pub(crate) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.params.verbose {
            println!("[Event {}] {:?}", event.id.0, event.payload);
        }

        self.events.push(event);

        if self.events.len() > self.params.max_events {
            let drain_count = self.events.len() - self.params.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
