// 8.5: the position state machine. open/increase, decrease, liquidate.
// validations run before any pool state is committed; the invariant-checking
// pool helpers then re-check on commit.

use crate::events::{
    ClosePositionEvent, CollectMarginFeesEvent, DecreasePositionEvent, EventPayload,
    IncreasePositionEvent, LiquidatePositionEvent,
};
use crate::policy::LiquidationState;
use crate::position::{
    next_average_price, next_global_short_average_price, position_delta, Position, PositionDelta,
    PositionKey,
};
use crate::types::{AccountId, Amount, Price, Side, Token, Usd};
use crate::vault::core::Vault;
use crate::vault::results::VaultError;

struct ReducedCollateral {
    usd_out: Usd,
    usd_out_after_fee: Usd,
    fee: Usd,
    // token-side pool correction for shorts: profit drains the pool, loss fills it
    short_pool_delta: Option<(bool, Amount)>, // (is_increase, amount)
}

impl Vault {
    /// Open a new position or grow an existing one. Collateral tokens are
    /// transferred in; the position executes at the worst-case price for the
    /// protocol (max for longs, min for shorts).
    pub fn increase_position(
        &mut self,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        collateral_amount: Amount,
        size_delta: Usd,
        side: Side,
    ) -> Result<(), VaultError> {
        if !self.params.is_leverage_enabled {
            return Err(VaultError::LeverageDisabled);
        }
        self.validate_gas_price()?;
        self.validate_pair(collateral_token, index_token, side)?;
        self.update_cumulative_funding_rate(collateral_token)?;

        let key = PositionKey::new(account, collateral_token, index_token, side);
        let price = match side {
            Side::Long => self.max_price(index_token)?,
            Side::Short => self.min_price(index_token)?,
        };
        let collateral_delta_usd = self.token_to_usd_min(collateral_token, collateral_amount)?;
        self.policy
            .validate_increase(self, &key, collateral_delta_usd, size_delta)?;

        let mut position = self
            .positions
            .get(&key)
            .cloned()
            .unwrap_or_else(Position::empty);

        if position.size.is_zero() {
            position.average_price = price;
        } else if !size_delta.is_zero() {
            let delta = self.mark_delta(&key, &position, price)?;
            position.average_price = next_average_price(
                position.size,
                position.average_price,
                side,
                price,
                size_delta,
                &delta,
            );
        }

        let fee = self
            .policy
            .funding_fee(self, collateral_token, position.size, position.entry_funding_rate)
            .add(self.policy.position_fee(self, size_delta));

        position.collateral = position.collateral.add(collateral_delta_usd);
        if position.collateral < fee {
            return Err(VaultError::InsufficientCollateralForFees {
                fee,
                collateral: position.collateral,
            });
        }
        position.collateral = position.collateral.sub(fee);
        position.entry_funding_rate = self.policy.entry_funding_rate(self, collateral_token);
        position.size = position.size.add(size_delta);
        position.last_increased_time = self.current_time;

        if position.size.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        Vault::validate_position_shape(position.size, position.collateral)?;

        let reserve_delta = self.usd_to_token_max(collateral_token, size_delta)?;
        position.reserve_amount = position.reserve_amount.add(reserve_delta);
        let fee_tokens = self.usd_to_token_min(collateral_token, fee)?;

        // pre-check the pool arithmetic the commit below will perform
        {
            let state = &self.state[&collateral_token];
            let next_reserved = state.reserved_amount.add(reserve_delta);
            if next_reserved > state.pool_amount {
                return Err(VaultError::ReserveExceedsPool {
                    token: collateral_token,
                    reserved: next_reserved,
                    pool: state.pool_amount,
                });
            }
            if side.is_long() {
                let next_pool = state.pool_amount.add(collateral_amount);
                if fee_tokens > next_pool {
                    return Err(VaultError::InsufficientPoolAmount {
                        token: collateral_token,
                        requested: fee_tokens,
                        available: next_pool,
                    });
                }
                if next_reserved > next_pool.sub(fee_tokens) {
                    return Err(VaultError::ReserveExceedsPool {
                        token: collateral_token,
                        reserved: next_reserved,
                        pool: next_pool.sub(fee_tokens),
                    });
                }
            } else {
                let config = &self.tokens[&index_token];
                let index_state = &self.state[&index_token];
                let next_shorts = index_state.global_short_size.add(size_delta);
                if !config.max_global_short_size.is_zero()
                    && next_shorts > config.max_global_short_size
                {
                    return Err(VaultError::MaxGlobalShortsExceeded {
                        token: index_token,
                        size: next_shorts,
                        cap: config.max_global_short_size,
                    });
                }
            }
        }

        // a position must not be born liquidatable: validate against the
        // candidate state, restoring the previous position on failure
        let previous = self.positions.insert(key, position);
        if let Err(err) = self
            .policy
            .validate_liquidation(self, &key, true)
            .map(|_| ())
        {
            match previous {
                Some(p) => {
                    self.positions.insert(key, p);
                }
                None => {
                    self.positions.remove(&key);
                }
            }
            return Err(err);
        }

        // commit
        self.transfer_in(collateral_token, collateral_amount);
        self.increase_reserved(collateral_token, reserve_delta)?;

        if side.is_long() {
            // guaranteed usd tracks size - collateral; the fee shrank collateral
            self.increase_guaranteed_usd(collateral_token, size_delta.add(fee));
            self.decrease_guaranteed_usd(collateral_token, collateral_delta_usd);
            // long collateral joins the pool, with the margin fee carved out
            self.increase_pool(collateral_token, collateral_amount)?;
            self.decrease_pool(collateral_token, fee_tokens)?;
        } else {
            let index_state = self.state.get_mut(&index_token).expect("token state");
            index_state.global_short_average_price = if index_state.global_short_size.is_zero() {
                price
            } else {
                next_global_short_average_price(
                    index_state.global_short_size,
                    index_state.global_short_average_price,
                    price,
                    size_delta,
                )
            };
            self.increase_global_short_size(index_token, size_delta)?;
        }

        self.collect_margin_fee_tokens(collateral_token, fee, fee_tokens);
        self.emit_event(EventPayload::IncreasePosition(IncreasePositionEvent {
            account,
            collateral_token,
            index_token,
            side,
            collateral_delta: collateral_delta_usd,
            size_delta,
            price,
            fee,
        }));
        Ok(())
    }

    /// Shrink or close a position, withdrawing `collateral_delta` of margin on
    /// top of the proportional pnl settlement. Returns the tokens paid out.
    pub fn decrease_position(
        &mut self,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        collateral_delta: Usd,
        size_delta: Usd,
        side: Side,
        receiver: AccountId,
    ) -> Result<Amount, VaultError> {
        self.validate_gas_price()?;
        let key = PositionKey::new(account, collateral_token, index_token, side);
        self.policy
            .validate_decrease(self, &key, collateral_delta, size_delta)?;
        self.update_cumulative_funding_rate(collateral_token)?;

        let mut position = self
            .positions
            .get(&key)
            .cloned()
            .ok_or(VaultError::PositionNotFound)?;
        if position.size.is_zero() || size_delta.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        if size_delta > position.size {
            return Err(VaultError::PositionSizeExceeded {
                size: position.size,
                size_delta,
            });
        }
        if collateral_delta > position.collateral {
            return Err(VaultError::PositionCollateralExceeded {
                collateral: position.collateral,
                collateral_delta,
            });
        }

        let price = match side {
            Side::Long => self.min_price(index_token)?,
            Side::Short => self.max_price(index_token)?,
        };

        let decimals = self.decimals(collateral_token)?;
        let reserve_delta = Amount::new(
            position.reserve_amount.value() * size_delta.value() / position.size.value(),
        )
        .truncate(decimals);

        let collateral_before = position.collateral;
        let reduced = self.reduce_collateral(
            &key,
            &mut position,
            collateral_delta,
            size_delta,
            price,
        )?;

        let is_full_close = size_delta == position.size;
        if !is_full_close {
            position.entry_funding_rate = self.policy.entry_funding_rate(self, collateral_token);
            position.size = position.size.sub(size_delta);
            Vault::validate_position_shape(position.size, position.collateral)?;
        }

        position.reserve_amount = position.reserve_amount.sub(reserve_delta);

        // pre-check the fallible pool arithmetic before committing
        {
            let state = &self.state[&collateral_token];
            if reserve_delta > state.reserved_amount {
                return Err(VaultError::InsufficientReserve {
                    token: collateral_token,
                    requested: reserve_delta,
                    reserved: state.reserved_amount,
                });
            }
            let mut pool = state.pool_amount;
            let reserved = state.reserved_amount.sub(reserve_delta);
            if let Some((increase, amount)) = reduced.short_pool_delta {
                if increase {
                    pool = pool.add(amount);
                    if pool > state.balance {
                        return Err(VaultError::PoolExceedsBalance {
                            token: collateral_token,
                            pool,
                            balance: state.balance,
                        });
                    }
                } else {
                    if amount > pool {
                        return Err(VaultError::InsufficientPoolAmount {
                            token: collateral_token,
                            requested: amount,
                            available: pool,
                        });
                    }
                    pool = pool.sub(amount);
                }
            }
            if side.is_long() && !reduced.usd_out.is_zero() {
                let out_tokens = self.usd_to_token_min(collateral_token, reduced.usd_out)?;
                if out_tokens > pool {
                    return Err(VaultError::InsufficientPoolAmount {
                        token: collateral_token,
                        requested: out_tokens,
                        available: pool,
                    });
                }
                pool = pool.sub(out_tokens);
            }
            if reserved > pool {
                return Err(VaultError::ReserveExceedsPool {
                    token: collateral_token,
                    reserved,
                    pool,
                });
            }
            if !reduced.usd_out_after_fee.is_zero() {
                let payout = self.usd_to_token_min(collateral_token, reduced.usd_out_after_fee)?;
                if payout > state.balance {
                    return Err(VaultError::InsufficientBalance {
                        token: collateral_token,
                        requested: payout,
                        available: state.balance,
                    });
                }
            }
        }

        if is_full_close {
            // tear down atomically: no dangling partial state
            self.emit_event(EventPayload::ClosePosition(ClosePositionEvent {
                account,
                index_token,
                side,
                size: position.size,
                collateral: collateral_before,
                realised_pnl: position.realised_pnl,
            }));
        } else {
            // the shrunk position must not be left liquidatable
            let previous = self.positions.insert(key, position.clone());
            if let Err(err) = self
                .policy
                .validate_liquidation(self, &key, true)
                .map(|_| ())
            {
                match previous {
                    Some(p) => {
                        self.positions.insert(key, p);
                    }
                    None => {
                        self.positions.remove(&key);
                    }
                }
                return Err(err);
            }
        }

        // commit
        self.decrease_reserved(collateral_token, reserve_delta)?;
        if let Some((increase, amount)) = reduced.short_pool_delta {
            if increase {
                self.increase_pool(collateral_token, amount)?;
            } else {
                self.decrease_pool(collateral_token, amount)?;
            }
        }

        if side.is_long() {
            self.increase_guaranteed_usd(
                collateral_token,
                collateral_before.sub(position.collateral),
            );
            self.decrease_guaranteed_usd(collateral_token, size_delta);
        } else {
            self.decrease_global_short_size(index_token, size_delta);
        }

        if is_full_close {
            self.positions.remove(&key);
        }

        let fee_tokens = self.usd_to_token_min(collateral_token, reduced.fee)?;
        self.collect_margin_fee_tokens(collateral_token, reduced.fee, fee_tokens);

        let mut amount_out = Amount::zero();
        if !reduced.usd_out.is_zero() {
            if side.is_long() {
                let out_tokens = self.usd_to_token_min(collateral_token, reduced.usd_out)?;
                self.decrease_pool(collateral_token, out_tokens)?;
            }
            amount_out = self.usd_to_token_min(collateral_token, reduced.usd_out_after_fee)?;
            self.transfer_out(collateral_token, amount_out)?;
        }

        self.emit_event(EventPayload::DecreasePosition(DecreasePositionEvent {
            account,
            collateral_token,
            index_token,
            side,
            collateral_delta,
            size_delta,
            price,
            usd_out: reduced.usd_out,
            fee: reduced.fee,
            receiver,
        }));
        Ok(amount_out)
    }

    /// Liquidate an eligible position. AMM pricing is excluded for the whole
    /// call so spot manipulation cannot game the eligibility check. A position
    /// that is over max leverage but still solvent is rerouted to a full
    /// decrease with zero collateral delta instead.
    pub fn liquidate_position(
        &mut self,
        liquidator: AccountId,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        side: Side,
    ) -> Result<(), VaultError> {
        if self.params.in_private_liquidation_mode {
            self.require_role(liquidator, crate::access::Role::Liquidator)?;
        }

        self.include_amm_price = false;
        let result =
            self.liquidate_with_oracle_price(liquidator, account, collateral_token, index_token, side);
        self.include_amm_price = true;
        result
    }

    fn liquidate_with_oracle_price(
        &mut self,
        liquidator: AccountId,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        side: Side,
    ) -> Result<(), VaultError> {
        self.update_cumulative_funding_rate(collateral_token)?;

        let key = PositionKey::new(account, collateral_token, index_token, side);
        let check = self.policy.validate_liquidation(self, &key, false)?;

        match check.state {
            LiquidationState::Healthy => Err(VaultError::PositionNotLiquidatable),
            LiquidationState::MaxLeverage => {
                // solvent but over-levered: close it out, proceeds to the trader
                let size = self.positions[&key].size;
                self.decrease_position(
                    account,
                    collateral_token,
                    index_token,
                    Usd::zero(),
                    size,
                    side,
                    account,
                )?;
                Ok(())
            }
            LiquidationState::Liquidatable => {
                let position = self.positions[&key].clone();
                let margin_fees = check.margin_fees;
                let fee_tokens = self.usd_to_token_min(collateral_token, margin_fees)?;
                let liq_fee_tokens =
                    self.usd_to_token_min(collateral_token, self.fee_params.liquidation_fee_usd)?;
                let mark_price = match side {
                    Side::Long => self.min_price(index_token)?,
                    Side::Short => self.max_price(index_token)?,
                };

                // pre-check the pool arithmetic the commit below will perform
                {
                    let state = &self.state[&collateral_token];
                    if position.reserve_amount > state.reserved_amount {
                        return Err(VaultError::InsufficientReserve {
                            token: collateral_token,
                            requested: position.reserve_amount,
                            reserved: state.reserved_amount,
                        });
                    }
                    let mut pool = state.pool_amount;
                    if side.is_long() {
                        let needed = fee_tokens.add(liq_fee_tokens);
                        if needed > pool {
                            return Err(VaultError::InsufficientPoolAmount {
                                token: collateral_token,
                                requested: needed,
                                available: pool,
                            });
                        }
                        pool = pool.sub(needed);
                    } else {
                        if margin_fees < position.collateral {
                            let remaining = position.collateral.sub(margin_fees);
                            pool = pool.add(self.usd_to_token_min(collateral_token, remaining)?);
                        }
                        if liq_fee_tokens > pool {
                            return Err(VaultError::InsufficientPoolAmount {
                                token: collateral_token,
                                requested: liq_fee_tokens,
                                available: pool,
                            });
                        }
                        pool = pool.sub(liq_fee_tokens);
                    }
                    let reserved = state.reserved_amount.sub(position.reserve_amount);
                    if reserved > pool {
                        return Err(VaultError::ReserveExceedsPool {
                            token: collateral_token,
                            reserved,
                            pool,
                        });
                    }
                }

                self.collect_margin_fee_tokens(collateral_token, margin_fees, fee_tokens);
                self.decrease_reserved(collateral_token, position.reserve_amount)?;

                if side.is_long() {
                    self.decrease_guaranteed_usd(
                        collateral_token,
                        position.size.sub(position.collateral),
                    );
                    self.decrease_pool(collateral_token, fee_tokens)?;
                } else {
                    // whatever collateral the fees did not consume stays with the pool
                    if margin_fees < position.collateral {
                        let remaining = position.collateral.sub(margin_fees);
                        let remaining_tokens =
                            self.usd_to_token_min(collateral_token, remaining)?;
                        self.increase_pool(collateral_token, remaining_tokens)?;
                    }
                    self.decrease_global_short_size(index_token, position.size);
                }

                self.positions.remove(&key);

                self.emit_event(EventPayload::LiquidatePosition(LiquidatePositionEvent {
                    account,
                    collateral_token,
                    index_token,
                    side,
                    size: position.size,
                    collateral: position.collateral,
                    mark_price,
                    margin_fees,
                    liquidator,
                }));

                // flat liquidation reward, paid out of the pool
                self.decrease_pool(collateral_token, liq_fee_tokens)?;
                self.transfer_out(collateral_token, liq_fee_tokens)?;
                Ok(())
            }
        }
    }

    /// Unrealized pnl of a position, marked at the protocol-worst price.
    pub fn get_position_delta(&self, key: &PositionKey) -> Result<PositionDelta, VaultError> {
        let position = self.get_position(key).ok_or(VaultError::PositionNotFound)?;
        let mark = match key.side {
            Side::Long => self.min_price(key.index_token)?,
            Side::Short => self.max_price(key.index_token)?,
        };
        self.mark_delta(key, position, mark)
    }

    fn mark_delta(
        &self,
        key: &PositionKey,
        position: &Position,
        mark: Price,
    ) -> Result<PositionDelta, VaultError> {
        let config = self
            .tokens
            .get(&key.index_token)
            .ok_or(VaultError::TokenNotWhitelisted(key.index_token))?;
        Ok(position_delta(
            position.size,
            position.average_price,
            mark,
            key.side,
            config.min_profit_bps,
            self.params.min_profit_time_ms,
            position.last_increased_time,
            self.current_time,
        ))
    }

    // settle pnl and the explicit collateral withdrawal against the position,
    // with the documented precedence: pnl first, then collateral delta, then
    // the fee - taken from usd_out when it covers it, clawed from remaining
    // collateral otherwise
    fn reduce_collateral(
        &self,
        key: &PositionKey,
        position: &mut Position,
        collateral_delta: Usd,
        size_delta: Usd,
        price: Price,
    ) -> Result<ReducedCollateral, VaultError> {
        let fee = self
            .policy
            .funding_fee(
                self,
                key.collateral_token,
                position.size,
                position.entry_funding_rate,
            )
            .add(self.policy.position_fee(self, size_delta));

        let delta = self.mark_delta(key, position, price)?;
        let adjusted_delta = Usd::new(
            size_delta.value() * delta.delta.value() / position.size.value(),
        );

        let mut usd_out = Usd::zero();
        let mut short_pool_delta = None;

        if delta.has_profit && !adjusted_delta.is_zero() {
            usd_out = adjusted_delta;
            position.realised_pnl = position.realised_pnl.add(adjusted_delta);
            // short profits are paid out of the pool
            if !key.side.is_long() {
                let tokens = self.usd_to_token_min(key.collateral_token, adjusted_delta)?;
                short_pool_delta = Some((false, tokens));
            }
        }
        if !delta.has_profit && !adjusted_delta.is_zero() {
            if adjusted_delta > position.collateral {
                return Err(VaultError::LossesExceedCollateral {
                    losses: adjusted_delta,
                    collateral: position.collateral,
                });
            }
            position.collateral = position.collateral.sub(adjusted_delta);
            // short losses accrue to the pool
            if !key.side.is_long() {
                let tokens = self.usd_to_token_min(key.collateral_token, adjusted_delta)?;
                short_pool_delta = Some((true, tokens));
            }
            position.realised_pnl = position.realised_pnl.sub(adjusted_delta);
        }

        if !collateral_delta.is_zero() {
            if collateral_delta > position.collateral {
                return Err(VaultError::PositionCollateralExceeded {
                    collateral: position.collateral,
                    collateral_delta,
                });
            }
            usd_out = usd_out.add(collateral_delta);
            position.collateral = position.collateral.sub(collateral_delta);
        }

        if size_delta == position.size {
            usd_out = usd_out.add(position.collateral);
            position.collateral = Usd::zero();
        }

        let usd_out_after_fee = if usd_out > fee {
            usd_out.sub(fee)
        } else {
            if fee > position.collateral {
                return Err(VaultError::InsufficientCollateralForFees {
                    fee,
                    collateral: position.collateral,
                });
            }
            position.collateral = position.collateral.sub(fee);
            usd_out
        };

        Ok(ReducedCollateral {
            usd_out,
            usd_out_after_fee,
            fee,
            short_pool_delta,
        })
    }

    fn collect_margin_fee_tokens(&mut self, token: Token, fee_usd: Usd, fee_tokens: Amount) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.fee_reserves = state.fee_reserves.add(fee_tokens);
        self.emit_event(EventPayload::CollectMarginFees(CollectMarginFeesEvent {
            token,
            fee_usd,
            fee_tokens,
        }));
    }
}
