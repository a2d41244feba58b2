// 8.6: liquidity mint/redeem and token swaps. all three run through the
// dynamic rebalancing fee curve; swaps additionally respect per-token pool
// buffers so positions can always be paid out.

use crate::access::Role;
use crate::events::{BuyLiquidityEvent, EventPayload, SellLiquidityEvent, SwapEvent};
use crate::types::{AccountId, Amount, Bps, Token, Usd, BASIS_POINTS_DIVISOR};
use crate::vault::core::Vault;
use crate::vault::results::VaultError;

impl Vault {
    /// Deposit `amount_in` of `token` into the pool, minting liquidity usd.
    /// Returns the usd value credited after fees.
    pub fn buy(&mut self, account: AccountId, token: Token, amount_in: Amount) -> Result<Usd, VaultError> {
        if self.params.in_manager_mode {
            self.require_role(account, Role::Manager)?;
        }
        self.validate_whitelisted(token)?;
        if amount_in.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        self.update_cumulative_funding_rate(token)?;

        let price = self.min_price(token)?;
        let usd_value = Usd::new(amount_in.value() * price.value());
        let fee_bps = self.policy.buy_fee_bps(self, token, usd_value);

        let decimals = self.decimals(token)?;
        let amount_after_fee = after_fee_amount(amount_in, fee_bps, decimals);
        let mint_usd = Usd::new(amount_after_fee.value() * price.value());
        if mint_usd.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        // pre-check the liquidity cap before committing
        {
            let config = &self.tokens[&token];
            let state = &self.state[&token];
            let next = state.liquidity_usd.add(mint_usd);
            if !config.max_liquidity_usd.is_zero() && next > config.max_liquidity_usd {
                return Err(VaultError::MaxLiquidityExceeded {
                    token,
                    liquidity: next,
                    cap: config.max_liquidity_usd,
                });
            }
        }

        self.transfer_in(token, amount_in);
        let amount_after_fee = self.collect_swap_fees(token, amount_in, fee_bps)?;
        self.increase_liquidity_usd(token, mint_usd)?;
        self.increase_pool(token, amount_after_fee)?;

        self.emit_event(EventPayload::BuyLiquidity(BuyLiquidityEvent {
            account,
            token,
            amount_in,
            usd_value: mint_usd,
            fee_bps,
        }));
        Ok(mint_usd)
    }

    /// Redeem `usd_amount` of pooled liquidity for `token`. Returns the tokens
    /// paid out after fees.
    pub fn sell(&mut self, account: AccountId, token: Token, usd_amount: Usd) -> Result<Amount, VaultError> {
        if self.params.in_manager_mode {
            self.require_role(account, Role::Manager)?;
        }
        self.validate_whitelisted(token)?;
        if usd_amount.is_zero() || usd_amount.is_negative() {
            return Err(VaultError::ZeroAmount);
        }
        self.update_cumulative_funding_rate(token)?;

        // redemption uses the max price, paying out the smaller token amount
        let redemption = self.usd_to_token_min(token, usd_amount)?;
        if redemption.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        let fee_bps = self.policy.sell_fee_bps(self, token, usd_amount);
        let decimals = self.decimals(token)?;
        let amount_out = after_fee_amount(redemption, fee_bps, decimals);
        if amount_out.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        // pre-check pool release before committing
        {
            let state = &self.state[&token];
            if redemption > state.pool_amount {
                return Err(VaultError::InsufficientPoolAmount {
                    token,
                    requested: redemption,
                    available: state.pool_amount,
                });
            }
            let next_pool = state.pool_amount.sub(redemption);
            if state.reserved_amount > next_pool {
                return Err(VaultError::ReserveExceedsPool {
                    token,
                    reserved: state.reserved_amount,
                    pool: next_pool,
                });
            }
        }

        self.decrease_liquidity_usd(token, usd_amount);
        self.decrease_pool(token, redemption)?;
        let amount_out = self.collect_swap_fees(token, redemption, fee_bps)?;
        self.transfer_out(token, amount_out)?;

        self.emit_event(EventPayload::SellLiquidity(SellLiquidityEvent {
            account,
            token,
            usd_value: usd_amount,
            amount_out,
            fee_bps,
        }));
        Ok(amount_out)
    }

    /// Read-only swap quote: (gross out, net out, fee bps, usd value moved).
    pub fn quote_swap(
        &self,
        token_in: Token,
        token_out: Token,
        amount_in: Amount,
    ) -> Result<(Amount, Amount, Bps, Usd), VaultError> {
        if !self.params.is_swap_enabled {
            return Err(VaultError::SwapsDisabled);
        }
        self.validate_whitelisted(token_in)?;
        self.validate_whitelisted(token_out)?;
        if token_in == token_out {
            return Err(VaultError::SameToken(token_in));
        }
        if amount_in.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        let price_in = self.min_price(token_in)?;
        let price_out = self.max_price(token_out)?;
        let decimals_out = self.decimals(token_out)?;

        let amount_out = Amount::new(amount_in.value() * price_in.value() / price_out.value())
            .truncate(decimals_out);
        let usd_value = Usd::new(amount_in.value() * price_in.value());
        let fee_bps = self.policy.swap_fee_bps(self, token_in, token_out, usd_value);
        let after_fee = after_fee_amount(amount_out, fee_bps, decimals_out);

        Ok((amount_out, after_fee, fee_bps, usd_value))
    }

    /// Swap `amount_in` of `token_in` against the pool for `token_out`.
    /// Returns the tokens paid out after fees.
    pub fn swap(
        &mut self,
        account: AccountId,
        token_in: Token,
        token_out: Token,
        amount_in: Amount,
    ) -> Result<Amount, VaultError> {
        self.update_cumulative_funding_rate(token_in)?;
        self.update_cumulative_funding_rate(token_out)?;

        let (amount_out, after_fee, fee_bps, usd_value) =
            self.quote_swap(token_in, token_out, amount_in)?;
        if after_fee.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        // pre-check the out-side pool: availability, reserve cover, and buffer
        {
            let config = &self.tokens[&token_out];
            let state = &self.state[&token_out];
            if amount_out > state.pool_amount {
                return Err(VaultError::InsufficientPoolAmount {
                    token: token_out,
                    requested: amount_out,
                    available: state.pool_amount,
                });
            }
            let next_pool = state.pool_amount.sub(amount_out);
            if state.reserved_amount > next_pool {
                return Err(VaultError::ReserveExceedsPool {
                    token: token_out,
                    reserved: state.reserved_amount,
                    pool: next_pool,
                });
            }
            if next_pool < config.buffer_amount {
                return Err(VaultError::PoolBelowBuffer {
                    token: token_out,
                    pool: next_pool,
                    buffer: config.buffer_amount,
                });
            }

            let in_config = &self.tokens[&token_in];
            let in_state = &self.state[&token_in];
            let next_liquidity = in_state.liquidity_usd.add(usd_value);
            if !in_config.max_liquidity_usd.is_zero()
                && next_liquidity > in_config.max_liquidity_usd
            {
                return Err(VaultError::MaxLiquidityExceeded {
                    token: token_in,
                    liquidity: next_liquidity,
                    cap: in_config.max_liquidity_usd,
                });
            }
        }

        self.transfer_in(token_in, amount_in);
        self.increase_liquidity_usd(token_in, usd_value)?;
        self.decrease_liquidity_usd(token_out, usd_value);
        self.increase_pool(token_in, amount_in)?;
        self.decrease_pool(token_out, amount_out)?;
        self.validate_buffer(token_out)?;

        let amount_out_after_fee = self.collect_swap_fees(token_out, amount_out, fee_bps)?;
        self.transfer_out(token_out, amount_out_after_fee)?;

        self.emit_event(EventPayload::Swap(SwapEvent {
            account,
            token_in,
            token_out,
            amount_in,
            amount_out: amount_out_after_fee,
            fee_bps,
        }));
        Ok(amount_out_after_fee)
    }
}

fn after_fee_amount(amount: Amount, fee_bps: Bps, decimals: u32) -> Amount {
    Amount::new(
        amount.value() * (BASIS_POINTS_DIVISOR - fee_bps.as_decimal()) / BASIS_POINTS_DIVISOR,
    )
    .truncate(decimals)
}
