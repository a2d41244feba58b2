// 8.3: pool bookkeeping. every mutation of pool/reserved/guaranteed/liquidity
// independently re-checks its invariant (reserved <= pool, pool <= balance)
// and fails before committing. a fee-on-transfer or rebasing mismatch between
// the stated and tracked balance surfaces here, not downstream.

use crate::events::{CollectSwapFeesEvent, DirectPoolDepositEvent, EventPayload};
use crate::types::{Amount, Bps, Token, Usd, BASIS_POINTS_DIVISOR};
use crate::vault::core::Vault;
use crate::vault::results::VaultError;

impl Vault {
    // credit tokens actually received. callers pass the received amount, which
    // for a fee-on-transfer token may be less than the stated amount.
    pub(super) fn transfer_in(&mut self, token: Token, amount: Amount) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.balance = state.balance.add(amount);
    }

    pub(super) fn transfer_out(&mut self, token: Token, amount: Amount) -> Result<(), VaultError> {
        let state = self.state.get_mut(&token).expect("token state must exist");
        if amount > state.balance {
            return Err(VaultError::InsufficientBalance {
                token,
                requested: amount,
                available: state.balance,
            });
        }
        state.balance = state.balance.sub(amount);
        Ok(())
    }

    pub(super) fn increase_pool(&mut self, token: Token, amount: Amount) -> Result<(), VaultError> {
        let state = self.state.get_mut(&token).expect("token state must exist");
        let next = state.pool_amount.add(amount);
        if next > state.balance {
            return Err(VaultError::PoolExceedsBalance {
                token,
                pool: next,
                balance: state.balance,
            });
        }
        state.pool_amount = next;
        Ok(())
    }

    pub(super) fn decrease_pool(&mut self, token: Token, amount: Amount) -> Result<(), VaultError> {
        let state = self.state.get_mut(&token).expect("token state must exist");
        if amount > state.pool_amount {
            return Err(VaultError::InsufficientPoolAmount {
                token,
                requested: amount,
                available: state.pool_amount,
            });
        }
        let next = state.pool_amount.sub(amount);
        if state.reserved_amount > next {
            return Err(VaultError::ReserveExceedsPool {
                token,
                reserved: state.reserved_amount,
                pool: next,
            });
        }
        state.pool_amount = next;
        Ok(())
    }

    pub(super) fn increase_reserved(
        &mut self,
        token: Token,
        amount: Amount,
    ) -> Result<(), VaultError> {
        let state = self.state.get_mut(&token).expect("token state must exist");
        let next = state.reserved_amount.add(amount);
        if next > state.pool_amount {
            return Err(VaultError::ReserveExceedsPool {
                token,
                reserved: next,
                pool: state.pool_amount,
            });
        }
        state.reserved_amount = next;
        Ok(())
    }

    pub(super) fn decrease_reserved(
        &mut self,
        token: Token,
        amount: Amount,
    ) -> Result<(), VaultError> {
        let state = self.state.get_mut(&token).expect("token state must exist");
        if amount > state.reserved_amount {
            return Err(VaultError::InsufficientReserve {
                token,
                requested: amount,
                reserved: state.reserved_amount,
            });
        }
        state.reserved_amount = state.reserved_amount.sub(amount);
        Ok(())
    }

    pub(super) fn increase_guaranteed_usd(&mut self, token: Token, usd: Usd) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.guaranteed_usd = state.guaranteed_usd.add(usd);
    }

    pub(super) fn decrease_guaranteed_usd(&mut self, token: Token, usd: Usd) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.guaranteed_usd = state.guaranteed_usd.sub(usd);
    }

    pub(super) fn increase_liquidity_usd(
        &mut self,
        token: Token,
        usd: Usd,
    ) -> Result<(), VaultError> {
        let cap = self
            .tokens
            .get(&token)
            .map(|c| c.max_liquidity_usd)
            .unwrap_or(Usd::zero());
        let state = self.state.get_mut(&token).expect("token state must exist");
        let next = state.liquidity_usd.add(usd);
        if !cap.is_zero() && next > cap {
            return Err(VaultError::MaxLiquidityExceeded {
                token,
                liquidity: next,
                cap,
            });
        }
        state.liquidity_usd = next;
        Ok(())
    }

    // liquidity usd is an accounting estimate; draining past zero floors it
    pub(super) fn decrease_liquidity_usd(&mut self, token: Token, usd: Usd) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.liquidity_usd = if usd > state.liquidity_usd {
            Usd::zero()
        } else {
            state.liquidity_usd.sub(usd)
        };
    }

    pub(super) fn increase_global_short_size(
        &mut self,
        token: Token,
        usd: Usd,
    ) -> Result<(), VaultError> {
        let cap = self
            .tokens
            .get(&token)
            .map(|c| c.max_global_short_size)
            .unwrap_or(Usd::zero());
        let state = self.state.get_mut(&token).expect("token state must exist");
        let next = state.global_short_size.add(usd);
        if !cap.is_zero() && next > cap {
            return Err(VaultError::MaxGlobalShortsExceeded {
                token,
                size: next,
                cap,
            });
        }
        state.global_short_size = next;
        Ok(())
    }

    // the shared synthetic short is an estimate; liquidations can leave it
    // slightly over, so the decrease floors at zero
    pub(super) fn decrease_global_short_size(&mut self, token: Token, usd: Usd) {
        let state = self.state.get_mut(&token).expect("token state must exist");
        state.global_short_size = if usd > state.global_short_size {
            Usd::zero()
        } else {
            state.global_short_size.sub(usd)
        };
    }

    pub(super) fn validate_buffer(&self, token: Token) -> Result<(), VaultError> {
        let buffer = self
            .tokens
            .get(&token)
            .map(|c| c.buffer_amount)
            .unwrap_or(Amount::zero());
        let state = self.state.get(&token).expect("token state must exist");
        if state.pool_amount < buffer {
            return Err(VaultError::PoolBelowBuffer {
                token,
                pool: state.pool_amount,
                buffer,
            });
        }
        Ok(())
    }

    // take a bps fee out of a token amount, park it in fee reserves, and
    // return the remainder
    pub(super) fn collect_swap_fees(
        &mut self,
        token: Token,
        amount: Amount,
        fee_bps: Bps,
    ) -> Result<Amount, VaultError> {
        let decimals = self.decimals(token)?;
        let after_fee = Amount::new(
            amount.value() * (BASIS_POINTS_DIVISOR - fee_bps.as_decimal()) / BASIS_POINTS_DIVISOR,
        )
        .truncate(decimals);
        let fee = amount.sub(after_fee);

        let state = self.state.get_mut(&token).expect("token state must exist");
        state.fee_reserves = state.fee_reserves.add(fee);

        self.emit_event(EventPayload::CollectSwapFees(CollectSwapFeesEvent {
            token,
            fee_tokens: fee,
        }));
        Ok(after_fee)
    }

    /// Credit tokens straight into the pool without minting liquidity.
    pub fn direct_pool_deposit(&mut self, token: Token, amount: Amount) -> Result<(), VaultError> {
        self.validate_whitelisted(token)?;
        if amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        self.transfer_in(token, amount);
        self.increase_pool(token, amount)?;
        self.emit_event(EventPayload::DirectPoolDeposit(DirectPoolDepositEvent {
            token,
            amount,
        }));
        Ok(())
    }
}
