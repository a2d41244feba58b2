// 8.4: cumulative funding rate accrual per collateral token.

use crate::events::{EventPayload, UpdateFundingRateEvent};
use crate::fees::next_funding_rate;
use crate::types::Token;
use crate::vault::core::Vault;
use crate::vault::results::VaultError;

impl Vault {
    /// Accrue funding for a collateral token up to the current time. Rates
    /// accrue once per fully elapsed interval, scaled by pool utilization;
    /// the last funding time is floored to an interval boundary so partial
    /// intervals carry over.
    pub fn update_cumulative_funding_rate(&mut self, token: Token) -> Result<(), VaultError> {
        self.validate_whitelisted(token)?;

        let interval = self.funding_params.funding_interval_ms;
        let now = self.current_time.as_millis();
        let is_stable = self.tokens[&token].is_stable;
        let factor = if is_stable {
            self.funding_params.stable_funding_rate_factor
        } else {
            self.funding_params.funding_rate_factor
        };

        let state = self.state.get_mut(&token).expect("token state must exist");

        if state.last_funding_time.as_millis() == 0 {
            state.last_funding_time = crate::types::Timestamp::from_millis(now / interval * interval);
            return Ok(());
        }

        if state.last_funding_time.as_millis() + interval > now {
            return Ok(());
        }

        let rate = next_funding_rate(
            state.reserved_amount.value(),
            state.pool_amount.value(),
            state.last_funding_time.as_millis(),
            now,
            interval,
            factor,
        );
        state.cumulative_funding_rate += rate;
        state.last_funding_time = crate::types::Timestamp::from_millis(now / interval * interval);

        let cumulative = state.cumulative_funding_rate;
        self.emit_event(EventPayload::UpdateFundingRate(UpdateFundingRateEvent {
            token,
            cumulative_funding_rate: cumulative,
        }));
        Ok(())
    }
}
