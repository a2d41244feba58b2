// 3.0: delayed position requests. intents are queued with a block/time snapshot
// and executed or cancelled by keepers after a minimum delay, which blunts
// single-block front-running. the batch executor walks from a persisted cursor,
// resolves what it can, and stops at the first entry that is not ripe yet.

use crate::access::Role;
use crate::events::{EventPayload, PositionRequestEvent, RequestKind};
use crate::router::Router;
use crate::types::{AccountId, Amount, Price, Side, Timestamp, Token, Usd};
use crate::vault::{Vault, VaultError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RequestError {
    #[error("request {0} does not exist")]
    RequestNotFound(u64),

    #[error("execution fee {provided} is below the {minimum} minimum")]
    InsufficientExecutionFee { provided: Amount, minimum: Amount },

    #[error("request {0} has not passed its minimum delay")]
    NotYetExecutable(u64),

    #[error("request {0} is older than the maximum delay and can only be cancelled")]
    Expired(u64),

    #[error("account {0:?} may not act on this request")]
    Forbidden(AccountId),

    #[error("mark price {mark} is outside the acceptable price {acceptable}")]
    PriceNotAcceptable { mark: Decimal, acceptable: Decimal },

    #[error("swap produced {amount_out}, below the {min_out} minimum")]
    SlippageExceeded { amount_out: Amount, min_out: Amount },

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncreaseRequest {
    pub account: AccountId,
    pub token_in: Token,
    pub collateral_token: Token,
    pub index_token: Token,
    pub amount_in: Amount,
    pub min_out: Amount,
    pub size_delta: Usd,
    pub side: Side,
    // worst acceptable execution price for the index token
    pub acceptable_price: Price,
    pub execution_fee: Amount,
    pub block_number: u64,
    pub block_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecreaseRequest {
    pub account: AccountId,
    pub collateral_token: Token,
    pub index_token: Token,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub side: Side,
    pub receiver: AccountId,
    pub acceptable_price: Price,
    pub execution_fee: Amount,
    pub block_number: u64,
    pub block_time: Timestamp,
}

/// FIFO queues of position intents plus the keeper batch executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRouter {
    // plugin identity used for router-delegated position calls
    address: AccountId,
    min_execution_fee: Amount,
    // a keeper may act this many blocks after creation
    min_block_delay_keeper: u64,
    // the request owner may act this long after creation
    min_time_delay_public_ms: i64,
    // past this age execution reverts; only cancellation remains
    max_time_delay_ms: i64,
    increase_requests: Vec<Option<IncreaseRequest>>,
    increase_start: usize,
    decrease_requests: Vec<Option<DecreaseRequest>>,
    decrease_start: usize,
}

impl PositionRouter {
    pub fn new(
        address: AccountId,
        min_execution_fee: Amount,
        min_block_delay_keeper: u64,
        min_time_delay_public_ms: i64,
        max_time_delay_ms: i64,
    ) -> Self {
        Self {
            address,
            min_execution_fee,
            min_block_delay_keeper,
            min_time_delay_public_ms,
            max_time_delay_ms,
            increase_requests: Vec::new(),
            increase_start: 0,
            decrease_requests: Vec::new(),
            decrease_start: 0,
        }
    }

    pub fn with_config(address: AccountId, config: &crate::config::KeeperConfig) -> Self {
        Self::new(
            address,
            config.min_execution_fee,
            config.min_block_delay_keeper,
            config.min_time_delay_public_ms,
            config.max_time_delay_ms,
        )
    }

    pub fn address(&self) -> AccountId {
        self.address
    }

    pub fn increase_cursor(&self) -> usize {
        self.increase_start
    }

    pub fn decrease_cursor(&self) -> usize {
        self.decrease_start
    }

    pub fn increase_queue_len(&self) -> usize {
        self.increase_requests.len()
    }

    pub fn decrease_queue_len(&self) -> usize {
        self.decrease_requests.len()
    }

    pub fn get_increase_request(&self, index: u64) -> Option<&IncreaseRequest> {
        self.increase_requests
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
    }

    pub fn get_decrease_request(&self, index: u64) -> Option<&DecreaseRequest> {
        self.decrease_requests
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
    }

    fn validate_execution_fee(&self, fee: Amount) -> Result<(), RequestError> {
        if fee < self.min_execution_fee {
            return Err(RequestError::InsufficientExecutionFee {
                provided: fee,
                minimum: self.min_execution_fee,
            });
        }
        Ok(())
    }

    // --- creation ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_increase_position(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        token_in: Token,
        collateral_token: Token,
        index_token: Token,
        amount_in: Amount,
        min_out: Amount,
        size_delta: Usd,
        side: Side,
        acceptable_price: Price,
        execution_fee: Amount,
    ) -> Result<u64, RequestError> {
        self.validate_execution_fee(execution_fee)?;
        if amount_in.is_zero() && size_delta.is_zero() {
            return Err(RequestError::Vault(VaultError::ZeroAmount));
        }

        let request = IncreaseRequest {
            account,
            token_in,
            collateral_token,
            index_token,
            amount_in,
            min_out,
            size_delta,
            side,
            acceptable_price,
            execution_fee,
            block_number: vault.block_number(),
            block_time: vault.time(),
        };
        let index = self.increase_requests.len() as u64;
        self.increase_requests.push(Some(request));
        vault.emit_event(EventPayload::CreatePositionRequest(PositionRequestEvent {
            account,
            kind: RequestKind::Increase,
            index,
        }));
        Ok(index)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_decrease_position(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        collateral_token: Token,
        index_token: Token,
        collateral_delta: Usd,
        size_delta: Usd,
        side: Side,
        receiver: AccountId,
        acceptable_price: Price,
        execution_fee: Amount,
    ) -> Result<u64, RequestError> {
        self.validate_execution_fee(execution_fee)?;
        if size_delta.is_zero() {
            return Err(RequestError::Vault(VaultError::ZeroAmount));
        }

        let request = DecreaseRequest {
            account,
            collateral_token,
            index_token,
            collateral_delta,
            size_delta,
            side,
            receiver,
            acceptable_price,
            execution_fee,
            block_number: vault.block_number(),
            block_time: vault.time(),
        };
        let index = self.decrease_requests.len() as u64;
        self.decrease_requests.push(Some(request));
        vault.emit_event(EventPayload::CreatePositionRequest(PositionRequestEvent {
            account,
            kind: RequestKind::Decrease,
            index,
        }));
        Ok(index)
    }

    // --- single execution / cancellation ---

    pub fn execute_increase_position(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        index: u64,
        caller: AccountId,
    ) -> Result<(), RequestError> {
        let request = self
            .get_increase_request(index)
            .cloned()
            .ok_or(RequestError::RequestNotFound(index))?;
        self.validate_execution(vault, caller, request.account, request.block_number, request.block_time, index, true)?;

        perform_increase(vault, router, self.address, &request)?;

        self.increase_requests[index as usize] = None;
        vault.emit_event(EventPayload::ExecutePositionRequest(PositionRequestEvent {
            account: request.account,
            kind: RequestKind::Increase,
            index,
        }));
        Ok(())
    }

    /// Cancel a pending increase. The principal and execution fee are refunded
    /// verbatim; the returned request records what went back.
    pub fn cancel_increase_position(
        &mut self,
        vault: &mut Vault,
        index: u64,
        caller: AccountId,
    ) -> Result<IncreaseRequest, RequestError> {
        let request = self
            .get_increase_request(index)
            .cloned()
            .ok_or(RequestError::RequestNotFound(index))?;
        self.validate_execution(vault, caller, request.account, request.block_number, request.block_time, index, false)?;

        self.increase_requests[index as usize] = None;
        vault.emit_event(EventPayload::CancelPositionRequest(PositionRequestEvent {
            account: request.account,
            kind: RequestKind::Increase,
            index,
        }));
        Ok(request)
    }

    pub fn execute_decrease_position(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        index: u64,
        caller: AccountId,
    ) -> Result<Amount, RequestError> {
        let request = self
            .get_decrease_request(index)
            .cloned()
            .ok_or(RequestError::RequestNotFound(index))?;
        self.validate_execution(vault, caller, request.account, request.block_number, request.block_time, index, true)?;

        let amount_out = perform_decrease(vault, router, self.address, &request)?;

        self.decrease_requests[index as usize] = None;
        vault.emit_event(EventPayload::ExecutePositionRequest(PositionRequestEvent {
            account: request.account,
            kind: RequestKind::Decrease,
            index,
        }));
        Ok(amount_out)
    }

    pub fn cancel_decrease_position(
        &mut self,
        vault: &mut Vault,
        index: u64,
        caller: AccountId,
    ) -> Result<DecreaseRequest, RequestError> {
        let request = self
            .get_decrease_request(index)
            .cloned()
            .ok_or(RequestError::RequestNotFound(index))?;
        self.validate_execution(vault, caller, request.account, request.block_number, request.block_time, index, false)?;

        self.decrease_requests[index as usize] = None;
        vault.emit_event(EventPayload::CancelPositionRequest(PositionRequestEvent {
            account: request.account,
            kind: RequestKind::Decrease,
            index,
        }));
        Ok(request)
    }

    // authorization by caller class: keepers wait out the block delay, the
    // request owner the public time delay. stale requests can only be cancelled.
    #[allow(clippy::too_many_arguments)]
    fn validate_execution(
        &self,
        vault: &Vault,
        caller: AccountId,
        owner: AccountId,
        request_block: u64,
        request_time: Timestamp,
        index: u64,
        is_execution: bool,
    ) -> Result<(), RequestError> {
        let now = vault.time();
        if is_execution
            && request_time.as_millis() + self.max_time_delay_ms < now.as_millis()
        {
            return Err(RequestError::Expired(index));
        }

        if vault.require_role(caller, Role::Keeper).is_ok() {
            if vault.block_number() < request_block + self.min_block_delay_keeper {
                return Err(RequestError::NotYetExecutable(index));
            }
            return Ok(());
        }

        if caller != owner {
            return Err(RequestError::Forbidden(caller));
        }
        if now.as_millis() < request_time.as_millis() + self.min_time_delay_public_ms {
            return Err(RequestError::NotYetExecutable(index));
        }
        Ok(())
    }

    // --- keeper batch execution ---

    /// Walk the increase queue from the cursor up to `end_index`, executing
    /// each entry and cancelling it if execution fails. The cursor advances
    /// only past resolved entries; the walk stops at the first entry that has
    /// not passed its keeper delay, leaving it for a later pass.
    pub fn execute_increase_positions(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        end_index: u64,
        keeper: AccountId,
    ) -> Result<(), RequestError> {
        vault.require_role(keeper, Role::Keeper)?;

        let end = (end_index as usize).min(self.increase_requests.len());
        let mut index = self.increase_start;
        while index < end {
            let Some(request) = self.increase_requests[index].clone() else {
                index += 1;
                continue;
            };

            if vault.block_number() < request.block_number + self.min_block_delay_keeper {
                break;
            }

            let resolved = if request.block_time.as_millis() + self.max_time_delay_ms
                < vault.time().as_millis()
            {
                Err(RequestError::Expired(index as u64))
            } else {
                perform_increase(vault, router, self.address, &request)
            };

            self.increase_requests[index] = None;
            let event = match resolved {
                Ok(()) => EventPayload::ExecutePositionRequest(PositionRequestEvent {
                    account: request.account,
                    kind: RequestKind::Increase,
                    index: index as u64,
                }),
                // one failing request never blocks the rest: cancel and move on
                Err(_) => EventPayload::CancelPositionRequest(PositionRequestEvent {
                    account: request.account,
                    kind: RequestKind::Increase,
                    index: index as u64,
                }),
            };
            vault.emit_event(event);
            index += 1;
        }
        self.increase_start = index;
        Ok(())
    }

    /// Decrease-side twin of [`execute_increase_positions`].
    pub fn execute_decrease_positions(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        end_index: u64,
        keeper: AccountId,
    ) -> Result<(), RequestError> {
        vault.require_role(keeper, Role::Keeper)?;

        let end = (end_index as usize).min(self.decrease_requests.len());
        let mut index = self.decrease_start;
        while index < end {
            let Some(request) = self.decrease_requests[index].clone() else {
                index += 1;
                continue;
            };

            if vault.block_number() < request.block_number + self.min_block_delay_keeper {
                break;
            }

            let resolved = if request.block_time.as_millis() + self.max_time_delay_ms
                < vault.time().as_millis()
            {
                Err(RequestError::Expired(index as u64))
            } else {
                perform_decrease(vault, router, self.address, &request).map(|_| ())
            };

            self.decrease_requests[index] = None;
            let event = match resolved {
                Ok(()) => EventPayload::ExecutePositionRequest(PositionRequestEvent {
                    account: request.account,
                    kind: RequestKind::Decrease,
                    index: index as u64,
                }),
                Err(_) => EventPayload::CancelPositionRequest(PositionRequestEvent {
                    account: request.account,
                    kind: RequestKind::Decrease,
                    index: index as u64,
                }),
            };
            vault.emit_event(event);
            index += 1;
        }
        self.decrease_start = index;
        Ok(())
    }
}

fn perform_increase(
    vault: &mut Vault,
    router: &Router,
    plugin: AccountId,
    request: &IncreaseRequest,
) -> Result<(), RequestError> {
    // longs may not pay more than the acceptable price, shorts not less
    let mark = match request.side {
        Side::Long => vault.max_price(request.index_token)?,
        Side::Short => vault.min_price(request.index_token)?,
    };
    let acceptable = match request.side {
        Side::Long => mark.value() <= request.acceptable_price.value(),
        Side::Short => mark.value() >= request.acceptable_price.value(),
    };
    if !acceptable {
        return Err(RequestError::PriceNotAcceptable {
            mark: mark.value(),
            acceptable: request.acceptable_price.value(),
        });
    }

    let snapshot = vault.snapshot();
    let result = (|| -> Result<(), RequestError> {
        let collateral_amount = if request.token_in != request.collateral_token {
            let out = vault.swap(
                request.account,
                request.token_in,
                request.collateral_token,
                request.amount_in,
            )?;
            if out < request.min_out {
                return Err(RequestError::SlippageExceeded {
                    amount_out: out,
                    min_out: request.min_out,
                });
            }
            out
        } else {
            request.amount_in
        };
        router.plugin_increase_position(
            vault,
            plugin,
            request.account,
            request.collateral_token,
            request.index_token,
            collateral_amount,
            request.size_delta,
            request.side,
        )?;
        Ok(())
    })();
    if let Err(err) = result {
        vault.restore(snapshot);
        return Err(err);
    }
    Ok(())
}

fn perform_decrease(
    vault: &mut Vault,
    router: &Router,
    plugin: AccountId,
    request: &DecreaseRequest,
) -> Result<Amount, RequestError> {
    let mark = match request.side {
        Side::Long => vault.min_price(request.index_token)?,
        Side::Short => vault.max_price(request.index_token)?,
    };
    let acceptable = match request.side {
        Side::Long => mark.value() >= request.acceptable_price.value(),
        Side::Short => mark.value() <= request.acceptable_price.value(),
    };
    if !acceptable {
        return Err(RequestError::PriceNotAcceptable {
            mark: mark.value(),
            acceptable: request.acceptable_price.value(),
        });
    }

    Ok(router.plugin_decrease_position(
        vault,
        plugin,
        request.account,
        request.collateral_token,
        request.index_token,
        request.collateral_delta,
        request.size_delta,
        request.side,
        request.receiver,
    )?)
}
