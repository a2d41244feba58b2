// 2.0: resting limit/trigger orders. three variants (swap, increase, decrease)
// stored per account in append-only arrays; executed or cancelled slots become
// permanent tombstones so an index is never reused. keepers execute against the
// current oracle price and a failed trigger check is a hard error, never a
// partial fill.

use crate::events::{EventPayload, ExecuteOrderEvent, OrderEvent, OrderKind};
use crate::router::Router;
use crate::types::{AccountId, Amount, Price, Side, Timestamp, Token, Usd};
use crate::vault::{Vault, VaultError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum OrderError {
    #[error("order ({account:?}, {index}) does not exist")]
    OrderNotFound { account: AccountId, index: u64 },

    #[error("execution fee {provided} is below the {minimum} minimum")]
    InsufficientExecutionFee { provided: Amount, minimum: Amount },

    #[error("swap path must hold 2 or 3 distinct tokens")]
    InvalidPath,

    #[error("current price {current} does not satisfy trigger {trigger}")]
    InvalidPriceForExecution { current: Decimal, trigger: Decimal },

    #[error("swap produced {amount_out}, below the {min_out} minimum")]
    SlippageExceeded { amount_out: Amount, min_out: Amount },

    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapOrder {
    pub account: AccountId,
    pub path: Vec<Token>,
    pub amount_in: Amount,
    pub min_out: Amount,
    // trigger ratio of last-token price over first-token price
    pub trigger_ratio: Decimal,
    pub trigger_above_threshold: bool,
    pub execution_fee: Amount,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncreaseOrder {
    pub account: AccountId,
    pub purchase_token: Token,
    pub purchase_amount: Amount,
    pub collateral_token: Token,
    pub index_token: Token,
    pub size_delta: Usd,
    pub side: Side,
    pub trigger_price: Price,
    pub trigger_above_threshold: bool,
    pub execution_fee: Amount,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecreaseOrder {
    pub account: AccountId,
    pub collateral_token: Token,
    pub collateral_delta: Usd,
    pub index_token: Token,
    pub size_delta: Usd,
    pub side: Side,
    pub trigger_price: Price,
    pub trigger_above_threshold: bool,
    pub execution_fee: Amount,
    pub created_at: Timestamp,
}

/// Resting-order store. Executions route position changes through the router
/// under this book's own plugin identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    // plugin identity used for router-delegated position calls
    address: AccountId,
    min_execution_fee: Amount,
    swap_orders: HashMap<AccountId, Vec<Option<SwapOrder>>>,
    increase_orders: HashMap<AccountId, Vec<Option<IncreaseOrder>>>,
    decrease_orders: HashMap<AccountId, Vec<Option<DecreaseOrder>>>,
}

impl OrderBook {
    pub fn new(address: AccountId, min_execution_fee: Amount) -> Self {
        Self {
            address,
            min_execution_fee,
            swap_orders: HashMap::new(),
            increase_orders: HashMap::new(),
            decrease_orders: HashMap::new(),
        }
    }

    pub fn address(&self) -> AccountId {
        self.address
    }

    fn validate_execution_fee(&self, fee: Amount) -> Result<(), OrderError> {
        if fee < self.min_execution_fee {
            return Err(OrderError::InsufficientExecutionFee {
                provided: fee,
                minimum: self.min_execution_fee,
            });
        }
        Ok(())
    }

    // --- swap orders ---

    pub fn create_swap_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        path: Vec<Token>,
        amount_in: Amount,
        min_out: Amount,
        trigger_ratio: Decimal,
        trigger_above_threshold: bool,
        execution_fee: Amount,
    ) -> Result<u64, OrderError> {
        self.validate_execution_fee(execution_fee)?;
        validate_path(&path)?;
        if amount_in.is_zero() {
            return Err(OrderError::Vault(VaultError::ZeroAmount));
        }

        let order = SwapOrder {
            account,
            path,
            amount_in,
            min_out,
            trigger_ratio,
            trigger_above_threshold,
            execution_fee,
            created_at: vault.time(),
        };
        let slots = self.swap_orders.entry(account).or_default();
        let index = slots.len() as u64;
        slots.push(Some(order));
        vault.emit_event(EventPayload::CreateOrder(OrderEvent {
            account,
            kind: OrderKind::Swap,
            index,
        }));
        Ok(index)
    }

    pub fn update_swap_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
        min_out: Amount,
        trigger_ratio: Decimal,
        trigger_above_threshold: bool,
    ) -> Result<(), OrderError> {
        let order = live_order_mut(&mut self.swap_orders, account, index)?;
        order.min_out = min_out;
        order.trigger_ratio = trigger_ratio;
        order.trigger_above_threshold = trigger_above_threshold;
        vault.emit_event(EventPayload::UpdateOrder(OrderEvent {
            account,
            kind: OrderKind::Swap,
            index,
        }));
        Ok(())
    }

    /// Cancel and tombstone. The principal and execution fee are refunded
    /// verbatim; the returned order records what went back.
    pub fn cancel_swap_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
    ) -> Result<SwapOrder, OrderError> {
        let order = take_order(&mut self.swap_orders, account, index)?;
        vault.emit_event(EventPayload::CancelOrder(OrderEvent {
            account,
            kind: OrderKind::Swap,
            index,
        }));
        Ok(order)
    }

    pub fn get_swap_order(&self, account: AccountId, index: u64) -> Option<&SwapOrder> {
        get_order(&self.swap_orders, account, index)
    }

    pub fn execute_swap_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
        _fee_receiver: AccountId,
    ) -> Result<Amount, OrderError> {
        let order = get_order(&self.swap_orders, account, index)
            .cloned()
            .ok_or(OrderError::OrderNotFound { account, index })?;

        // min_out already bounds the execution price for trigger-below orders
        if order.trigger_above_threshold {
            let current = swap_ratio(vault, &order.path)?;
            if current <= order.trigger_ratio {
                return Err(OrderError::InvalidPriceForExecution {
                    current,
                    trigger: order.trigger_ratio,
                });
            }
        }

        let snapshot = vault.snapshot();
        let result = run_swap_path(vault, account, &order.path, order.amount_in);
        let amount_out = match result {
            Ok(out) => out,
            Err(err) => {
                vault.restore(snapshot);
                return Err(err);
            }
        };
        if amount_out < order.min_out {
            vault.restore(snapshot);
            return Err(OrderError::SlippageExceeded {
                amount_out,
                min_out: order.min_out,
            });
        }

        let execution_price = Price::new_unchecked(swap_ratio(vault, &order.path)?);
        tombstone(&mut self.swap_orders, account, index);
        vault.emit_event(EventPayload::ExecuteOrder(ExecuteOrderEvent {
            account,
            kind: OrderKind::Swap,
            index,
            execution_price,
        }));
        Ok(amount_out)
    }

    // --- increase orders ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_increase_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        purchase_token: Token,
        purchase_amount: Amount,
        collateral_token: Token,
        index_token: Token,
        size_delta: Usd,
        side: Side,
        trigger_price: Price,
        trigger_above_threshold: bool,
        execution_fee: Amount,
    ) -> Result<u64, OrderError> {
        self.validate_execution_fee(execution_fee)?;
        if purchase_amount.is_zero() {
            return Err(OrderError::Vault(VaultError::ZeroAmount));
        }
        vault.validate_whitelisted(purchase_token)?;

        let order = IncreaseOrder {
            account,
            purchase_token,
            purchase_amount,
            collateral_token,
            index_token,
            size_delta,
            side,
            trigger_price,
            trigger_above_threshold,
            execution_fee,
            created_at: vault.time(),
        };
        let slots = self.increase_orders.entry(account).or_default();
        let index = slots.len() as u64;
        slots.push(Some(order));
        vault.emit_event(EventPayload::CreateOrder(OrderEvent {
            account,
            kind: OrderKind::Increase,
            index,
        }));
        Ok(index)
    }

    pub fn update_increase_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
        size_delta: Usd,
        trigger_price: Price,
        trigger_above_threshold: bool,
    ) -> Result<(), OrderError> {
        let order = live_order_mut(&mut self.increase_orders, account, index)?;
        order.size_delta = size_delta;
        order.trigger_price = trigger_price;
        order.trigger_above_threshold = trigger_above_threshold;
        vault.emit_event(EventPayload::UpdateOrder(OrderEvent {
            account,
            kind: OrderKind::Increase,
            index,
        }));
        Ok(())
    }

    pub fn cancel_increase_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
    ) -> Result<IncreaseOrder, OrderError> {
        let order = take_order(&mut self.increase_orders, account, index)?;
        vault.emit_event(EventPayload::CancelOrder(OrderEvent {
            account,
            kind: OrderKind::Increase,
            index,
        }));
        Ok(order)
    }

    pub fn get_increase_order(&self, account: AccountId, index: u64) -> Option<&IncreaseOrder> {
        get_order(&self.increase_orders, account, index)
    }

    pub fn execute_increase_order(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        account: AccountId,
        index: u64,
        _fee_receiver: AccountId,
    ) -> Result<(), OrderError> {
        let order = get_order(&self.increase_orders, account, index)
            .cloned()
            .ok_or(OrderError::OrderNotFound { account, index })?;

        // increase orders execute at the protocol-worst side for their direction
        let execution_price = validate_position_order_price(
            vault,
            order.trigger_above_threshold,
            order.trigger_price,
            order.index_token,
            order.side.is_long(),
        )?;

        let snapshot = vault.snapshot();
        let result = (|| -> Result<(), OrderError> {
            let collateral_amount = if order.purchase_token != order.collateral_token {
                vault.swap(
                    order.account,
                    order.purchase_token,
                    order.collateral_token,
                    order.purchase_amount,
                )?
            } else {
                order.purchase_amount
            };
            router.plugin_increase_position(
                vault,
                self.address,
                order.account,
                order.collateral_token,
                order.index_token,
                collateral_amount,
                order.size_delta,
                order.side,
            )?;
            Ok(())
        })();
        if let Err(err) = result {
            vault.restore(snapshot);
            return Err(err);
        }

        tombstone(&mut self.increase_orders, account, index);
        vault.emit_event(EventPayload::ExecuteOrder(ExecuteOrderEvent {
            account,
            kind: OrderKind::Increase,
            index,
            execution_price,
        }));
        Ok(())
    }

    // --- decrease orders ---

    #[allow(clippy::too_many_arguments)]
    pub fn create_decrease_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        collateral_token: Token,
        collateral_delta: Usd,
        index_token: Token,
        size_delta: Usd,
        side: Side,
        trigger_price: Price,
        trigger_above_threshold: bool,
        execution_fee: Amount,
    ) -> Result<u64, OrderError> {
        self.validate_execution_fee(execution_fee)?;

        let order = DecreaseOrder {
            account,
            collateral_token,
            collateral_delta,
            index_token,
            size_delta,
            side,
            trigger_price,
            trigger_above_threshold,
            execution_fee,
            created_at: vault.time(),
        };
        let slots = self.decrease_orders.entry(account).or_default();
        let index = slots.len() as u64;
        slots.push(Some(order));
        vault.emit_event(EventPayload::CreateOrder(OrderEvent {
            account,
            kind: OrderKind::Decrease,
            index,
        }));
        Ok(index)
    }

    pub fn update_decrease_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
        collateral_delta: Usd,
        size_delta: Usd,
        trigger_price: Price,
        trigger_above_threshold: bool,
    ) -> Result<(), OrderError> {
        let order = live_order_mut(&mut self.decrease_orders, account, index)?;
        order.collateral_delta = collateral_delta;
        order.size_delta = size_delta;
        order.trigger_price = trigger_price;
        order.trigger_above_threshold = trigger_above_threshold;
        vault.emit_event(EventPayload::UpdateOrder(OrderEvent {
            account,
            kind: OrderKind::Decrease,
            index,
        }));
        Ok(())
    }

    pub fn cancel_decrease_order(
        &mut self,
        vault: &mut Vault,
        account: AccountId,
        index: u64,
    ) -> Result<DecreaseOrder, OrderError> {
        let order = take_order(&mut self.decrease_orders, account, index)?;
        vault.emit_event(EventPayload::CancelOrder(OrderEvent {
            account,
            kind: OrderKind::Decrease,
            index,
        }));
        Ok(order)
    }

    pub fn get_decrease_order(&self, account: AccountId, index: u64) -> Option<&DecreaseOrder> {
        get_order(&self.decrease_orders, account, index)
    }

    pub fn execute_decrease_order(
        &mut self,
        vault: &mut Vault,
        router: &Router,
        account: AccountId,
        index: u64,
        _fee_receiver: AccountId,
    ) -> Result<Amount, OrderError> {
        let order = get_order(&self.decrease_orders, account, index)
            .cloned()
            .ok_or(OrderError::OrderNotFound { account, index })?;

        let execution_price = validate_position_order_price(
            vault,
            order.trigger_above_threshold,
            order.trigger_price,
            order.index_token,
            !order.side.is_long(),
        )?;

        let amount_out = router.plugin_decrease_position(
            vault,
            self.address,
            order.account,
            order.collateral_token,
            order.index_token,
            order.collateral_delta,
            order.size_delta,
            order.side,
            order.account,
        )?;

        tombstone(&mut self.decrease_orders, account, index);
        vault.emit_event(EventPayload::ExecuteOrder(ExecuteOrderEvent {
            account,
            kind: OrderKind::Decrease,
            index,
            execution_price,
        }));
        Ok(amount_out)
    }
}

// ratio of the last path token's max price over the first's min price
fn swap_ratio(vault: &Vault, path: &[Token]) -> Result<Decimal, OrderError> {
    let token_a = path[0];
    let token_b = *path.last().expect("path validated non-empty");
    let price_a = vault.min_price(token_a)?;
    let price_b = vault.max_price(token_b)?;
    Ok(price_b.value() / price_a.value())
}

fn run_swap_path(
    vault: &mut Vault,
    account: AccountId,
    path: &[Token],
    amount_in: Amount,
) -> Result<Amount, OrderError> {
    let mut amount = amount_in;
    for pair in path.windows(2) {
        amount = vault.swap(account, pair[0], pair[1], amount)?;
    }
    Ok(amount)
}

fn validate_position_order_price(
    vault: &Vault,
    trigger_above_threshold: bool,
    trigger_price: Price,
    index_token: Token,
    maximize: bool,
) -> Result<Price, OrderError> {
    let current = if maximize {
        vault.max_price(index_token)?
    } else {
        vault.min_price(index_token)?
    };
    let valid = if trigger_above_threshold {
        current.value() > trigger_price.value()
    } else {
        current.value() < trigger_price.value()
    };
    if !valid {
        return Err(OrderError::InvalidPriceForExecution {
            current: current.value(),
            trigger: trigger_price.value(),
        });
    }
    Ok(current)
}

fn validate_path(path: &[Token]) -> Result<(), OrderError> {
    if path.len() < 2 || path.len() > 3 {
        return Err(OrderError::InvalidPath);
    }
    for pair in path.windows(2) {
        if pair[0] == pair[1] {
            return Err(OrderError::InvalidPath);
        }
    }
    Ok(())
}

fn get_order<T>(
    store: &HashMap<AccountId, Vec<Option<T>>>,
    account: AccountId,
    index: u64,
) -> Option<&T> {
    store
        .get(&account)
        .and_then(|slots| slots.get(index as usize))
        .and_then(|slot| slot.as_ref())
}

fn live_order_mut<T>(
    store: &mut HashMap<AccountId, Vec<Option<T>>>,
    account: AccountId,
    index: u64,
) -> Result<&mut T, OrderError> {
    store
        .get_mut(&account)
        .and_then(|slots| slots.get_mut(index as usize))
        .and_then(|slot| slot.as_mut())
        .ok_or(OrderError::OrderNotFound { account, index })
}

// executing or cancelling twice is a no-op error the second time: the slot
// stays None forever and the index is never reissued
fn take_order<T>(
    store: &mut HashMap<AccountId, Vec<Option<T>>>,
    account: AccountId,
    index: u64,
) -> Result<T, OrderError> {
    store
        .get_mut(&account)
        .and_then(|slots| slots.get_mut(index as usize))
        .and_then(|slot| slot.take())
        .ok_or(OrderError::OrderNotFound { account, index })
}

fn tombstone<T>(store: &mut HashMap<AccountId, Vec<Option<T>>>, account: AccountId, index: u64) {
    if let Some(slots) = store.get_mut(&account) {
        if let Some(slot) = slots.get_mut(index as usize) {
            *slot = None;
        }
    }
}
