// 8.0.2: the vault error taxonomy. every violation is a hard, atomic failure
// of the call; variants carry enough context for keeper bots to branch on why.

use crate::access::Role;
use crate::price_feed::PriceError;
use crate::types::{AccountId, Amount, Token, Usd};
use rust_decimal::Decimal;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum VaultError {
    // authorization
    #[error("account {account:?} does not hold the {role:?} role")]
    Unauthorized { account: AccountId, role: Role },

    #[error("plugin {0:?} is not registered")]
    PluginNotRegistered(AccountId),

    #[error("plugin {plugin:?} is not approved by account {account:?}")]
    PluginNotApproved {
        plugin: AccountId,
        account: AccountId,
    },

    // input validation
    #[error("token {0:?} is not whitelisted")]
    TokenNotWhitelisted(Token),

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("swap path must name two distinct tokens, got {0:?} twice")]
    SameToken(Token),

    #[error("long requires a non-stable collateral token equal to the index token, got {collateral_token:?}/{index_token:?}")]
    InvalidLongPair {
        collateral_token: Token,
        index_token: Token,
    },

    #[error("short requires a stable collateral token and a shortable non-stable index token, got {collateral_token:?}/{index_token:?}")]
    InvalidShortPair {
        collateral_token: Token,
        index_token: Token,
    },

    // feature flags and environment
    #[error("leverage trading is disabled")]
    LeverageDisabled,

    #[error("swaps are disabled")]
    SwapsDisabled,

    #[error("gas price {gas_price} exceeds the {max} ceiling")]
    GasPriceExceeded { gas_price: Decimal, max: Decimal },

    // economic invariant violations
    #[error("fees of {fee} exceed collateral of {collateral}")]
    InsufficientCollateralForFees { fee: Usd, collateral: Usd },

    #[error("losses of {losses} exceed collateral of {collateral}")]
    LossesExceedCollateral { losses: Usd, collateral: Usd },

    #[error("position size {size} must not be below collateral {collateral}")]
    SizeBelowCollateral { size: Usd, collateral: Usd },

    #[error("position with zero size cannot hold collateral")]
    CollateralWithoutSize,

    #[error("size {size} exceeds max leverage against collateral {collateral}")]
    MaxLeverageExceeded { size: Usd, collateral: Usd },

    #[error("reserved {reserved} would exceed pool {pool} for token {token:?}")]
    ReserveExceedsPool {
        token: Token,
        reserved: Amount,
        pool: Amount,
    },

    #[error("pool {pool} would exceed tracked balance {balance} for token {token:?}")]
    PoolExceedsBalance {
        token: Token,
        pool: Amount,
        balance: Amount,
    },

    #[error("pool of token {token:?} holds {available}, cannot release {requested}")]
    InsufficientPoolAmount {
        token: Token,
        requested: Amount,
        available: Amount,
    },

    #[error("pool of token {token:?} would drop to {pool}, below its {buffer} buffer")]
    PoolBelowBuffer {
        token: Token,
        pool: Amount,
        buffer: Amount,
    },

    #[error("cannot release {requested} of token {token:?}, only {reserved} reserved")]
    InsufficientReserve {
        token: Token,
        requested: Amount,
        reserved: Amount,
    },

    #[error("balance of token {token:?} holds {available}, cannot pay out {requested}")]
    InsufficientBalance {
        token: Token,
        requested: Amount,
        available: Amount,
    },

    #[error("liquidity for token {token:?} would reach {liquidity}, above the {cap} cap")]
    MaxLiquidityExceeded {
        token: Token,
        liquidity: Usd,
        cap: Usd,
    },

    #[error("global short size for token {token:?} would reach {size}, above the {cap} cap")]
    MaxGlobalShortsExceeded { token: Token, size: Usd, cap: Usd },

    #[error("position is not eligible for liquidation")]
    PositionNotLiquidatable,

    // state conflicts
    #[error("position does not exist")]
    PositionNotFound,

    #[error("size delta {size_delta} exceeds position size {size}")]
    PositionSizeExceeded { size: Usd, size_delta: Usd },

    #[error("collateral delta {collateral_delta} exceeds position collateral {collateral}")]
    PositionCollateralExceeded {
        collateral: Usd,
        collateral_delta: Usd,
    },

    // upstream price failures
    #[error(transparent)]
    Price(#[from] PriceError),
}
