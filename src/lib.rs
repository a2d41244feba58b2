// vault-core: pooled-liquidity perpetual exchange engine.
// invariant-first accounting: reserve/pool/collateral checks run on every mutation.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Token, AccountId, Price, Usd, Amount, Bps
//   2.x  order_book.rs: resting swap/increase/decrease trigger orders
//   3.x  position_router.rs: delayed request queues, keeper batch executor
//   4.x  position.rs: position record, pnl-adjusted average price math
//   5.x  fees.rs: dynamic rebalancing fee curve, funding accrual
//   6.x  policy.rs: swappable validation/fee policy, liquidation tri-state
//   7.x  router.rs: plugin registration and per-account approvals
//   8.x  vault/: the core engine: pool, funding, positions, swaps
//   9.x  price_feed.rs: oracle aggregation: rounds, amm blend, stable clamp
//   10.x access.rs: capability-set access control
//   11.x events.rs: state transition events for audit
//   12.x config.rs: parameter aggregation, presets

// core accounting modules
pub mod fees;
pub mod position;
pub mod types;
pub mod vault;

// policy and access modules
pub mod access;
pub mod policy;
pub mod router;

// order-flow modules
pub mod order_book;
pub mod position_router;

// integration modules
pub mod config;
pub mod events;
pub mod price_feed;

// re exports for convenience
pub use access::*;
pub use events::*;
pub use fees::*;
pub use order_book::*;
pub use policy::*;
pub use position::*;
pub use position_router::*;
pub use price_feed::*;
pub use router::*;
pub use types::*;
pub use vault::*;
pub use config::{ConfigError, EngineConfig, KeeperConfig};
