// spot-core: spot market execution core.
// funds-first architecture: every resting order is backed by a holding account.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Side, Timestamp, AssetScaling, IdGenerator
//   2.x  order.rs: orders, submissions, amendments, trades, rejection reasons
//   2.5  matching.rs: price-time order book, auction uncrossing
//   3.x  holding.rs: per-order holding account tracker
//   3.5  price_monitor.rs: price bounds and monitoring auctions
//   3.6  risk.rs: range provider for bound factors
//   4.x  fee.rs: fee engine, discounts, rebates, LP fee distribution
//   5.x  auction.rs: trading mode and auction bookkeeping
//   6.x  equity_shares.rs: LP virtual stakes and shares
//   6.5  fee_splitter.rs: traded value windows, market value proxy
//   7.x  config.rs: market settings and presets
//   8.x  engine/: the spot market: orders, auctions, ticks, snapshots
//   9.x  collateral.rs: ledger seam and in-memory ledger
//   9.3  liquidity.rs: liquidity engine seam
//   10.x pap.rs: protocol automated purchase program
//   11.x events.rs: state transition events for replicas
//   12.x snapshot.rs: component snapshot payloads
//   13.x stop_orders.rs: stop order pool, triggers and OCO links

// market modules
pub mod auction;
pub mod engine;
pub mod events;
pub mod matching;
pub mod order;
pub mod stop_orders;
pub mod types;

// funds and fee modules
pub mod collateral;
pub mod equity_shares;
pub mod fee;
pub mod fee_splitter;
pub mod holding;

// risk and safety modules
pub mod price_monitor;
pub mod risk;

// integration modules
pub mod config;
pub mod liquidity;
pub mod pap;
pub mod snapshot;

// re exports for convenience
pub use auction::*;
pub use collateral::*;
pub use engine::*;
pub use equity_shares::*;
pub use events::*;
pub use fee::*;
pub use fee_splitter::*;
pub use holding::*;
pub use matching::*;
pub use order::*;
pub use pap::*;
pub use price_monitor::*;
pub use stop_orders::*;
pub use risk::*;
pub use types::*;
pub use config::{ConfigError, Environment, MarketConfig};
pub use liquidity::{LiquidityEngine, NoopLiquidityEngine, StaticLiquidityEngine};
pub use snapshot::{SnapshotError, SnapshotPayload};
