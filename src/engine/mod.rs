// 8.0: spot market engine. one SpotMarket per market, driven by order
// commands and ticks. deterministic and event-driven with no external I/O.
//
//   8.1  core.rs: the aggregate and its accessors
//   8.2  orders.rs, trades.rs: submission, matching outcomes, fees
//   8.5  pegged.rs: pegged pricing and parking
//   8.7  amend.rs, cancel.rs: amendments and cancellation
//   8.8  auction.rs: auction entry/exit and governance
//   8.9  tick.rs, pap.rs: time driven work, automated purchase
//   8.11 stops.rs: stop order submission, triggering and expiry
//   8.10 state.rs: snapshots

mod amend;
mod auction;
mod cancel;
mod config;
mod core;
mod orders;
mod pap;
mod pegged;
mod results;
mod state;
mod stops;
mod tick;
mod trades;

#[cfg(test)]
mod tests;

pub use config::ExecutionConfig;
pub use core::SpotMarket;
pub use results::{MarketError, MarketSummary};
