// 8.0.2: result types and errors for market operations.

use crate::auction::{AuctionError, MarketState, TradingMode};
use crate::collateral::CollateralError;
use crate::config::ConfigError;
use crate::fee::FeeError;
use crate::holding::HoldingError;
use crate::matching::MatchingError;
use crate::order::OrderError;
use crate::pap::PapError;
use crate::price_monitor::PriceMonitorError;
use crate::snapshot::SnapshotError;
use crate::stop_orders::StopOrderError;
use crate::types::MarketId;
use rust_decimal::Decimal;

/// Point-in-time view of a market, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSummary {
    pub market_id: MarketId,
    pub state: MarketState,
    pub trading_mode: TradingMode,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_traded_price: Option<Decimal>,
    pub orders: usize,
    pub parked_orders: usize,
    pub market_value_proxy: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Order rejected: {0}")]
    Order(#[from] OrderError),

    #[error("Cannot {operation} while the market is {state}")]
    InvalidState { state: MarketState, operation: &'static str },

    #[error("Holding error: {0}")]
    Holding(#[from] HoldingError),

    #[error("Collateral error: {0}")]
    Collateral(#[from] CollateralError),

    #[error("Fee error: {0}")]
    Fee(#[from] FeeError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error("Auction error: {0}")]
    Auction(#[from] AuctionError),

    #[error("Price monitor error: {0}")]
    PriceMonitor(#[from] PriceMonitorError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Stop order rejected: {0}")]
    StopOrder(#[from] StopOrderError),

    #[error("Automated purchase error: {0}")]
    AutomatedPurchase(#[from] PapError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
