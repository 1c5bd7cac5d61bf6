//! Protocol automated purchase.
//!
//! A program periodically earmarks part of a network account and, when its
//! schedule fires, turns that amount into a network order placed in a dedicated
//! auction. Oracle callbacks never touch the market directly: they are pushed
//! into a [`PapInbox`] and drained by the market on its next tick.

use crate::collateral::{AccountType, CollateralError};
use crate::fee::FeeError;
use crate::types::{hash_hex, AssetId, AssetScaling, OrderId, Side, Timestamp};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomatedPurchaseConfig {
    pub id: String,
    // Asset the program spends
    pub from_asset: AssetId,
    pub from_account_type: AccountType,
    // Where the proceeds are swept once an order finishes
    pub to_account_type: AccountType,
    pub min_auction_size: Decimal,
    pub max_auction_size: Decimal,
    // Applied to the oracle price to get the order price
    pub oracle_offset_factor: Decimal,
    pub price_staleness_tolerance_secs: i64,
    pub auction_duration_secs: i64,
    pub expiry: Option<Timestamp>,
}

impl AutomatedPurchaseConfig {
    /// Spends the network treasury, sweeping proceeds into the buy back account.
    pub fn new(id: &str, from_asset: AssetId) -> Self {
        Self {
            id: id.to_string(),
            from_asset,
            from_account_type: AccountType::NetworkTreasury,
            to_account_type: AccountType::BuyBackFees,
            min_auction_size: dec!(1),
            max_auction_size: dec!(1000),
            oracle_offset_factor: Decimal::ONE,
            price_staleness_tolerance_secs: 60,
            auction_duration_secs: 60,
            expiry: None,
        }
    }

    pub fn with_auction_size(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_auction_size = min;
        self.max_auction_size = max;
        self
    }

    pub fn with_expiry(mut self, expiry: Timestamp) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn validate(&self) -> Result<(), PapError> {
        if self.id.is_empty() {
            return Err(PapError::InvalidConfig("id must not be empty".to_string()));
        }
        if self.min_auction_size < Decimal::ZERO || self.max_auction_size < self.min_auction_size || self.max_auction_size.is_zero() {
            return Err(PapError::InvalidConfig("auction sizes must satisfy 0 <= min <= max, max > 0".to_string()));
        }
        if self.oracle_offset_factor <= Decimal::ZERO {
            return Err(PapError::InvalidConfig("oracle offset factor must be positive".to_string()));
        }
        if self.price_staleness_tolerance_secs < 0 || self.auction_duration_secs <= 0 {
            return Err(PapError::InvalidConfig("durations must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PapError {
    #[error("asset {0} is neither side of the market")]
    AssetNotInMarket(AssetId),
    #[error("invalid automated purchase config: {0}")]
    InvalidConfig(String),
    #[error("automated purchase {0} is still running")]
    AlreadyRunning(String),
    #[error("no automated purchase program")]
    NoProgram,
    #[error("an automated purchase order is already active: {0}")]
    OrderAlreadyActive(OrderId),
    #[error("market is already in auction")]
    MarketInAuction,
    #[error("no oracle price received")]
    NoPrice,
    #[error("oracle price from {published_at} is stale at {now} (tolerance {tolerance_secs}s)")]
    StalePrice {
        published_at: Timestamp,
        now: Timestamp,
        tolerance_secs: i64,
    },
    #[error("order price rounds to zero")]
    ZeroPrice,
    #[error("order price {0} is out of range")]
    PriceOutOfRange(Decimal),
    #[error("order size rounds to zero for amount {0}")]
    ZeroSize(Decimal),
    #[error("collateral error: {0}")]
    Collateral(#[from] CollateralError),
    #[error("fee error: {0}")]
    Fee(#[from] FeeError),
}

/// Oracle callbacks, queued for the market's single writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PapCommand {
    OraclePrice { price: Decimal, published_at: Timestamp },
    VolumeSnapshot,
    AuctionSchedule,
    Stop,
}

/// Lock-guarded command queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct PapInbox {
    queue: Arc<Mutex<VecDeque<PapCommand>>>,
}

impl PapInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: PapCommand) {
        self.queue.lock().push_back(command);
    }

    /// Takes everything queued so far, in arrival order.
    pub fn drain(&self) -> Vec<PapCommand> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAutomatedPurchase {
    config: AutomatedPurchaseConfig,
    side: Side,
    // Amount earmarked by the last volume snapshot, not yet used
    next_auction_amount: Option<Decimal>,
    active_order: Option<OrderId>,
    last_price: Option<(Decimal, Timestamp)>,
    ready_to_stop: bool,
    rounds: u64,
}

impl ProtocolAutomatedPurchase {
    /// 10.1: the side follows from which market asset is being spent.
    pub fn new(config: AutomatedPurchaseConfig, base_asset: &AssetId, quote_asset: &AssetId) -> Result<Self, PapError> {
        config.validate()?;
        let side = if &config.from_asset == base_asset {
            Side::Sell
        } else if &config.from_asset == quote_asset {
            Side::Buy
        } else {
            return Err(PapError::AssetNotInMarket(config.from_asset.clone()));
        };
        Ok(Self {
            config,
            side,
            next_auction_amount: None,
            active_order: None,
            last_price: None,
            ready_to_stop: false,
            rounds: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &AutomatedPurchaseConfig {
        &self.config
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn next_auction_amount(&self) -> Option<Decimal> {
        self.next_auction_amount
    }

    pub fn active_order(&self) -> Option<&OrderId> {
        self.active_order.as_ref()
    }

    pub fn last_price(&self) -> Option<(Decimal, Timestamp)> {
        self.last_price
    }

    pub fn is_ready_to_stop(&self) -> bool {
        self.ready_to_stop
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn can_be_discarded(&self) -> bool {
        self.ready_to_stop && self.active_order.is_none()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.config.expiry.is_some_and(|e| now >= e)
    }

    /// Every order placed by the program carries the same id.
    pub fn order_id(&self) -> OrderId {
        OrderId::from(hash_hex(self.config.id.as_bytes()))
    }

    pub fn on_oracle_price(&mut self, price: Decimal, published_at: Timestamp) {
        self.last_price = Some((price, published_at));
    }

    pub(crate) fn set_next_auction_amount(&mut self, amount: Decimal) {
        self.next_auction_amount = Some(amount);
    }

    pub(crate) fn take_next_auction_amount(&mut self) -> Option<Decimal> {
        self.next_auction_amount.take()
    }

    pub(crate) fn set_active_order(&mut self, order_id: OrderId) {
        self.active_order = Some(order_id);
        self.rounds += 1;
    }

    pub(crate) fn clear_active_order(&mut self) {
        self.active_order = None;
    }

    /// Marks the program for removal and hands back any pending earmark to release.
    pub(crate) fn stop(&mut self) -> Option<Decimal> {
        self.ready_to_stop = true;
        self.next_auction_amount.take()
    }

    /// 10.2: market-decimals price, `floor(oracle × offset)`.
    pub fn order_price(&self, now: Timestamp) -> Result<Decimal, PapError> {
        let (price, published_at) = self.last_price.ok_or(PapError::NoPrice)?;
        if now.secs_since(published_at) > self.config.price_staleness_tolerance_secs {
            return Err(PapError::StalePrice {
                published_at,
                now,
                tolerance_secs: self.config.price_staleness_tolerance_secs,
            });
        }
        let order_price = (price * self.config.oracle_offset_factor).floor();
        if order_price <= Decimal::ZERO {
            return Err(PapError::ZeroPrice);
        }
        Ok(order_price)
    }

    /// Sells spend base directly. Buys leave room for fees:
    /// `floor(amount / (fee_factor × price) × position_factor)`.
    pub fn order_size(&self, amount: Decimal, asset_price: Decimal, scaling: &AssetScaling, fee_factor: Decimal) -> Result<u64, PapError> {
        let size = match self.side {
            Side::Sell => (amount / scaling.base_factor).floor(),
            Side::Buy => (amount / (fee_factor * asset_price) * scaling.position_factor).floor(),
        };
        let size = size.to_u64().unwrap_or(0);
        if size == 0 {
            return Err(PapError::ZeroSize(amount));
        }
        Ok(size)
    }

    pub fn state(&self) -> ProtocolAutomatedPurchase {
        self.clone()
    }

    pub fn restore(state: ProtocolAutomatedPurchase) -> Self {
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> (AssetId, AssetId) {
        (AssetId::from("BTC"), AssetId::from("USDT"))
    }

    #[test]
    fn test_side_from_asset() {
        let (base, quote) = assets();
        let sell = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", base.clone()), &base, &quote).unwrap();
        assert_eq!(sell.side(), Side::Sell);
        let buy = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", quote.clone()), &base, &quote).unwrap();
        assert_eq!(buy.side(), Side::Buy);
        let err = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", AssetId::from("ETH")), &base, &quote);
        assert_eq!(err, Err(PapError::AssetNotInMarket(AssetId::from("ETH"))));
    }

    #[test]
    fn test_invalid_config() {
        let (base, quote) = assets();
        let config = AutomatedPurchaseConfig::new("p1", quote.clone()).with_auction_size(dec!(10), dec!(5));
        assert!(matches!(ProtocolAutomatedPurchase::new(config, &base, &quote), Err(PapError::InvalidConfig(_))));
    }

    #[test]
    fn test_order_price_and_staleness() {
        let (base, quote) = assets();
        let mut config = AutomatedPurchaseConfig::new("p1", quote.clone());
        config.oracle_offset_factor = dec!(1.05);
        config.price_staleness_tolerance_secs = 30;
        let mut pap = ProtocolAutomatedPurchase::new(config, &base, &quote).unwrap();

        assert_eq!(pap.order_price(Timestamp::from_secs(10)), Err(PapError::NoPrice));
        pap.on_oracle_price(dec!(99), Timestamp::from_secs(10));
        // floor(99 × 1.05) = floor(103.95)
        assert_eq!(pap.order_price(Timestamp::from_secs(40)), Ok(dec!(103)));
        assert!(matches!(pap.order_price(Timestamp::from_secs(41)), Err(PapError::StalePrice { .. })));
    }

    #[test]
    fn test_order_size() {
        let (base, quote) = assets();
        let scaling = AssetScaling::new(0, 0, 2, 0);
        let sell = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", base.clone()), &base, &quote).unwrap();
        // 1050 base units at 100 per position unit
        assert_eq!(sell.order_size(dec!(1050), dec!(20), &scaling, dec!(1.0015)), Ok(10));

        let buy = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", quote.clone()), &base, &quote).unwrap();
        // floor(1000 / (1.0015 × 10)) = floor(99.85)
        assert_eq!(buy.order_size(dec!(1000), dec!(10), &scaling, dec!(1.0015)), Ok(99));
        assert_eq!(buy.order_size(dec!(5), dec!(10), &scaling, dec!(1.0015)), Err(PapError::ZeroSize(dec!(5))));
    }

    #[test]
    fn test_order_id_is_hash_of_program_id() {
        let (base, quote) = assets();
        let pap = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", base.clone()), &base, &quote).unwrap();
        assert_eq!(pap.order_id(), OrderId::from(hash_hex(b"p1")));
    }

    #[test]
    fn test_stop_returns_pending_earmark() {
        let (base, quote) = assets();
        let mut pap = ProtocolAutomatedPurchase::new(AutomatedPurchaseConfig::new("p1", base.clone()), &base, &quote).unwrap();
        pap.set_next_auction_amount(dec!(50));
        assert_eq!(pap.stop(), Some(dec!(50)));
        assert!(pap.is_ready_to_stop());
        assert!(pap.can_be_discarded());

        pap.set_active_order(pap.order_id());
        assert!(!pap.can_be_discarded());
        pap.clear_active_order();
        assert!(pap.can_be_discarded());
    }

    #[test]
    fn test_inbox_drains_in_order() {
        let inbox = PapInbox::new();
        let sender = inbox.clone();
        sender.push(PapCommand::VolumeSnapshot);
        sender.push(PapCommand::AuctionSchedule);
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.drain(), vec![PapCommand::VolumeSnapshot, PapCommand::AuctionSchedule]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_inbox_accepts_commands_from_other_threads() {
        let inbox = PapInbox::new();
        let sender = inbox.clone();
        std::thread::spawn(move || sender.push(PapCommand::Stop)).join().unwrap();
        assert_eq!(inbox.drain(), vec![PapCommand::Stop]);
    }
}
