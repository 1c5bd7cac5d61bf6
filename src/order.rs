//! Order types, trades and order reason codes.
//!
//! Orders are owned by the market aggregate. Prices on an order are in asset
//! decimals (`price`) and market decimals (`original_price`); sizes are integer
//! position units.

use crate::fee::Fee;
use crate::types::{MarketId, OrderId, PartyId, Side, Timestamp, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order time in force options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled.
    GTC,
    /// Good till time. Requires an expiry.
    GTT,
    /// Immediate or cancel. Fill what is possible, stop the rest.
    IOC,
    /// Fill or kill. Fill entirely or stop entirely.
    FOK,
    /// Good for auction. Only accepted while the market is in auction.
    GFA,
    /// Good for normal trading. Only accepted in continuous trading.
    GFN,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::GTC
    }
}

impl TimeInForce {
    /// Persistent orders may rest on the book; price-bound breaches from them start auctions
    /// instead of rejecting the order.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, TimeInForce::FOK | TimeInForce::IOC | TimeInForce::GFN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    /// Created by the protocol itself (automated purchase). Parties cannot submit these.
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Parked,
    Filled,
    Cancelled,
    Expired,
    Stopped,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active | OrderStatus::Parked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeggedReference {
    Mid,
    BestBid,
    BestAsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeggedOrder {
    pub reference: PeggedReference,
    /// Offset in market decimals. Added for sells, subtracted for buys.
    pub offset: Decimal,
}

/// Iceberg descriptor. `reserved_remaining` holds size not yet visible on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergOrder {
    pub peak_size: u64,
    pub minimum_visible_size: u64,
    pub reserved_remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcebergOpts {
    pub peak_size: u64,
    pub minimum_visible_size: u64,
}

/// 2.0: a trading order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub market_id: MarketId,
    pub party: PartyId,
    pub side: Side,
    /// price in asset decimals, used for matching and funds
    pub price: Decimal,
    /// price in market decimals, as submitted
    pub original_price: Decimal,
    pub size: u64,
    pub remaining: u64,
    pub time_in_force: TimeInForce,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub reason: Option<OrderError>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub version: u64,
    /// auction batch the order entered the book in
    pub batch_id: u64,
    pub pegged: Option<PeggedOrder>,
    pub iceberg: Option<IcebergOrder>,
    pub post_only: bool,
}

impl Order {
    /// Remaining including any iceberg reserve.
    pub fn true_remaining(&self) -> u64 {
        self.remaining + self.iceberg.map_or(0, |i| i.reserved_remaining)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal() || self.true_remaining() == 0
    }

    pub fn is_expireable(&self) -> bool {
        self.time_in_force == TimeInForce::GTT && self.expires_at.is_some()
    }

    pub fn is_pegged(&self) -> bool {
        self.pegged.is_some()
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn filled(&self) -> u64 {
        self.size.saturating_sub(self.true_remaining())
    }

    /// Splits a fresh order's size into the visible peak and the reserve.
    pub fn set_iceberg_visible(&mut self) {
        if let Some(iceberg) = self.iceberg.as_mut() {
            let total = self.remaining + iceberg.reserved_remaining;
            let visible = total.min(iceberg.peak_size);
            self.remaining = visible;
            iceberg.reserved_remaining = total - visible;
        }
    }

    /// Refills visible size from the reserve once it drops below the minimum.
    /// Returns true when a refresh happened (and time priority is lost).
    pub fn refresh_iceberg(&mut self) -> bool {
        let Some(iceberg) = self.iceberg.as_mut() else {
            return false;
        };
        if self.remaining >= iceberg.minimum_visible_size || iceberg.reserved_remaining == 0 {
            return false;
        }
        let refill = iceberg.peak_size.saturating_sub(self.remaining).min(iceberg.reserved_remaining);
        iceberg.reserved_remaining -= refill;
        self.remaining += refill;
        refill > 0
    }

    pub fn reject(&mut self, reason: OrderError) {
        self.status = if reason.is_stopping() {
            OrderStatus::Stopped
        } else {
            OrderStatus::Rejected
        };
        self.reason = Some(reason);
    }
}

/// Order submission as received from a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub market_id: MarketId,
    pub side: Side,
    /// market decimals; ignored for pegged orders
    pub price: Decimal,
    pub size: u64,
    pub time_in_force: TimeInForce,
    pub order_type: OrderType,
    pub expires_at: Option<Timestamp>,
    pub pegged: Option<PeggedOrder>,
    pub iceberg: Option<IcebergOpts>,
    pub post_only: bool,
}

impl OrderSubmission {
    pub fn limit(market_id: MarketId, side: Side, price: Decimal, size: u64, time_in_force: TimeInForce) -> Self {
        Self {
            market_id,
            side,
            price,
            size,
            time_in_force,
            order_type: OrderType::Limit,
            expires_at: None,
            pegged: None,
            iceberg: None,
            post_only: false,
        }
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_peg(mut self, reference: PeggedReference, offset: Decimal) -> Self {
        self.pegged = Some(PeggedOrder { reference, offset });
        self
    }

    pub fn with_iceberg(mut self, peak_size: u64, minimum_visible_size: u64) -> Self {
        self.iceberg = Some(IcebergOpts {
            peak_size,
            minimum_visible_size,
        });
        self
    }

    pub fn post_only(mut self) -> Self {
        self.post_only = true;
        self
    }
}

/// Amendment of an existing order. Unset fields keep the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAmendment {
    pub order_id: OrderId,
    pub market_id: MarketId,
    /// market decimals
    pub price: Option<Decimal>,
    pub size_delta: i64,
    pub expires_at: Option<Timestamp>,
    pub time_in_force: Option<TimeInForce>,
    pub pegged_offset: Option<Decimal>,
    pub pegged_reference: Option<PeggedReference>,
}

impl OrderAmendment {
    pub fn new(market_id: MarketId, order_id: OrderId) -> Self {
        Self {
            order_id,
            market_id,
            ..Default::default()
        }
    }

    pub fn price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn size_delta(mut self, delta: i64) -> Self {
        self.size_delta = delta;
        self
    }

    pub fn expires_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }
}

/// Immutable match record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market_id: MarketId,
    /// asset decimals
    pub price: Decimal,
    /// market decimals
    pub market_price: Decimal,
    pub size: u64,
    pub buyer: PartyId,
    pub seller: PartyId,
    pub buy_order: OrderId,
    pub sell_order: OrderId,
    /// None for auction uncrossing trades
    pub aggressor: Option<Side>,
    pub timestamp: Timestamp,
    pub buyer_fee: Option<Fee>,
    pub seller_fee: Option<Fee>,
    pub buyer_auction_batch: u64,
    pub seller_auction_batch: u64,
}

/// Result of pushing an order through the matching book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order: Order,
    pub trades: Vec<Trade>,
    pub passive_orders_affected: Vec<Order>,
}

impl OrderConfirmation {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            trades: Vec::new(),
            passive_orders_affected: Vec::new(),
        }
    }
}

/// Order reason codes. Carried on rejected or stopped orders and returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum OrderError {
    #[error("market is closed")]
    MarketClosed,
    #[error("order submitted to the wrong market")]
    InvalidMarketId,
    #[error("party does not own the order")]
    InvalidPartyId,
    #[error("order not found")]
    OrderNotFound,
    #[error("invalid order size")]
    InvalidSize,
    #[error("invalid order price")]
    InvalidPrice,
    #[error("invalid expiration datetime")]
    InvalidExpirationDatetime,
    #[error("GTT order requires an expiry")]
    GttWithoutExpiry,
    #[error("non GTT order cannot carry an expiry")]
    NonGttWithExpiry,
    #[error("network orders cannot be submitted by parties")]
    InvalidType,
    #[error("GFN order received during auction")]
    GfnOrderDuringAuction,
    #[error("IOC order received during auction")]
    IocOrderDuringAuction,
    #[error("FOK order received during auction")]
    FokOrderDuringAuction,
    #[error("GFA order received during continuous trading")]
    GfaOrderDuringContinuousTrading,
    #[error("cannot amend to GFA")]
    CannotAmendToGfa,
    #[error("cannot amend to GFN")]
    CannotAmendToGfn,
    #[error("cannot amend from GFA or GFN")]
    CannotAmendFromGfaOrGfn,
    #[error("cannot amend to FOK or IOC")]
    CannotAmendToFokOrIoc,
    #[error("cannot amend pegged details on a non pegged order")]
    CannotAmendPeggedOrderDetailsOnNonPeggedOrder,
    #[error("cannot amend the price of a pegged order")]
    CannotAmendPriceOnPeggedOrder,
    #[error("amendment changes nothing")]
    EditNotAllowed,
    #[error("order backs a liquidity commitment")]
    LiquidityCommitmentOrder,
    #[error("party has no general account for the asset")]
    MissingGeneralAccount,
    #[error("insufficient asset balance")]
    InsufficientAssetBalance,
    #[error("insufficient funds to pay fees")]
    InsufficientFundsToPayFees,
    #[error("pegged buy order cannot reference the best ask price")]
    PeggedOrderBuyCannotReferenceBestAskPrice,
    #[error("pegged sell order cannot reference the best bid price")]
    PeggedOrderSellCannotReferenceBestBidPrice,
    #[error("pegged order referencing mid must have an offset greater than zero")]
    PeggedOrderOffsetMustBeGreaterThanZero,
    #[error("pegged offset must not be negative")]
    PeggedOrderOffsetMustBeGreaterOrEqualToZero,
    #[error("pegged order must be GTC or GTT")]
    PeggedOrderMustBeGttOrGtc,
    #[error("pegged order cannot be an iceberg")]
    PeggedIcebergNotSupported,
    #[error("reference price unavailable for pegged order")]
    UnableToRepricePeggedOrder,
    #[error("iceberg peak must be positive and at least the minimum visible size")]
    InvalidIcebergParameters,
    #[error("non persistent order would breach price bounds")]
    NonPersistentOrderOutOfPriceBounds,
    #[error("post only order would trade")]
    PostOnlyOrderWouldTrade,
    #[error("order would trade with the same party")]
    SelfTrading,
    #[error("order could not be filled entirely")]
    NotFilled,
}

impl OrderError {
    /// Reasons that end an otherwise valid order (status Stopped, not Rejected).
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            OrderError::NonPersistentOrderOutOfPriceBounds
                | OrderError::PostOnlyOrderWouldTrade
                | OrderError::InsufficientFundsToPayFees
                | OrderError::SelfTrading
                | OrderError::NotFilled
                | OrderError::UnableToRepricePeggedOrder
        )
    }
}
