// 11.0: every state change produces an event. replicas compare them, external systems
// consume them. the EventPayload enum lists all event types.

use crate::auction::{AuctionEvent, MarketState};
use crate::collateral::LedgerMovement;
use crate::order::{Order, Trade};
use crate::stop_orders::StopOrder;
use crate::types::{AssetId, MarketId, OrderId, PartyId, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Order events
    OrderUpdated(OrderUpdatedEvent),
    ExpiredOrders(ExpiredOrdersEvent),
    Trade(TradeEvent),
    StopOrderUpdated(StopOrderUpdatedEvent),

    // Collateral events
    LedgerMovements(LedgerMovementsEvent),
    LiquidityFeeDistributed(LiquidityFeeDistributedEvent),

    // Market events
    Auction(AuctionEvent),
    MarketStateChanged(MarketStateChangedEvent),

    // Automated purchase events
    AutomatedPurchaseAnnounced(AutomatedPurchaseAnnouncedEvent),
}

// full order snapshot after the change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdatedEvent {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredOrdersEvent {
    pub market_id: MarketId,
    pub order_ids: Vec<OrderId>,
}

// full stop order after the change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOrderUpdatedEvent {
    pub stop_order: StopOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovementsEvent {
    pub market_id: MarketId,
    pub movements: Vec<LedgerMovement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityFeeDistributedEvent {
    pub market_id: MarketId,
    pub asset: AssetId,
    // party order
    pub amounts: Vec<(PartyId, Decimal)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStateChangedEvent {
    pub market_id: MarketId,
    pub from: MarketState,
    pub to: MarketState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomatedPurchaseAnnouncedEvent {
    pub market_id: MarketId,
    pub automated_purchase_id: String,
    pub from_asset: AssetId,
    pub side: Side,
    pub amount: Decimal,
    pub size: u64,
    pub price: Decimal,
    pub order_id: OrderId,
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::OrderUpdated(_) => "order_updated",
            EventPayload::ExpiredOrders(_) => "expired_orders",
            EventPayload::Trade(_) => "trade",
            EventPayload::StopOrderUpdated(_) => "stop_order_updated",
            EventPayload::LedgerMovements(_) => "ledger_movements",
            EventPayload::LiquidityFeeDistributed(_) => "liquidity_fee_distributed",
            EventPayload::Auction(_) => "auction",
            EventPayload::MarketStateChanged(_) => "market_state_changed",
            EventPayload::AutomatedPurchaseAnnounced(_) => "automated_purchase_announced",
        }
    }
}
