// 8.0 engine/core.rs: the spot market aggregate. one writer, all state lives here.

use super::config::ExecutionConfig;
use super::pegged::ReferencePrices;
use super::results::{MarketError, MarketSummary};
use crate::auction::{AuctionState, MarketState, TradingMode};
use crate::collateral::{CollateralLedger, InMemoryLedger, LedgerMovement};
use crate::config::MarketConfig;
use crate::equity_shares::EquityShares;
use crate::events::{Event, EventId, EventPayload, LedgerMovementsEvent, MarketStateChangedEvent, OrderUpdatedEvent};
use crate::fee::{FeeEngine, FeeServices};
use crate::fee_splitter::FeeSplitter;
use crate::holding::HoldingAccountTracker;
use crate::liquidity::{LiquidityEngine, NoopLiquidityEngine};
use crate::matching::{MatchingBook, OrderBook};
use crate::order::Order;
use crate::pap::{PapInbox, ProtocolAutomatedPurchase};
use crate::price_monitor::PriceMonitor;
use crate::stop_orders::StopOrders;
use crate::types::{AssetId, AssetScaling, IdGenerator, MarketId, OrderId, PartyId, Side, Timestamp};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use tracing::{debug, error, info, trace};

/// Logs and halts. Used where continuing would let replicas diverge.
pub(super) fn fatal(market: &MarketId, context: &str, err: impl Display) -> ! {
    error!(market = %market, error = %err, "{}", context);
    panic!("{}: {}", context, err);
}

/** 8.1: spot market. orders, auctions, fees, holdings and LP shares for one market */
#[derive(Debug)]
pub struct SpotMarket {
    pub(super) config: MarketConfig,
    pub(super) exec: ExecutionConfig,
    pub(super) scaling: AssetScaling,
    pub(super) state: MarketState,
    pub(super) closed: bool,
    pub(super) current_time: Timestamp,
    pub(super) book: Box<dyn MatchingBook>,
    pub(super) ledger: Box<dyn CollateralLedger>,
    pub(super) liquidity: Box<dyn LiquidityEngine>,
    pub(super) fee_services: FeeServices,
    pub(super) fee: FeeEngine,
    pub(super) holdings: HoldingAccountTracker,
    pub(super) auction: AuctionState,
    pub(super) price_monitor: PriceMonitor,
    pub(super) equity_shares: EquityShares,
    pub(super) fee_splitter: FeeSplitter,
    // every party that ever got an order past validation
    pub(super) parties: BTreeSet<PartyId>,
    // pegged orders off the book
    pub(super) parked: BTreeMap<OrderId, Order>,
    pub(super) expiring: BTreeSet<(Timestamp, OrderId)>,
    pub(super) stop_orders: StopOrders,
    pub(super) last_reference: Option<ReferencePrices>,
    pub(super) last_traded_price: Option<Decimal>,
    pub(super) market_value_proxy: Decimal,
    pub(super) next_lp_fee_distribution: Timestamp,
    pub(super) next_bound_factor_update: Timestamp,
    pub(super) id_gen: IdGenerator,
    pub(super) pap: Option<ProtocolAutomatedPurchase>,
    pub(super) pap_inbox: PapInbox,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
}

impl SpotMarket {
    /// A proposed market. Nothing trades until [`SpotMarket::start_opening_auction`].
    pub fn new(
        config: MarketConfig,
        exec: ExecutionConfig,
        book: Box<dyn MatchingBook>,
        ledger: Box<dyn CollateralLedger>,
        now: Timestamp,
    ) -> Result<Self, MarketError> {
        config.validate()?;
        let scaling = config.scaling();
        let fee = FeeEngine::new(config.quote_asset.clone(), config.fee_factors, scaling.position_factor)?;

        let mut price_monitor = PriceMonitor::new(
            config.market_id.clone(),
            Box::new(config.risk_model),
            &config.price_monitoring,
            config.auction_min_duration_secs,
        );
        price_monitor.on_time_update(now);

        let auction = AuctionState::new(
            config.market_id.clone(),
            config.default_trading_mode,
            config.opening_auction_duration_secs,
            now,
        );

        Ok(Self {
            holdings: HoldingAccountTracker::new(config.market_id.clone()),
            stop_orders: StopOrders::new(config.market_id.clone()),
            id_gen: IdGenerator::new(config.market_id.as_str()),
            next_lp_fee_distribution: now.add_secs(config.lp_fee_distribution_period_secs),
            next_bound_factor_update: now.add_secs(config.bound_factor_update_period_secs),
            exec,
            scaling,
            state: MarketState::Proposed,
            closed: false,
            current_time: now,
            book,
            ledger,
            liquidity: Box::new(NoopLiquidityEngine),
            fee_services: FeeServices::default(),
            fee,
            auction,
            price_monitor,
            equity_shares: EquityShares::new(Decimal::ZERO),
            fee_splitter: FeeSplitter::new(),
            parties: BTreeSet::new(),
            parked: BTreeMap::new(),
            expiring: BTreeSet::new(),
            last_reference: None,
            last_traded_price: None,
            market_value_proxy: Decimal::ZERO,
            pap: None,
            pap_inbox: PapInbox::new(),
            events: Vec::new(),
            next_event_id: 1,
            config,
        })
    }

    /// Proposed market over the in-process book and ledger.
    pub fn in_memory(config: MarketConfig, now: Timestamp) -> Result<Self, MarketError> {
        Self::new(
            config,
            ExecutionConfig::default(),
            Box::new(OrderBook::new()),
            Box::new(InMemoryLedger::new()),
            now,
        )
    }

    pub fn with_liquidity_engine(mut self, engine: Box<dyn LiquidityEngine>) -> Self {
        self.liquidity = engine;
        self
    }

    pub fn with_fee_services(mut self, services: FeeServices) -> Self {
        self.fee_services = services;
        self
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn market_id(&self) -> &MarketId {
        &self.config.market_id
    }

    pub fn scaling(&self) -> AssetScaling {
        self.scaling
    }

    pub fn state(&self) -> MarketState {
        self.state
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.auction.mode()
    }

    pub fn auction(&self) -> &AuctionState {
        &self.auction
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn book(&self) -> &dyn MatchingBook {
        self.book.as_ref()
    }

    pub fn ledger(&self) -> &dyn CollateralLedger {
        self.ledger.as_ref()
    }

    /// For deposits and other movements outside the market's own flows.
    pub fn ledger_mut(&mut self) -> &mut dyn CollateralLedger {
        self.ledger.as_mut()
    }

    pub fn holdings(&self) -> &HoldingAccountTracker {
        &self.holdings
    }

    pub fn fee_engine(&self) -> &FeeEngine {
        &self.fee
    }

    pub fn price_monitor(&self) -> &PriceMonitor {
        &self.price_monitor
    }

    pub fn equity_shares(&self) -> &EquityShares {
        &self.equity_shares
    }

    pub fn fee_splitter(&self) -> &FeeSplitter {
        &self.fee_splitter
    }

    pub fn parked_orders(&self) -> impl Iterator<Item = &Order> {
        self.parked.values()
    }

    /// Live order, on the book or parked.
    pub fn get_order(&self, order_id: &OrderId) -> Option<Order> {
        self.book
            .get_order_by_id(order_id)
            .or_else(|| self.parked.get(order_id))
            .cloned()
    }

    pub fn last_traded_price(&self) -> Option<Decimal> {
        self.last_traded_price
    }

    pub fn market_value_proxy(&self) -> Decimal {
        self.market_value_proxy
    }

    /// Last traded price, or one before the first trade.
    pub fn mark_price(&self) -> Decimal {
        self.last_traded_price.unwrap_or(Decimal::ONE)
    }

    /// Records a liquidity provider's committed stake per side.
    pub fn set_lp_stake(&mut self, party: &PartyId, buy_stake: Decimal, sell_stake: Decimal) {
        let mark = self.mark_price();
        self.equity_shares.set_party_stake(party, buy_stake, sell_stake, mark);
        debug!(market = %self.config.market_id, party = %party, %buy_stake, %sell_stake, "lp stake updated");
    }

    pub fn summary(&self) -> MarketSummary {
        MarketSummary {
            market_id: self.config.market_id.clone(),
            state: self.state,
            trading_mode: self.auction.mode(),
            best_bid: self.book.best_bid_price(),
            best_ask: self.book.best_ask_price(),
            last_traded_price: self.last_traded_price,
            orders: self.book.all_orders().len(),
            parked_orders: self.parked.len(),
            market_value_proxy: self.market_value_proxy,
        }
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn next_id(&mut self) -> String {
        self.id_gen.next_id()
    }

    pub(super) fn asset_for_side(&self, side: Side) -> &AssetId {
        match side {
            Side::Buy => &self.config.quote_asset,
            Side::Sell => &self.config.base_asset,
        }
    }

    /// Funds an order of `size` at `price` reserves: quote notional for buys,
    /// base quantity for sells. `None` when the amount is too large to represent.
    pub(super) fn amount_by_side(&self, side: Side, price: Decimal, size: u64) -> Option<Decimal> {
        match side {
            Side::Buy => self.scaling.quote_notional(size, price),
            Side::Sell => self.scaling.base_quantity(size),
        }
    }

    pub(super) fn set_state(&mut self, to: MarketState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        info!(market = %self.config.market_id, %from, %to, "market state changed");
        self.emit_event(EventPayload::MarketStateChanged(MarketStateChangedEvent {
            market_id: self.config.market_id.clone(),
            from,
            to,
        }));
    }

    pub(super) fn emit_order_updated(&mut self, order: &Order) {
        self.emit_event(EventPayload::OrderUpdated(OrderUpdatedEvent { order: order.clone() }));
    }

    pub(super) fn emit_movements(&mut self, movements: Vec<LedgerMovement>) {
        if movements.is_empty() {
            return;
        }
        self.emit_event(EventPayload::LedgerMovements(LedgerMovementsEvent {
            market_id: self.config.market_id.clone(),
            movements,
        }));
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        trace!(market = %self.config.market_id, id = event.id.0, kind = event.payload.kind(), "event");
        if self.exec.verbose {
            debug!(market = %self.config.market_id, id = event.id.0, payload = ?event.payload, "event");
        }

        self.events.push(event);

        if self.events.len() > self.exec.max_events {
            let drain_count = self.events.len() - self.exec.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
